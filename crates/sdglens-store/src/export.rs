//! Per-document exports of merged classifications as CSV and JSON.

use std::io::Write;
use std::path::{Path, PathBuf};

use sdglens_core::{ClassificationResult, DocumentId, Result};
use tracing::{debug, info};

use crate::results::ResultStore;

pub const CSV_FILE: &str = "classifications.csv";
pub const JSON_FILE: &str = "classifications.json";

const HEADER: [&str; 7] = [
    "chunk_id",
    "outcome",
    "sdg_labels",
    "ai_related",
    "sentiment",
    "raw_output",
    "error",
];

/// Write results as CSV rows in the order given.
pub fn write_csv<W: Write>(results: &[ClassificationResult], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(HEADER)?;
    for r in results {
        let (sdg, ai, sentiment) = match &r.labels {
            Some(l) => (
                l.sdg_labels
                    .iter()
                    .map(|n| n.to_string())
                    .collect::<Vec<_>>()
                    .join(";"),
                l.ai_related.to_string(),
                l.sentiment.as_str().to_string(),
            ),
            None => (String::new(), String::new(), String::new()),
        };
        wtr.write_record([
            r.chunk_id.to_string(),
            r.outcome.as_str().to_string(),
            sdg,
            ai,
            sentiment,
            r.raw_output.clone().unwrap_or_default(),
            r.error.clone().unwrap_or_default(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Export one document to `<dir>/<company>/<year>/classifications.{csv,json}`.
/// Returns the number of rows written; documents without results write nothing.
pub fn export_document(store: &dyn ResultStore, document: &DocumentId, dir: &Path) -> Result<usize> {
    let results = store.list_for_document(document)?;
    if results.is_empty() {
        debug!("No results for {}, nothing to export", document);
        return Ok(0);
    }
    let out_dir = document_export_dir(dir, document);
    std::fs::create_dir_all(&out_dir)?;

    let file = std::fs::File::create(out_dir.join(CSV_FILE))?;
    write_csv(&results, file)?;
    let json = serde_json::to_string_pretty(&results)?;
    std::fs::write(out_dir.join(JSON_FILE), json)?;
    Ok(results.len())
}

/// Export every document in the store. Returns `(documents, rows)`.
pub fn export_all(store: &dyn ResultStore, dir: &Path) -> Result<(usize, usize)> {
    let mut documents = 0;
    let mut rows = 0;
    for document in store.documents()? {
        let n = export_document(store, &document, dir)?;
        if n > 0 {
            documents += 1;
            rows += n;
        }
    }
    info!("Exported {} rows for {} documents to {}", rows, documents, dir.display());
    Ok((documents, rows))
}

pub fn document_export_dir(dir: &Path, document: &DocumentId) -> PathBuf {
    dir.join(&document.company).join(document.year.to_string())
}
