//! Documents, their splits files, and discovery of the per-company/per-year
//! directory layout.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sdglens_core::{ChunkId, DocumentId, Error, Result};
use tracing::warn;

/// Raw report text, `<texts>/<company>/<year>/results.txt`.
pub const RAW_TEXT_FILE: &str = "results.txt";
/// Sentence splits next to the raw text.
pub const SPLITS_FILE: &str = "splits.json";
/// Score table, `<scores>/<company>/<year>/similarity_scores.csv`.
pub const SCORES_FILE: &str = "similarity_scores.csv";
/// Precomputed sentence embeddings next to the score table.
pub const EMBEDDINGS_FILE: &str = "embeddings.json";

/// A report split into sentences. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: DocumentId,
    sentences: BTreeMap<ChunkId, String>,
}

impl Document {
    pub fn new(id: DocumentId, sentences: BTreeMap<ChunkId, String>) -> Self {
        Self { id, sentences }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn sentences(&self) -> &BTreeMap<ChunkId, String> {
        &self.sentences
    }

    pub fn sentence(&self, chunk_id: ChunkId) -> Option<&str> {
        self.sentences.get(&chunk_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }
}

/// Load a `splits.json` (`{"0": "...", "1": "..."}`) for a document.
pub fn load_splits(path: &Path, id: DocumentId) -> Result<Document> {
    let content = std::fs::read_to_string(path)?;
    let raw: BTreeMap<String, String> = serde_json::from_str(&content)?;

    let mut sentences = BTreeMap::new();
    for (key, text) in raw {
        let chunk_id: ChunkId = key.parse().map_err(|_| {
            Error::InvalidInput(format!("{}: bad chunk id {:?}", path.display(), key))
        })?;
        sentences.insert(chunk_id, text);
    }
    Ok(Document::new(id, sentences))
}

/// Write a document's sentences as `splits.json`, in chunk order.
pub fn save_splits(doc: &Document, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&doc.sentences)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Find `<root>/<company>/<year>/<file_name>` files, sorted by document.
///
/// Directories whose name is not a year are skipped with a warning.
pub fn discover_documents(root: &Path, file_name: &str) -> Result<Vec<(DocumentId, PathBuf)>> {
    let mut found = Vec::new();
    if !root.is_dir() {
        return Ok(found);
    }

    for company_entry in std::fs::read_dir(root)?.flatten() {
        let company_path = company_entry.path();
        if !company_path.is_dir() {
            continue;
        }
        let company = company_entry.file_name().to_string_lossy().to_string();

        for year_entry in std::fs::read_dir(&company_path)?.flatten() {
            let year_path = year_entry.path();
            if !year_path.is_dir() {
                continue;
            }
            let year_name = year_entry.file_name().to_string_lossy().to_string();
            let year: u16 = match year_name.parse() {
                Ok(y) => y,
                Err(_) => {
                    warn!("Skipping non-year directory {}", year_path.display());
                    continue;
                }
            };
            let file = year_path.join(file_name);
            if file.is_file() {
                found.push((DocumentId::new(company.clone(), year), file));
            }
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

/// Directory of a document under a data root (`<root>/<company>/<year>`).
pub fn document_dir(root: &Path, id: &DocumentId) -> PathBuf {
    root.join(&id.company).join(id.year.to_string())
}
