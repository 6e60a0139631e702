//! Label counts per company, year and sentiment.

use std::collections::BTreeMap;
use std::io::Write;

use sdglens_core::{ClassificationResult, DocumentId, Outcome, ParsedLabels, Result, Sentiment};
use tracing::debug;

/// Number of SDG columns: `0` (no SDG) through `17`.
pub const SDG_COLUMNS: usize = 18;

/// Counts for one bucket: one cell per SDG label plus the AI column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelCounts {
    pub sdg: [u64; SDG_COLUMNS],
    pub ai: u64,
}

impl LabelCounts {
    /// Add one classified sentence.
    ///
    /// A `0` label or a malformed SDG answer counts only in column `0`;
    /// otherwise every distinct label counts once.
    pub fn add(&mut self, labels: &ParsedLabels) {
        if labels.sdg_malformed || labels.sdg_labels.contains(&0) {
            self.sdg[0] += 1;
        } else {
            let mut seen = [false; SDG_COLUMNS];
            for &n in &labels.sdg_labels {
                let i = n as usize;
                if i < SDG_COLUMNS && !seen[i] {
                    seen[i] = true;
                    self.sdg[i] += 1;
                }
            }
        }
        if labels.ai_related {
            self.ai += 1;
        }
    }
}

/// Counts keyed by `(document, sentiment)`. Iteration order is company, year,
/// then Positive before Negative.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountTable {
    pub buckets: BTreeMap<(DocumentId, Sentiment), LabelCounts>,
    /// Parsed results that went into a bucket.
    pub counted: usize,
    /// Results that did not parse and were left out.
    pub skipped: usize,
}

impl CountTable {
    pub fn get(&self, document: &DocumentId, sentiment: Sentiment) -> Option<&LabelCounts> {
        self.buckets.get(&(document.clone(), sentiment))
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Write `company,year,sentiment,0..17,AI` rows.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header = vec!["company".to_string(), "year".into(), "sentiment".into()];
        header.extend((0..SDG_COLUMNS).map(|n| n.to_string()));
        header.push("AI".into());
        wtr.write_record(&header)?;

        for ((document, sentiment), counts) in &self.buckets {
            let mut row = vec![
                document.company.clone(),
                document.year.to_string(),
                sentiment.as_str().to_string(),
            ];
            row.extend(counts.sdg.iter().map(|n| n.to_string()));
            row.push(counts.ai.to_string());
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Bucket parsed results by document and sentiment.
pub fn count_labels<'a, I>(results: I) -> CountTable
where
    I: IntoIterator<Item = &'a ClassificationResult>,
{
    let mut table = CountTable::default();
    for result in results {
        let labels = match (&result.outcome, &result.labels) {
            (Outcome::Parsed, Some(labels)) => labels,
            _ => {
                debug!(
                    "{} chunk {}: {}, not counted",
                    result.document,
                    result.chunk_id,
                    result.outcome.as_str()
                );
                table.skipped += 1;
                continue;
            }
        };
        table
            .buckets
            .entry((result.document.clone(), labels.sentiment))
            .or_default()
            .add(labels);
        table.counted += 1;
    }
    table
}
