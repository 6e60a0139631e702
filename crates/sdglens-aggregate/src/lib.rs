//! SDGLens Aggregate: company/year tables over merged classifications.
//!
//! Counts are bucketed per company, year and sentiment, then reduced to a
//! positive-minus-negative table per company and year.

pub mod counts;
pub mod diff;

use std::path::{Path, PathBuf};

use sdglens_core::Result;
use sdglens_store::ResultStore;
use tracing::info;

pub use counts::{count_labels, CountTable, LabelCounts, SDG_COLUMNS};
pub use diff::{positive_minus_negative, DiffTable, NetCounts};

pub const COUNTS_FILE: &str = "company_year_sentiment_counts.csv";
pub const DIFF_FILE: &str = "company_year_pos_minus_neg.csv";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateReport {
    pub counted: usize,
    pub skipped: usize,
    pub count_rows: usize,
    pub diff_rows: usize,
    pub counts_path: PathBuf,
    pub diff_path: PathBuf,
}

/// Aggregate every stored result and write both tables into `dir`.
pub fn write_tables(store: &dyn ResultStore, dir: &Path) -> Result<AggregateReport> {
    let results = store.list_all()?;
    let counts = count_labels(&results);
    let diff = positive_minus_negative(&counts);

    std::fs::create_dir_all(dir)?;
    let counts_path = dir.join(COUNTS_FILE);
    let diff_path = dir.join(DIFF_FILE);
    counts.write_csv(std::fs::File::create(&counts_path)?)?;
    diff.write_csv(std::fs::File::create(&diff_path)?)?;

    info!(
        "Aggregated {} results ({} skipped) into {} count rows and {} net rows",
        counts.counted,
        counts.skipped,
        counts.buckets.len(),
        diff.rows.len()
    );
    Ok(AggregateReport {
        counted: counts.counted,
        skipped: counts.skipped,
        count_rows: counts.buckets.len(),
        diff_rows: diff.rows.len(),
        counts_path,
        diff_path,
    })
}
