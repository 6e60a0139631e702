//! SDGLens Ingest: report text cleaning, sentence splitting, document
//! discovery, score tables and threshold filtering.

pub mod clean;
pub mod document;
pub mod filter;
pub mod scores;
pub mod splitter;

pub use clean::clean_report_text;
pub use document::{
    discover_documents, document_dir, load_splits, save_splits, Document, EMBEDDINGS_FILE,
    RAW_TEXT_FILE, SCORES_FILE, SPLITS_FILE,
};
pub use filter::{filter, FilterHit, FilterResult};
pub use scores::{ScoreRow, ScoreTable};
pub use splitter::{split_sentences, Splitter};
