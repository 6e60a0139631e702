//! SDGLens Store: batch log, request mapping files, SQLite result store
//! and per-document exports.

pub mod batch_log;
pub mod export;
pub mod mapping;
pub mod results;
pub mod schema;

pub use batch_log::{BatchLog, BatchLogEntry, LogSummary, RequestCounts};
pub use export::{export_all, export_document};
pub use mapping::{write_mapping, MappingEntry, MappingIndex};
pub use results::{ResultStore, SqliteResultStore};
