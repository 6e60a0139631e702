//! Classification result store.
//!
//! Results are keyed by `(company, year, chunk_id)`; writing the same key
//! again replaces the row, so re-merging a batch is harmless.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use sdglens_core::{
    ChunkId, ClassificationResult, DocumentId, Error, Outcome, ParsedLabels, Result, Sentiment,
};
use tracing::{info, warn};

use crate::schema::{SCHEMA_SQL, SELECT_COLUMNS, UPSERT_SQL};

/// Where merged results live.
pub trait ResultStore: Send + Sync {
    /// Insert or replace the result for its `(document, chunk_id)` key.
    fn upsert(&self, result: &ClassificationResult) -> Result<()>;

    fn upsert_many(&self, results: &[ClassificationResult]) -> Result<usize> {
        for r in results {
            self.upsert(r)?;
        }
        Ok(results.len())
    }

    fn get(&self, document: &DocumentId, chunk_id: ChunkId) -> Result<Option<ClassificationResult>>;

    /// Results of one document ordered by chunk id.
    fn list_for_document(&self, document: &DocumentId) -> Result<Vec<ClassificationResult>>;

    /// All results ordered by company, year, chunk id.
    fn list_all(&self) -> Result<Vec<ClassificationResult>>;

    /// Documents that have at least one result.
    fn documents(&self) -> Result<Vec<DocumentId>>;

    fn count(&self) -> Result<usize>;
}

/// SQLite-backed [`ResultStore`].
pub struct SqliteResultStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteResultStore {
    /// Open or create the database file at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Storage(e.to_string()))?;
        }
        let conn = Connection::open(db_path).map_err(|e| Error::Database(e.to_string()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path.to_path_buf()),
        };
        info!(
            "SqliteResultStore initialized: {} results, path={}",
            store.count()?,
            db_path.display()
        );
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Database(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;
        Ok(())
    }

    fn query(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<ClassificationResult>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(sql)
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(args, StoredRow::from_row)
            .map_err(|e| Error::Database(e.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            let row = row.map_err(|e| Error::Database(e.to_string()))?;
            out.push(row.into_result()?);
        }
        Ok(out)
    }
}

impl ResultStore for SqliteResultStore {
    fn upsert(&self, r: &ClassificationResult) -> Result<()> {
        let conn = self.conn.lock();
        upsert_row(&conn, r)
    }

    /// All rows in one transaction: either every result lands or none do.
    fn upsert_many(&self, results: &[ClassificationResult]) -> Result<usize> {
        let conn = self.conn.lock();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::Database(e.to_string()))?;
        for r in results {
            if let Err(e) = upsert_row(&tx, r) {
                if let Err(rb) = tx.rollback() {
                    warn!("Rollback after failed upsert also failed: {}", rb);
                }
                return Err(e);
            }
        }
        tx.commit().map_err(|e| Error::Database(e.to_string()))?;
        Ok(results.len())
    }

    fn get(&self, document: &DocumentId, chunk_id: ChunkId) -> Result<Option<ClassificationResult>> {
        let sql = format!(
            "SELECT {} FROM classifications WHERE company = ?1 AND year = ?2 AND chunk_id = ?3",
            SELECT_COLUMNS
        );
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached(&sql)
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(
                params![document.company, document.year, chunk_to_sql(chunk_id)?],
                StoredRow::from_row,
            )
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(StoredRow::into_result).transpose()
    }

    fn list_for_document(&self, document: &DocumentId) -> Result<Vec<ClassificationResult>> {
        let sql = format!(
            "SELECT {} FROM classifications WHERE company = ?1 AND year = ?2 ORDER BY chunk_id",
            SELECT_COLUMNS
        );
        self.query(&sql, &[&document.company, &document.year])
    }

    fn list_all(&self) -> Result<Vec<ClassificationResult>> {
        let sql = format!(
            "SELECT {} FROM classifications ORDER BY company, year, chunk_id",
            SELECT_COLUMNS
        );
        self.query(&sql, &[])
    }

    fn documents(&self) -> Result<Vec<DocumentId>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT DISTINCT company, year FROM classifications ORDER BY company, year")
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok(DocumentId::new(row.get::<_, String>(0)?, row.get(1)?)))
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM classifications", [], |row| row.get(0))
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count as usize)
    }
}

fn upsert_row(conn: &Connection, r: &ClassificationResult) -> Result<()> {
    let labels = r.labels.as_ref();
    let sdg_labels = labels
        .map(|l| serde_json::to_string(&l.sdg_labels))
        .transpose()?;
    conn.prepare_cached(UPSERT_SQL)
        .map_err(|e| Error::Database(e.to_string()))?
        .execute(params![
            r.document.company,
            r.document.year,
            chunk_to_sql(r.chunk_id)?,
            r.custom_id,
            r.batch_id,
            r.outcome.as_str(),
            r.raw_output,
            sdg_labels,
            labels.map(|l| l.sdg_malformed),
            labels.map(|l| l.ai_related),
            labels.map(|l| l.sentiment.as_str()),
            r.error,
            r.prompt_tokens.map(|t| t as i64),
            r.completion_tokens.map(|t| t as i64),
            r.updated_at,
        ])
        .map_err(|e| Error::Database(e.to_string()))?;
    Ok(())
}

fn chunk_to_sql(chunk_id: ChunkId) -> Result<i64> {
    i64::try_from(chunk_id.get())
        .map_err(|_| Error::InvalidInput(format!("chunk id {} out of range", chunk_id)))
}

/// Raw column values; converted to domain types outside the rusqlite closure
/// so conversion errors surface as our own errors.
struct StoredRow {
    company: String,
    year: u16,
    chunk_id: i64,
    custom_id: String,
    batch_id: String,
    outcome: String,
    raw_output: Option<String>,
    sdg_labels: Option<String>,
    sdg_malformed: Option<bool>,
    ai_related: Option<bool>,
    sentiment: Option<String>,
    error: Option<String>,
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    updated_at: String,
}

impl StoredRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            company: row.get("company")?,
            year: row.get("year")?,
            chunk_id: row.get("chunk_id")?,
            custom_id: row.get("custom_id")?,
            batch_id: row.get("batch_id")?,
            outcome: row.get("outcome")?,
            raw_output: row.get("raw_output")?,
            sdg_labels: row.get("sdg_labels")?,
            sdg_malformed: row.get("sdg_malformed")?,
            ai_related: row.get("ai_related")?,
            sentiment: row.get("sentiment")?,
            error: row.get("error")?,
            prompt_tokens: row.get("prompt_tokens")?,
            completion_tokens: row.get("completion_tokens")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_result(self) -> Result<ClassificationResult> {
        let labels = match (self.sdg_labels, self.sentiment) {
            (Some(sdg), Some(sentiment)) => Some(ParsedLabels {
                sdg_labels: serde_json::from_str(&sdg)?,
                sdg_malformed: self.sdg_malformed.unwrap_or(false),
                ai_related: self.ai_related.unwrap_or(false),
                sentiment: match sentiment.as_str() {
                    "Positive" => Sentiment::Positive,
                    "Negative" => Sentiment::Negative,
                    other => {
                        return Err(Error::Database(format!("unknown sentiment {:?}", other)))
                    }
                },
            }),
            _ => None,
        };
        Ok(ClassificationResult {
            document: DocumentId::new(self.company, self.year),
            chunk_id: ChunkId(self.chunk_id as u64),
            custom_id: self.custom_id,
            batch_id: self.batch_id,
            outcome: self.outcome.parse::<Outcome>()?,
            raw_output: self.raw_output,
            labels,
            error: self.error,
            prompt_tokens: self.prompt_tokens.map(|t| t as u64),
            completion_tokens: self.completion_tokens.map(|t| t as u64),
            updated_at: self.updated_at,
        })
    }
}
