//! Score tables: one row per sentence, one column per keyword.
//!
//! CSV layout: header `sentence_id,<column>...`, first field of each row is
//! the chunk id, remaining fields are similarity scores in [-1, 1] or term
//! flags in {0, 1}. Empty cells read as NaN.

use std::io::{Read, Write};
use std::path::Path;

use sdglens_core::{ChunkId, Error, Result};

pub const ID_COLUMN: &str = "sentence_id";

/// Scores of one sentence against every keyword column.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRow {
    pub chunk_id: ChunkId,
    pub values: Vec<f32>,
}

/// All score rows of one document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScoreTable {
    pub columns: Vec<String>,
    pub rows: Vec<ScoreRow>,
}

impl ScoreTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row; its width must match the column count.
    pub fn push(&mut self, chunk_id: ChunkId, values: Vec<f32>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(Error::InvalidInput(format!(
                "row {} has {} values, table has {} columns",
                chunk_id,
                values.len(),
                self.columns.len()
            )));
        }
        self.rows.push(ScoreRow { chunk_id, values });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Read a table from any CSV source.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers = rdr.headers()?.clone();
        if headers.is_empty() {
            return Err(Error::InvalidInput("score table has no header".into()));
        }
        let columns: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();
        let mut table = ScoreTable::new(columns);

        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            let raw_id = record.get(0).unwrap_or("").trim();
            let chunk_id = parse_row_id(raw_id).ok_or_else(|| {
                Error::InvalidInput(format!("row {}: bad sentence id {:?}", line + 1, raw_id))
            })?;
            let values: Vec<f32> = record
                .iter()
                .skip(1)
                .map(|cell| {
                    let cell = cell.trim();
                    if cell.is_empty() {
                        Ok(f32::NAN)
                    } else {
                        cell.parse::<f32>().map_err(|_| {
                            Error::InvalidInput(format!("row {}: bad score {:?}", line + 1, cell))
                        })
                    }
                })
                .collect::<Result<_>>()?;
            table.push(chunk_id, values)?;
        }
        Ok(table)
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header = vec![ID_COLUMN.to_string()];
        header.extend(self.columns.iter().cloned());
        wtr.write_record(&header)?;
        for row in &self.rows {
            let mut record = vec![row.chunk_id.to_string()];
            record.extend(row.values.iter().map(|v| v.to_string()));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        self.to_writer(file)
    }
}

/// Sentence ids sometimes come back from spreadsheet tooling as `"12.0"`.
fn parse_row_id(raw: &str) -> Option<ChunkId> {
    if let Ok(id) = raw.parse::<ChunkId>() {
        return Some(id);
    }
    let f: f64 = raw.parse().ok()?;
    if f >= 0.0 && f.fract() == 0.0 && f < ChunkId::MAX as f64 {
        Some(ChunkId(f as u64))
    } else {
        None
    }
}
