//! Per-batch mapping files: one JSONL line per request, tying its custom_id
//! back to the sentence it was built from.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use sdglens_core::{ChunkId, DocumentId, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub custom_id: String,
    pub company: String,
    pub year: u16,
    pub chunk_id: ChunkId,
    /// Score column that selected the sentence.
    pub column: String,
    pub score: f32,
}

impl MappingEntry {
    pub fn document(&self) -> DocumentId {
        DocumentId::new(self.company.clone(), self.year)
    }
}

/// Write a mapping file, one entry per line, in the given order.
pub fn write_mapping(path: &Path, entries: &[MappingEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(std::fs::File::create(path)?);
    for entry in entries {
        serde_json::to_writer(&mut out, entry)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Lookup table loaded from one or more mapping files.
#[derive(Debug, Default)]
pub struct MappingIndex {
    entries: HashMap<String, MappingEntry>,
    order: Vec<String>,
    malformed: usize,
}

impl MappingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a mapping file. Unparseable lines are skipped and counted.
    pub fn load(path: &Path) -> Result<Self> {
        let mut index = Self::new();
        index.extend_from(path)?;
        Ok(index)
    }

    pub fn extend_from(&mut self, path: &Path) -> Result<()> {
        let reader = BufReader::new(std::fs::File::open(path)?);
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MappingEntry>(&line) {
                Ok(entry) => self.insert(entry),
                Err(e) => {
                    warn!("{}:{}: bad mapping line: {}", path.display(), n + 1, e);
                    self.malformed += 1;
                }
            }
        }
        Ok(())
    }

    /// First entry for a custom_id wins.
    pub fn insert(&mut self, entry: MappingEntry) {
        if !self.entries.contains_key(&entry.custom_id) {
            self.order.push(entry.custom_id.clone());
            self.entries.insert(entry.custom_id.clone(), entry);
        }
    }

    pub fn get(&self, custom_id: &str) -> Option<&MappingEntry> {
        self.entries.get(custom_id)
    }

    /// Entries in file order.
    pub fn iter(&self) -> impl Iterator<Item = &MappingEntry> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn malformed(&self) -> usize {
        self.malformed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(custom_id: &str, chunk: u64) -> MappingEntry {
        MappingEntry {
            custom_id: custom_id.into(),
            company: "e.on".into(),
            year: 2014,
            chunk_id: ChunkId(chunk),
            column: "sdg_7".into(),
            score: 0.61,
        }
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings").join("abc.jsonl");
        let entries = vec![entry("sdg1~e.on~2014~3", 3), entry("sdg1~e.on~2014~1", 1)];
        write_mapping(&path, &entries).unwrap();

        let index = MappingIndex::load(&path).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.malformed(), 0);
        assert_eq!(index.get("sdg1~e.on~2014~1").unwrap().chunk_id, ChunkId(1));
        assert_eq!(
            index.get("sdg1~e.on~2014~3").unwrap().document(),
            DocumentId::new("e.on", 2014)
        );
        let ids: Vec<&str> = index.iter().map(|e| e.custom_id.as_str()).collect();
        assert_eq!(ids, vec!["sdg1~e.on~2014~3", "sdg1~e.on~2014~1"]);
    }

    #[test]
    fn test_bad_lines_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.jsonl");
        let good = serde_json::to_string(&entry("sdg1~e.on~2014~0", 0)).unwrap();
        std::fs::write(&path, format!("{}\n{{\"custom_id\": 5}}\n\nnot json\n", good)).unwrap();

        let index = MappingIndex::load(&path).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.malformed(), 2);
    }
}
