//! Threshold filter: keep sentences whose score strictly exceeds the
//! threshold in at least one keyword column.

use std::collections::HashSet;

use sdglens_core::ChunkId;
use serde::{Deserialize, Serialize};

use crate::scores::ScoreTable;

/// A selected sentence and the first column that pushed it over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterHit {
    pub chunk_id: ChunkId,
    pub column: String,
    pub score: f32,
}

/// Selected sentences of one document, ordered by chunk id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterResult {
    pub threshold: f32,
    pub hits: Vec<FilterHit>,
}

impl FilterResult {
    pub fn chunk_ids(&self) -> impl Iterator<Item = ChunkId> + '_ {
        self.hits.iter().map(|h| h.chunk_id)
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Select `{c : ∃ column k. score(c, k) > threshold}`.
///
/// NaN never passes. A chunk appearing in several rows is selected at most
/// once, from its first row.
pub fn filter(table: &ScoreTable, threshold: f32) -> FilterResult {
    let mut seen = HashSet::new();
    let mut hits = Vec::new();

    for row in &table.rows {
        if seen.contains(&row.chunk_id) {
            continue;
        }
        seen.insert(row.chunk_id);
        let first = row
            .values
            .iter()
            .enumerate()
            .find(|(_, v)| **v > threshold);
        if let Some((col, score)) = first {
            hits.push(FilterHit {
                chunk_id: row.chunk_id,
                column: table.columns[col].clone(),
                score: *score,
            });
        }
    }

    hits.sort_by_key(|h| h.chunk_id);
    FilterResult { threshold, hits }
}
