//! Scorer: sentence embeddings × keyword sets → score table.
//!
//! Similarity columns come first, in keyword-set order, followed by optional
//! `term_<keyword>` flag columns that are 1 when the lower-cased sentence
//! contains the AI term verbatim.

use ndarray::Array2;
use sdglens_core::{ChunkId, Error, Result};
use sdglens_ingest::{Document, ScoreTable};
use tracing::{debug, warn};

use crate::embedder::EmbeddingSource;
use crate::keywords::{KeywordKind, KeywordSet};
use crate::similarity::{cosine_matrix, round_to};

const ROUND_DECIMALS: i32 = 2;

/// Outcome of scoring one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreReport {
    pub scored: usize,
    /// Sentences the embedding source had no vector for.
    pub missing_embeddings: Vec<ChunkId>,
}

pub struct Scorer {
    sets: Vec<KeywordSet>,
    term_flags: bool,
}

impl Scorer {
    pub fn new(sets: Vec<KeywordSet>) -> Self {
        Self {
            sets,
            term_flags: false,
        }
    }

    /// Also emit exact-containment flag columns for AI terms.
    pub fn with_term_flags(mut self, enabled: bool) -> Self {
        self.term_flags = enabled;
        self
    }

    pub fn columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = self.sets.iter().flat_map(|s| s.columns()).collect();
        if self.term_flags {
            cols.extend(self.terms().map(|t| format!("term_{}", t)));
        }
        cols
    }

    fn terms(&self) -> impl Iterator<Item = String> + '_ {
        self.sets
            .iter()
            .filter(|s| s.kind == KeywordKind::Ai)
            .flat_map(|s| s.names.iter().map(|n| n.to_lowercase()))
    }

    /// Score every sentence of `doc` that `source` has an embedding for.
    pub fn score(&self, doc: &Document, source: &dyn EmbeddingSource) -> Result<(ScoreTable, ScoreReport)> {
        let mut table = ScoreTable::new(self.columns());
        let mut report = ScoreReport::default();

        let items: Vec<(ChunkId, &str)> = doc
            .sentences()
            .iter()
            .map(|(id, text)| (*id, text.as_str()))
            .collect();
        let vectors = source.embed_batch(&items);

        let mut ids = Vec::new();
        let mut texts = Vec::new();
        let mut flat = Vec::new();
        let dim = source.dimension();
        for ((id, text), vector) in items.iter().zip(vectors) {
            match vector {
                Some(v) if v.len() == dim => {
                    ids.push(*id);
                    texts.push(*text);
                    flat.extend(v.iter().copied());
                }
                Some(v) => {
                    return Err(Error::InvalidInput(format!(
                        "{} chunk {}: embedding dimension {} != {}",
                        doc.id(),
                        id,
                        v.len(),
                        dim
                    )))
                }
                None => report.missing_embeddings.push(*id),
            }
        }

        if !report.missing_embeddings.is_empty() {
            warn!(
                "{}: {} sentences have no embedding",
                doc.id(),
                report.missing_embeddings.len()
            );
        }
        if ids.is_empty() {
            return Ok((table, report));
        }

        let sentences = Array2::from_shape_vec((ids.len(), dim), flat)
            .map_err(|e| Error::Internal(e.to_string()))?;

        let mut per_set = Vec::with_capacity(self.sets.len());
        for set in &self.sets {
            if set.dimension() != dim {
                return Err(Error::InvalidInput(format!(
                    "keyword dimension {} != sentence dimension {}",
                    set.dimension(),
                    dim
                )));
            }
            per_set.push(cosine_matrix(&sentences, &set.matrix));
        }

        let terms: Vec<String> = if self.term_flags { self.terms().collect() } else { Vec::new() };

        for (row, id) in ids.iter().enumerate() {
            let mut values = Vec::with_capacity(table.columns.len());
            for m in &per_set {
                values.extend(m.row(row).iter().map(|v| round_to(*v, ROUND_DECIMALS)));
            }
            let lowered = texts[row].to_lowercase();
            values.extend(
                terms
                    .iter()
                    .map(|t| if lowered.contains(t.as_str()) { 1.0 } else { 0.0 }),
            );
            table.push(*id, values)?;
        }

        report.scored = ids.len();
        debug!("Scored {} sentences of {}", report.scored, doc.id());
        Ok((table, report))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use super::*;
    use crate::embedder::PrecomputedEmbeddings;
    use sdglens_core::DocumentId;

    fn keyword_sets() -> Vec<KeywordSet> {
        let mut sdg = HashMap::new();
        sdg.insert("7".to_string(), vec![1.0, 0.0, 0.0]);
        sdg.insert("13".to_string(), vec![0.0, 1.0, 0.0]);
        let mut ai = HashMap::new();
        ai.insert("Machine Learning".to_string(), vec![0.0, 0.0, 1.0]);
        vec![
            KeywordSet::from_map(KeywordKind::Sdg, sdg).unwrap(),
            KeywordSet::from_map(KeywordKind::Ai, ai).unwrap(),
        ]
    }

    #[test]
    fn test_score_document() {
        let mut sentences = BTreeMap::new();
        sentences.insert(ChunkId(0), "We build wind farms.".to_string());
        sentences.insert(ChunkId(1), "Machine learning improves forecasts.".to_string());
        sentences.insert(ChunkId(2), "No vector for this one.".to_string());
        let doc = Document::new(DocumentId::new("rwe", 2021), sentences);

        let mut vectors = HashMap::new();
        vectors.insert(ChunkId(0), vec![2.0, 0.0, 0.0]);
        vectors.insert(ChunkId(1), vec![0.0, 1.0, 1.0]);
        let source = PrecomputedEmbeddings::from_map(vectors).unwrap();

        let scorer = Scorer::new(keyword_sets()).with_term_flags(true);
        let (table, report) = scorer.score(&doc, &source).unwrap();

        assert_eq!(
            table.columns,
            vec!["sdg_7", "sdg_13", "Machine Learning", "term_machine learning"]
        );
        assert_eq!(report.scored, 2);
        assert_eq!(report.missing_embeddings, vec![ChunkId(2)]);
        assert_eq!(table.rows[0].values, vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(table.rows[1].values, vec![0.0, 0.71, 0.71, 1.0]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut sentences = BTreeMap::new();
        sentences.insert(ChunkId(0), "x".to_string());
        let doc = Document::new(DocumentId::new("a", 2020), sentences);
        let mut vectors = HashMap::new();
        vectors.insert(ChunkId(0), vec![1.0, 0.0]);
        let source = PrecomputedEmbeddings::from_map(vectors).unwrap();
        assert!(Scorer::new(keyword_sets()).score(&doc, &source).is_err());
    }
}
