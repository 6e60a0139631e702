//! Sentence embedding sources.
//!
//! The `EmbeddingSource` trait abstracts over where sentence vectors come
//! from. `PrecomputedEmbeddings` serves vectors written by the external
//! embedding model as `{ "<chunk_id>": [f32, ...] }`.

use std::collections::HashMap;
use std::path::Path;

use ndarray::Array1;
use sdglens_core::{ChunkId, Error, Result};

/// Trait for sentence embedding backends.
pub trait EmbeddingSource: Send + Sync {
    /// Embedding for one sentence. Returns None if unavailable.
    fn embed(&self, chunk_id: ChunkId, text: &str) -> Option<Array1<f32>>;

    /// Embeddings for a batch of sentences.
    fn embed_batch(&self, items: &[(ChunkId, &str)]) -> Vec<Option<Array1<f32>>> {
        items.iter().map(|(id, t)| self.embed(*id, t)).collect()
    }

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;
}

/// Vectors loaded from a per-document `embeddings.json`.
pub struct PrecomputedEmbeddings {
    vectors: HashMap<ChunkId, Array1<f32>>,
    dim: usize,
}

impl PrecomputedEmbeddings {
    pub fn from_map(map: HashMap<ChunkId, Vec<f32>>) -> Result<Self> {
        let mut dim = None;
        let mut vectors = HashMap::with_capacity(map.len());
        for (id, v) in map {
            match dim {
                None => dim = Some(v.len()),
                Some(d) if d != v.len() => {
                    return Err(Error::InvalidInput(format!(
                        "embedding for chunk {} has dimension {}, expected {}",
                        id,
                        v.len(),
                        d
                    )))
                }
                _ => {}
            }
            vectors.insert(id, Array1::from(v));
        }
        Ok(Self {
            vectors,
            dim: dim.unwrap_or(0),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let raw: HashMap<String, Vec<f32>> = serde_json::from_str(&content)?;
        let map = raw
            .into_iter()
            .map(|(k, v)| {
                k.parse::<ChunkId>()
                    .map(|id| (id, v))
                    .map_err(|_| Error::InvalidInput(format!("{}: bad chunk id {:?}", path.display(), k)))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        Self::from_map(map)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

impl EmbeddingSource for PrecomputedEmbeddings {
    fn embed(&self, chunk_id: ChunkId, _text: &str) -> Option<Array1<f32>> {
        self.vectors.get(&chunk_id).cloned()
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}
