//! SDGLens Infer: keyword embedding sets, cosine similarity and the Scorer
//! that turns sentence embeddings into a score table.
//!
//! Sentence embeddings are produced outside this workspace by the embedding
//! model and handed in through the `EmbeddingSource` trait; the default
//! source reads a precomputed `embeddings.json` per document.

pub mod embedder;
pub mod keywords;
pub mod scorer;
pub mod similarity;

pub use embedder::{EmbeddingSource, PrecomputedEmbeddings};
pub use keywords::{KeywordKind, KeywordSet};
pub use scorer::{ScoreReport, Scorer};
