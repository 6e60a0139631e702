//! Batch builder: filtered sentences → requests → provider-sized chunks.

use std::collections::{BTreeMap, HashSet};

use sdglens_core::{ChunkId, PipelineConfig, Result};
use sdglens_ingest::{Document, FilterResult};
use sdglens_store::MappingEntry;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::custom_id;
use crate::prompt::PromptTemplate;
use crate::request::BatchRequest;

/// Requests built for one document or one group of documents.
///
/// `requests` and `mapping` are parallel: entry `i` of the mapping
/// describes request `i`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOutput {
    pub requests: Vec<BatchRequest>,
    pub mapping: Vec<MappingEntry>,
    /// Selected chunk ids with no sentence in the document.
    pub missing: Vec<ChunkId>,
}

impl BuildOutput {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn extend(&mut self, other: BuildOutput) {
        self.requests.extend(other.requests);
        self.mapping.extend(other.mapping);
        self.missing.extend(other.missing);
    }
}

pub struct BatchBuilder {
    model: String,
    max_tokens: Option<u32>,
    prompt: PromptTemplate,
}

impl BatchBuilder {
    pub fn new(model: impl Into<String>, prompt: PromptTemplate) -> Self {
        Self {
            model: model.into(),
            max_tokens: None,
            prompt,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new(config.model.clone(), PromptTemplate::from_config(config)?)
            .with_max_tokens(config.max_tokens))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One request per selected sentence, in filter order.
    pub fn build(&self, document: &Document, selection: &FilterResult) -> BuildOutput {
        let mut out = BuildOutput::default();
        let mut seen = HashSet::new();
        let id = document.id();

        for hit in &selection.hits {
            if !seen.insert(hit.chunk_id) {
                continue;
            }
            let Some(sentence) = document.sentence(hit.chunk_id) else {
                out.missing.push(hit.chunk_id);
                continue;
            };
            let cid = custom_id::encode(id, hit.chunk_id);
            out.requests.push(BatchRequest::chat(
                cid.clone(),
                self.model.clone(),
                self.prompt.render(sentence),
                self.max_tokens,
            ));
            out.mapping.push(MappingEntry {
                custom_id: cid,
                company: id.company.clone(),
                year: id.year,
                chunk_id: hit.chunk_id,
                column: hit.column.clone(),
                score: hit.score,
            });
        }

        if !out.missing.is_empty() {
            warn!(
                "{}: {} selected sentences missing from splits",
                id,
                out.missing.len()
            );
        }
        debug!("{}: built {} requests", id, out.requests.len());
        out
    }

    /// Build every document and group the output per company, in sorted
    /// order.
    pub fn build_grouped<'a, I>(&self, inputs: I) -> BTreeMap<String, BuildOutput>
    where
        I: IntoIterator<Item = (&'a Document, &'a FilterResult)>,
    {
        let mut groups: BTreeMap<String, BuildOutput> = BTreeMap::new();
        let mut inputs: Vec<_> = inputs.into_iter().collect();
        inputs.sort_by(|a, b| a.0.id().cmp(b.0.id()));
        for (doc, selection) in inputs {
            let output = self.build(doc, selection);
            groups
                .entry(doc.id().company.clone())
                .or_default()
                .extend(output);
        }
        groups
    }
}

/// Provider limits per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    pub max_requests: usize,
    /// Upper bound on the JSONL size of one batch input file.
    pub max_bytes: usize,
}

impl ChunkLimits {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_requests: config.max_requests_per_batch.max(1),
            max_bytes: config.max_bytes_per_batch.max(1),
        }
    }
}

/// A run of consecutive requests that goes into one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestChunk {
    pub index: usize,
    pub requests: Vec<BatchRequest>,
    /// Exact batch input file content.
    pub jsonl: String,
}

impl RequestChunk {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.jsonl.len()
    }

    pub fn fingerprint(&self, model: &str) -> String {
        fingerprint(model, &self.jsonl)
    }
}

/// Greedy, order-preserving split of `requests` under `limits`.
///
/// A request whose line alone exceeds `max_bytes` is placed in a chunk of its
/// own.
pub fn chunk_requests(requests: Vec<BatchRequest>, limits: ChunkLimits) -> Result<Vec<RequestChunk>> {
    let max_requests = limits.max_requests.max(1);
    let mut chunks = Vec::new();
    let mut current = RequestChunk {
        index: 0,
        requests: Vec::new(),
        jsonl: String::new(),
    };

    for request in requests {
        let line = request.to_jsonl_line()?;
        let full = current.requests.len() >= max_requests
            || current.jsonl.len() + line.len() > limits.max_bytes;
        if full && !current.is_empty() {
            let index = current.index + 1;
            chunks.push(std::mem::replace(
                &mut current,
                RequestChunk {
                    index,
                    requests: Vec::new(),
                    jsonl: String::new(),
                },
            ));
        }
        if line.len() > limits.max_bytes {
            warn!(
                "Request {} is {} bytes, over the {} byte batch limit; submitting it alone",
                request.custom_id,
                line.len(),
                limits.max_bytes
            );
        }
        current.jsonl.push_str(&line);
        current.requests.push(request);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    Ok(chunks)
}

/// SHA-256 over the model name and the exact batch input bytes.
pub fn fingerprint(model: &str, jsonl: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(b"\n");
    hasher.update(jsonl.as_bytes());
    hex::encode(hasher.finalize())
}
