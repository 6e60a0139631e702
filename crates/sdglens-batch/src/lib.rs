//! Batch classification against an asynchronous LLM batch API.
//!
//! Filtered sentences become chat-completion requests addressed by a
//! reversible custom_id, are chunked under provider limits and submitted,
//! polled to a terminal state, and merged idempotently into the result store.
//! Every step records its progress in the batch log so a run can stop at any
//! point and resume without re-submitting work.

pub mod builder;
pub mod custom_id;
pub mod merger;
pub mod openai;
pub mod parse;
pub mod pipeline;
pub mod poller;
pub mod prompt;
pub mod provider;
pub mod request;
pub mod retry;
pub mod submitter;

pub use builder::{chunk_requests, fingerprint, BatchBuilder, BuildOutput, ChunkLimits, RequestChunk};
pub use merger::{MergeReport, Merger};
pub use openai::OpenAiBatchClient;
pub use parse::parse_labels;
pub use pipeline::{build_requests, load_selections, BatchPipeline, RunReport, Selection, SelectionReport};
pub use poller::{CancelReport, PollOptions, PollReport, Poller, ReconcileReport};
pub use prompt::PromptTemplate;
pub use provider::{BatchApi, BatchInfo, BatchPage, CreateBatch};
pub use request::BatchRequest;
pub use retry::RetryPolicy;
pub use submitter::{SubmitReport, Submitter};
