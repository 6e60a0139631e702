//! Provider batch API seam.

use std::collections::HashMap;

use async_trait::async_trait;
use sdglens_core::{BatchStatus, Result};
use sdglens_store::RequestCounts;
use serde::{Deserialize, Serialize};

/// Metadata key carrying the chunk fingerprint on every batch we create.
pub const FINGERPRINT_KEY: &str = "fingerprint";
pub const GROUP_KEY: &str = "group";

/// A batch as the provider reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInfo {
    pub id: String,
    pub status: BatchStatus,
    #[serde(default)]
    pub input_file_id: Option<String>,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub error_file_id: Option<String>,
    #[serde(default)]
    pub request_counts: Option<RequestCounts>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl BatchInfo {
    pub fn fingerprint(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(FINGERPRINT_KEY))
            .map(String::as_str)
    }
}

/// One page of `list_batches`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchPage {
    pub data: Vec<BatchInfo>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub last_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateBatch {
    pub input_file_id: String,
    pub endpoint: String,
    pub completion_window: String,
    pub metadata: HashMap<String, String>,
}

/// The calls the pipeline needs from an asynchronous batch API.
#[async_trait]
pub trait BatchApi: Send + Sync {
    /// Upload a batch input file; returns the provider file id.
    async fn upload_file(&self, file_name: &str, content: Vec<u8>) -> Result<String>;

    async fn create_batch(&self, request: &CreateBatch) -> Result<BatchInfo>;

    async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchInfo>;

    async fn cancel_batch(&self, batch_id: &str) -> Result<BatchInfo>;

    /// Newest first. `after` is the last id of the previous page.
    async fn list_batches(&self, limit: usize, after: Option<&str>) -> Result<BatchPage>;

    async fn file_content(&self, file_id: &str) -> Result<Vec<u8>>;
}
