//! Submitter: writes each chunk to disk, records it, then hands it to the
//! provider.
//!
//! Order per chunk: input + mapping files, a `created` log entry, upload,
//! batch creation, then the batch id with `validating`. A chunk whose
//! fingerprint is already logged past `created` is never submitted again.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use sdglens_core::{BatchStatus, DataPaths, PipelineConfig, Result};
use sdglens_store::{write_mapping, BatchLog, BatchLogEntry, MappingEntry};
use tracing::{debug, info, warn};

use crate::builder::{chunk_requests, BuildOutput, ChunkLimits, RequestChunk};
use crate::provider::{BatchApi, CreateBatch, FINGERPRINT_KEY, GROUP_KEY};
use crate::request::CHAT_COMPLETIONS_URL;
use crate::retry::RetryPolicy;

/// Outcome of one submission pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitReport {
    /// Batch ids created in this pass.
    pub submitted: Vec<String>,
    /// Chunks already submitted earlier.
    pub skipped: usize,
    /// `(fingerprint, error)` for chunks left in `created`.
    pub failed: Vec<(String, String)>,
    pub requests: usize,
}

pub struct Submitter {
    api: Arc<dyn BatchApi>,
    log: Arc<BatchLog>,
    batches_dir: PathBuf,
    mappings_dir: PathBuf,
    model: String,
    completion_window: String,
    retry: RetryPolicy,
}

impl Submitter {
    pub fn new(
        api: Arc<dyn BatchApi>,
        log: Arc<BatchLog>,
        paths: &DataPaths,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            api,
            log,
            batches_dir: paths.batches.clone(),
            mappings_dir: paths.mappings.clone(),
            model: config.model.clone(),
            completion_window: config.completion_window.clone(),
            retry: RetryPolicy::new(config.retry_attempts),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Chunk and submit every group, groups in key order.
    pub async fn submit_groups(
        &self,
        groups: &BTreeMap<String, BuildOutput>,
        limits: ChunkLimits,
    ) -> Result<SubmitReport> {
        let mut report = SubmitReport::default();

        for (group, output) in groups {
            if output.is_empty() {
                continue;
            }
            let mapping: HashMap<&str, &MappingEntry> = output
                .mapping
                .iter()
                .map(|m| (m.custom_id.as_str(), m))
                .collect();
            let chunks = chunk_requests(output.requests.clone(), limits)?;
            info!("{}: {} requests in {} chunks", group, output.len(), chunks.len());

            for chunk in &chunks {
                let entries: Vec<MappingEntry> = chunk
                    .requests
                    .iter()
                    .filter_map(|r| mapping.get(r.custom_id.as_str()).map(|m| (*m).clone()))
                    .collect();
                let fingerprint = chunk.fingerprint(&self.model);
                match self.submit_chunk(group, chunk, &entries).await {
                    Ok(Some(batch_id)) => {
                        report.requests += chunk.len();
                        report.submitted.push(batch_id);
                    }
                    Ok(None) => report.skipped += 1,
                    Err(e) => {
                        warn!("{} chunk {}: submission failed: {}", group, chunk.index, e);
                        let message = e.to_string();
                        self.log.update_by_fingerprint(&fingerprint, |entry| {
                            entry.last_error = Some(message.clone());
                        })?;
                        report.failed.push((fingerprint, message));
                    }
                }
            }
        }

        info!(
            "Submitted {} batches ({} requests), skipped {}, failed {}",
            report.submitted.len(),
            report.requests,
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }

    /// Submit one chunk. Returns `None` when it was already submitted.
    pub async fn submit_chunk(
        &self,
        group: &str,
        chunk: &RequestChunk,
        mapping: &[MappingEntry],
    ) -> Result<Option<String>> {
        let fingerprint = chunk.fingerprint(&self.model);
        if let Some(existing) = self.log.find_by_fingerprint(&fingerprint) {
            if existing.status != BatchStatus::Created {
                debug!(
                    "Chunk {} already submitted as {:?}, skipping",
                    fingerprint, existing.batch_id
                );
                return Ok(None);
            }
        }

        let file_name = format!("{}.jsonl", fingerprint);
        let input_path = self.batches_dir.join(&file_name);
        let mapping_path = self.mappings_dir.join(&file_name);
        std::fs::create_dir_all(&self.batches_dir)?;
        std::fs::write(&input_path, &chunk.jsonl)?;
        write_mapping(&mapping_path, mapping)?;

        self.log.record(BatchLogEntry::new(
            fingerprint.clone(),
            group,
            chunk.index,
            chunk.len(),
            chunk.bytes() as u64,
            input_path,
            mapping_path,
        ))?;

        let content = chunk.jsonl.as_bytes().to_vec();
        let file_id = self
            .retry
            .run("upload", || self.api.upload_file(&file_name, content.clone()))
            .await?;
        self.log.update_by_fingerprint(&fingerprint, |e| {
            e.input_file_id = Some(file_id.clone());
        })?;

        let request = CreateBatch {
            input_file_id: file_id,
            endpoint: CHAT_COMPLETIONS_URL.to_string(),
            completion_window: self.completion_window.clone(),
            metadata: HashMap::from([
                (FINGERPRINT_KEY.to_string(), fingerprint.clone()),
                (GROUP_KEY.to_string(), group.to_string()),
            ]),
        };
        let info = self
            .retry
            .run("create batch", || self.api.create_batch(&request))
            .await?;

        self.log.update_by_fingerprint(&fingerprint, |e| {
            e.batch_id = Some(info.id.clone());
            e.status = if info.status == BatchStatus::Created {
                BatchStatus::Validating
            } else {
                info.status
            };
            e.last_error = None;
        })?;
        info!(
            "{} chunk {}: {} requests submitted as {}",
            group,
            chunk.index,
            chunk.len(),
            info.id
        );
        Ok(Some(info.id))
    }
}
