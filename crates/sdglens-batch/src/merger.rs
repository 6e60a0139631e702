//! Merger: downloads finished batch outputs and upserts one result per
//! sentence into the result store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sdglens_core::{
    ChunkId, ClassificationResult, DocumentId, Outcome, Result,
};
use sdglens_store::{BatchLog, BatchLogEntry, MappingIndex, ResultStore};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::custom_id;
use crate::parse::parse_labels;
use crate::provider::BatchApi;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub batches: usize,
    pub parsed: usize,
    pub parse_failures: usize,
    pub request_failed: usize,
    /// Records whose custom_id could not be tied to exactly one sentence.
    pub unattributable: usize,
    /// Output lines that were not valid JSON records.
    pub malformed_lines: usize,
}

impl MergeReport {
    pub fn stored(&self) -> usize {
        self.parsed + self.parse_failures + self.request_failed
    }

    fn add(&mut self, other: &MergeReport) {
        self.batches += other.batches;
        self.parsed += other.parsed;
        self.parse_failures += other.parse_failures;
        self.request_failed += other.request_failed;
        self.unattributable += other.unattributable;
        self.malformed_lines += other.malformed_lines;
    }
}

pub struct Merger {
    api: Arc<dyn BatchApi>,
    log: Arc<BatchLog>,
    store: Arc<dyn ResultStore>,
    results_dir: PathBuf,
    retry: RetryPolicy,
}

impl Merger {
    pub fn new(
        api: Arc<dyn BatchApi>,
        log: Arc<BatchLog>,
        store: Arc<dyn ResultStore>,
        results_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api,
            log,
            store,
            results_dir: results_dir.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Merge every terminal batch that has output and is not merged yet.
    /// A batch that fails to merge is logged and left for the next run.
    pub async fn merge_ready(&self) -> Result<MergeReport> {
        let mut total = MergeReport::default();
        for entry in self.log.ready_to_merge() {
            let batch_id = entry.batch_id.clone().unwrap_or_default();
            match self.merge_entry(&entry).await {
                Ok(report) => total.add(&report),
                Err(e) => warn!("Batch {}: merge failed: {}", batch_id, e),
            }
        }
        info!(
            "Merged {} batches: {} parsed, {} parse failures, {} request failures, {} unattributable, {} malformed lines",
            total.batches,
            total.parsed,
            total.parse_failures,
            total.request_failed,
            total.unattributable,
            total.malformed_lines
        );
        Ok(total)
    }

    /// Download and merge one batch, then mark it done.
    pub async fn merge_entry(&self, entry: &BatchLogEntry) -> Result<MergeReport> {
        let Some(batch_id) = entry.batch_id.as_deref() else {
            return Ok(MergeReport::default());
        };
        let mapping = load_mapping(&entry.mapping_path);

        let mut report = MergeReport {
            batches: 1,
            ..Default::default()
        };
        // Errors first so a successful line for the same id wins.
        if let Some(file_id) = &entry.error_file_id {
            let path = self.download(batch_id, file_id, "errors").await?;
            merge_output_file(&path, batch_id, &mapping, self.store.as_ref(), &mut report)?;
        }
        if let Some(file_id) = &entry.output_file_id {
            let path = self.download(batch_id, file_id, "output").await?;
            merge_output_file(&path, batch_id, &mapping, self.store.as_ref(), &mut report)?;
        }

        self.log.update_by_batch_id(batch_id, |e| e.done = true)?;
        info!(
            "Batch {}: {} results stored, {} unattributable",
            batch_id,
            report.stored(),
            report.unattributable
        );
        Ok(report)
    }

    /// Fetch `<batch_id>_<kind>.jsonl`, reusing an earlier download.
    pub async fn download(&self, batch_id: &str, file_id: &str, kind: &str) -> Result<PathBuf> {
        let path = self.results_dir.join(format!("{}_{}.jsonl", batch_id, kind));
        if path.is_file() {
            debug!("Reusing {}", path.display());
            return Ok(path);
        }
        let content = self
            .retry
            .run("download file", || self.api.file_content(file_id))
            .await?;
        std::fs::create_dir_all(&self.results_dir)?;
        let mut tmp = path.clone().into_os_string();
        tmp.push(".part");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, &content)?;
        std::fs::rename(&tmp, &path)?;
        info!("Saved {} ({} bytes)", path.display(), content.len());
        Ok(path)
    }
}

fn load_mapping(path: &Path) -> MappingIndex {
    match MappingIndex::load(path) {
        Ok(index) => index,
        Err(e) => {
            warn!(
                "{}: mapping unavailable ({}), attributing by custom_id alone",
                path.display(),
                e
            );
            MappingIndex::new()
        }
    }
}

/// Resolve a custom_id to its sentence.
///
/// The mapping entry is preferred; the decoded id is the fallback. When both
/// exist they must agree.
pub fn attribute(custom_id: &str, mapping: &MappingIndex) -> Option<(DocumentId, ChunkId)> {
    let decoded = custom_id::decode(custom_id).ok();
    let found = match (mapping.get(custom_id), decoded) {
        (Some(m), Some(d)) => {
            let mapped = (m.document(), m.chunk_id);
            if mapped == d {
                Some(d)
            } else {
                None
            }
        }
        (Some(m), None) => Some((m.document(), m.chunk_id)),
        (None, decoded) => decoded,
    };
    found.filter(|(_, chunk_id)| chunk_id.get() <= ChunkId::MAX)
}

/// Merge one downloaded output or error file into `store`.
pub fn merge_output_file(
    path: &Path,
    batch_id: &str,
    mapping: &MappingIndex,
    store: &dyn ResultStore,
    report: &mut MergeReport,
) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    let now = chrono::Utc::now().to_rfc3339();
    let mut results = Vec::new();

    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!("{}:{}: malformed line: {}", path.display(), n + 1, e);
                report.malformed_lines += 1;
                continue;
            }
        };
        let Some(cid) = record["custom_id"].as_str() else {
            warn!("{}:{}: line has no custom_id", path.display(), n + 1);
            report.malformed_lines += 1;
            continue;
        };
        let Some((document, chunk_id)) = attribute(cid, mapping) else {
            warn!("{}:{}: unattributable custom_id {:?}", path.display(), n + 1, cid);
            report.unattributable += 1;
            continue;
        };

        let result = interpret(&record, document, chunk_id, cid, batch_id, &now);
        match result.outcome {
            Outcome::Parsed => report.parsed += 1,
            Outcome::ParseFailure => report.parse_failures += 1,
            Outcome::RequestFailed => report.request_failed += 1,
        }
        results.push(result);
    }

    store.upsert_many(&results)?;
    debug!("{}: {} records merged", path.display(), results.len());
    Ok(())
}

/// Turn one output record into a result for its sentence.
fn interpret(
    record: &Value,
    document: DocumentId,
    chunk_id: ChunkId,
    cid: &str,
    batch_id: &str,
    now: &str,
) -> ClassificationResult {
    let response = &record["response"];
    let status = response["status_code"].as_u64();
    let body = &response["body"];
    let usage = &body["usage"];

    let mut result = ClassificationResult {
        document,
        chunk_id,
        custom_id: cid.to_string(),
        batch_id: batch_id.to_string(),
        outcome: Outcome::RequestFailed,
        raw_output: None,
        labels: None,
        error: None,
        prompt_tokens: usage["prompt_tokens"].as_u64(),
        completion_tokens: usage["completion_tokens"].as_u64(),
        updated_at: now.to_string(),
    };

    let content = body["choices"][0]["message"]["content"].as_str();
    match (status, content) {
        (Some(200), Some(text)) if record["error"].is_null() => {
            result.raw_output = Some(text.to_string());
            match parse_labels(text) {
                Ok(labels) => {
                    result.outcome = Outcome::Parsed;
                    result.labels = Some(labels);
                }
                Err(e) => {
                    result.outcome = Outcome::ParseFailure;
                    result.error = Some(e.to_string());
                }
            }
        }
        _ => result.error = Some(error_text(record, status)),
    }
    result
}

fn error_text(record: &Value, status: Option<u64>) -> String {
    let candidates = [
        &record["error"]["message"],
        &record["response"]["body"]["error"]["message"],
    ];
    if let Some(msg) = candidates.iter().find_map(|v| v.as_str()) {
        return match status {
            Some(code) => format!("{}: {}", code, msg),
            None => msg.to_string(),
        };
    }
    match status {
        Some(200) => "response has no message content".to_string(),
        Some(code) => format!("request failed with status {}", code),
        None => "request failed without a response".to_string(),
    }
}
