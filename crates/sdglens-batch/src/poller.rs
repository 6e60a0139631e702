//! Poller: tracks provider batches to a terminal state, cancels on request,
//! and reconciles the local log with what the provider knows.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use sdglens_core::{BatchStatus, PipelineConfig, Result};
use sdglens_store::{BatchLog, BatchLogEntry, MappingIndex};
use tracing::{debug, info, warn};

use crate::provider::{BatchApi, BatchInfo};
use crate::retry::RetryPolicy;

const LIST_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    /// Give up waiting after this long; unfinished batches stay resumable.
    pub timeout: Duration,
}

impl PollOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            timeout: config.poll_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollReport {
    /// Batches that reached a terminal state, with that state.
    pub finished: Vec<(String, BatchStatus)>,
    /// Batches still running when polling stopped.
    pub still_running: Vec<String>,
    pub rounds: usize,
    pub errors: usize,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CancelReport {
    pub requested: Vec<String>,
    /// Already terminal or unknown locally.
    pub skipped: Vec<String>,
    pub errors: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Known batch ids re-queried successfully.
    pub refreshed: usize,
    /// Entries recreated from mapping files.
    pub rebuilt: usize,
    /// `created` entries matched to a remote batch by fingerprint.
    pub adopted: usize,
    pub errors: usize,
}

pub struct Poller {
    api: Arc<dyn BatchApi>,
    log: Arc<BatchLog>,
    retry: RetryPolicy,
}

impl Poller {
    pub fn new(api: Arc<dyn BatchApi>, log: Arc<BatchLog>) -> Self {
        Self {
            api,
            log,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch the current state of one batch and record it.
    pub async fn refresh(&self, batch_id: &str) -> Result<BatchInfo> {
        let info = self
            .retry
            .run("retrieve batch", || self.api.retrieve_batch(batch_id))
            .await?;
        let updated = self
            .log
            .update_by_batch_id(batch_id, |entry| apply_info(entry, &info))?;
        if updated.is_none() {
            warn!("Batch {} is not in the batch log", batch_id);
        }
        Ok(info)
    }

    /// Poll every running batch in the log.
    pub async fn poll_pending(&self, options: PollOptions) -> Result<PollReport> {
        let ids = self
            .log
            .pending()
            .into_iter()
            .filter_map(|e| e.batch_id)
            .collect();
        self.poll(ids, options).await
    }

    /// Poll `batch_ids` until all are terminal or the timeout passes.
    ///
    /// Batches the log already records as terminal are not polled. Each round
    /// queries the remaining batches concurrently.
    pub async fn poll(&self, batch_ids: Vec<String>, options: PollOptions) -> Result<PollReport> {
        let mut report = PollReport::default();
        let mut seen = HashSet::new();
        let mut pending: Vec<String> = Vec::new();
        for id in batch_ids {
            if !seen.insert(id.clone()) {
                continue;
            }
            match self.log.find_by_batch_id(&id) {
                Some(entry) if entry.status.is_terminal() => {
                    report.finished.push((id, entry.status));
                }
                _ => pending.push(id),
            }
        }

        let started = Instant::now();
        while !pending.is_empty() {
            report.rounds += 1;
            let results = join_all(pending.iter().map(|id| self.refresh(id))).await;

            let mut next = Vec::new();
            for (id, result) in pending.into_iter().zip(results) {
                match result {
                    Ok(info) if info.status.is_terminal() => {
                        info!("Batch {} finished: {}", id, info.status);
                        report.finished.push((id, info.status));
                    }
                    Ok(info) => {
                        debug!("Batch {}: {}{}", id, info.status, counts_suffix(&info));
                        next.push(id);
                    }
                    Err(e) => {
                        warn!("Batch {}: poll failed: {}", id, e);
                        report.errors += 1;
                        next.push(id);
                    }
                }
            }
            pending = next;

            if pending.is_empty() {
                break;
            }
            if started.elapsed() + options.interval > options.timeout {
                warn!(
                    "Polling timed out after {:?} with {} batches still running",
                    started.elapsed(),
                    pending.len()
                );
                report.timed_out = true;
                break;
            }
            tokio::time::sleep(options.interval).await;
        }

        report.still_running = pending;
        Ok(report)
    }

    /// Ask the provider to cancel running batches.
    ///
    /// Only `cancel_requested` is recorded; the status changes when a later
    /// poll observes it.
    pub async fn cancel(&self, batch_ids: &[String]) -> Result<CancelReport> {
        let mut report = CancelReport::default();
        for id in batch_ids {
            let status = match self.log.find_by_batch_id(id) {
                Some(entry) => entry.status,
                None => {
                    warn!("Batch {} is not in the batch log, not cancelling", id);
                    report.skipped.push(id.clone());
                    continue;
                }
            };
            if !status.is_running() || status == BatchStatus::Cancelling {
                debug!("Batch {} is {}, skip cancel", id, status);
                report.skipped.push(id.clone());
                continue;
            }
            match self
                .retry
                .run("cancel batch", || self.api.cancel_batch(id))
                .await
            {
                Ok(_) => {
                    self.log
                        .update_by_batch_id(id, |e| e.cancel_requested = true)?;
                    info!("Batch {}: cancel sent", id);
                    report.requested.push(id.clone());
                }
                Err(e) => {
                    warn!("Batch {}: cancel failed: {}", id, e);
                    report.errors.push((id.clone(), e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Bring the log in line with the provider.
    ///
    /// Re-queries every known batch id, recreates entries for mapping files
    /// the log has lost, and adopts `created` entries whose fingerprint
    /// appears in a remote batch's metadata.
    pub async fn reconcile(&self, batches_dir: &Path, mappings_dir: &Path) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let known: Vec<String> = self
            .log
            .entries()
            .into_iter()
            .filter_map(|e| e.batch_id)
            .collect();
        let results = join_all(known.iter().map(|id| self.refresh(id))).await;
        for (id, result) in known.iter().zip(results) {
            match result {
                Ok(_) => report.refreshed += 1,
                Err(e) => {
                    warn!("Batch {}: refresh failed: {}", id, e);
                    report.errors += 1;
                }
            }
        }

        report.rebuilt = self.rebuild_from_mappings(batches_dir, mappings_dir)?;

        report.adopted = self.adopt_logged_orphans().await?;

        info!(
            "Reconciled batch log: {} refreshed, {} rebuilt, {} adopted, {} errors",
            report.refreshed, report.rebuilt, report.adopted, report.errors
        );
        Ok(report)
    }

    /// Adopt every `created` entry in the log that the provider already has
    /// a batch for.
    pub async fn adopt_logged_orphans(&self) -> Result<usize> {
        let orphans: HashSet<String> = self
            .log
            .orphans()
            .into_iter()
            .map(|e| e.fingerprint)
            .collect();
        if orphans.is_empty() {
            return Ok(0);
        }
        let adopted = self.adopt_orphans(&orphans).await?;
        if adopted > 0 {
            info!("Adopted {} previously created batches", adopted);
        }
        Ok(adopted)
    }

    /// Match `created` entries to remote batches by fingerprint metadata.
    pub async fn adopt_orphans(&self, fingerprints: &HashSet<String>) -> Result<usize> {
        let mut remote: HashMap<String, BatchInfo> = HashMap::new();
        let mut after: Option<String> = None;
        loop {
            let page = self
                .retry
                .run("list batches", || {
                    self.api.list_batches(LIST_PAGE_SIZE, after.as_deref())
                })
                .await?;
            for info in page.data.iter() {
                if let Some(fp) = info.fingerprint() {
                    // Listing is newest first; keep the newest batch per chunk.
                    if fingerprints.contains(fp) && !remote.contains_key(fp) {
                        remote.insert(fp.to_string(), info.clone());
                    }
                }
            }
            if !page.has_more || remote.len() == fingerprints.len() {
                break;
            }
            match page.last_id.or_else(|| page.data.last().map(|b| b.id.clone())) {
                Some(last) => after = Some(last),
                None => break,
            }
        }

        let mut adopted = 0;
        for (fp, info) in remote {
            let updated = self.log.update_by_fingerprint(&fp, |e| {
                e.batch_id = Some(info.id.clone());
                apply_info(e, &info);
            })?;
            if updated.is_some() {
                info!("Adopted batch {} for chunk {}", info.id, fp);
                adopted += 1;
            }
        }
        Ok(adopted)
    }

    /// Recreate `created` entries for mapping files with no log entry.
    fn rebuild_from_mappings(&self, batches_dir: &Path, mappings_dir: &Path) -> Result<usize> {
        if !mappings_dir.is_dir() {
            return Ok(0);
        }
        let mut files: Vec<_> = std::fs::read_dir(mappings_dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().map(|x| x == "jsonl").unwrap_or(false))
            .collect();
        files.sort();

        let mut rebuilt = 0;
        for mapping_path in files {
            let Some(fingerprint) = mapping_path.file_stem().map(|s| s.to_string_lossy().to_string())
            else {
                continue;
            };
            if self.log.find_by_fingerprint(&fingerprint).is_some() {
                continue;
            }
            let index = match MappingIndex::load(&mapping_path) {
                Ok(index) => index,
                Err(e) => {
                    warn!("{}: unreadable mapping file: {}", mapping_path.display(), e);
                    continue;
                }
            };
            let group = index
                .iter()
                .next()
                .map(|m| m.company.clone())
                .unwrap_or_default();
            let input_path = batches_dir.join(format!("{}.jsonl", fingerprint));
            let bytes = std::fs::metadata(&input_path).map(|m| m.len()).unwrap_or(0);
            self.log.record(BatchLogEntry::new(
                fingerprint,
                group,
                0,
                index.len(),
                bytes,
                input_path,
                mapping_path,
            ))?;
            rebuilt += 1;
        }
        if rebuilt > 0 {
            info!("Rebuilt {} batch log entries from mapping files", rebuilt);
        }
        Ok(rebuilt)
    }
}

/// Copy provider-reported state onto a log entry.
pub fn apply_info(entry: &mut BatchLogEntry, info: &BatchInfo) {
    entry.status = info.status;
    if info.input_file_id.is_some() {
        entry.input_file_id = info.input_file_id.clone();
    }
    if info.output_file_id.is_some() {
        entry.output_file_id = info.output_file_id.clone();
    }
    if info.error_file_id.is_some() {
        entry.error_file_id = info.error_file_id.clone();
    }
    if info.request_counts.is_some() {
        entry.request_counts = info.request_counts;
    }
}

fn counts_suffix(info: &BatchInfo) -> String {
    match info.request_counts {
        Some(c) => format!(" | {}/{} done, {} failed", c.completed, c.total, c.failed),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdglens_store::RequestCounts;

    fn info(status: BatchStatus) -> BatchInfo {
        BatchInfo {
            id: "batch_1".into(),
            status,
            input_file_id: None,
            output_file_id: Some("file-out".into()),
            error_file_id: None,
            request_counts: Some(RequestCounts { total: 3, completed: 3, failed: 0 }),
            metadata: None,
            created_at: None,
        }
    }

    #[test]
    fn test_apply_info_keeps_known_ids() {
        let mut entry = BatchLogEntry::new("fp", "g", 0, 3, 10, "a".into(), "b".into());
        entry.input_file_id = Some("file-in".into());
        apply_info(&mut entry, &info(BatchStatus::Completed));
        assert_eq!(entry.status, BatchStatus::Completed);
        assert_eq!(entry.input_file_id.as_deref(), Some("file-in"));
        assert_eq!(entry.output_file_id.as_deref(), Some("file-out"));
        assert_eq!(entry.request_counts.unwrap().completed, 3);
    }

    #[test]
    fn test_counts_suffix() {
        assert_eq!(counts_suffix(&info(BatchStatus::InProgress)), " | 3/3 done, 0 failed");
    }
}
