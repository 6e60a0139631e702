//! Batch log: the durable record of every chunk handed to the provider.
//!
//! Stored as a JSON array in `batch_log.json`. Entries are keyed by chunk
//! fingerprint; the provider batch id is filled in once the batch exists.
//! Every mutation happens under the lock and is persisted with a
//! write-then-rename before the lock is released.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sdglens_core::{BatchStatus, Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Per-batch request counters as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounts {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}

/// One chunk of requests and what is known about its provider batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchLogEntry {
    pub fingerprint: String,
    #[serde(default)]
    pub batch_id: Option<String>,
    /// Requests are grouped per company before chunking.
    pub group: String,
    pub chunk_index: usize,
    pub requests: usize,
    pub bytes: u64,
    pub input_path: PathBuf,
    pub mapping_path: PathBuf,
    #[serde(default)]
    pub input_file_id: Option<String>,
    pub status: BatchStatus,
    /// Results of this batch have been merged into the result store.
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub error_file_id: Option<String>,
    #[serde(default)]
    pub request_counts: Option<RequestCounts>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl BatchLogEntry {
    /// A freshly written chunk the provider has not seen yet.
    pub fn new(
        fingerprint: impl Into<String>,
        group: impl Into<String>,
        chunk_index: usize,
        requests: usize,
        bytes: u64,
        input_path: PathBuf,
        mapping_path: PathBuf,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            fingerprint: fingerprint.into(),
            batch_id: None,
            group: group.into(),
            chunk_index,
            requests,
            bytes,
            input_path,
            mapping_path,
            input_file_id: None,
            status: BatchStatus::Created,
            done: false,
            cancel_requested: false,
            output_file_id: None,
            error_file_id: None,
            request_counts: None,
            last_error: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Known to the provider and still worth polling.
    pub fn is_pending(&self) -> bool {
        self.batch_id.is_some() && self.status.is_running()
    }

    /// Finished on the provider side, not merged yet, and something to merge.
    pub fn is_ready_to_merge(&self) -> bool {
        self.batch_id.is_some()
            && self.status.is_terminal()
            && !self.done
            && (self.output_file_id.is_some() || self.error_file_id.is_some())
    }
}

/// Summary counts for `status` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSummary {
    pub total: usize,
    pub created: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub expired: usize,
    pub merged: usize,
    pub requests: usize,
}

pub struct BatchLog {
    path: PathBuf,
    entries: Mutex<Vec<BatchLogEntry>>,
}

impl BatchLog {
    /// Open the log at `path`. A missing file is an empty log; an
    /// unparseable one is an error.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = read_entries(path)?;
        info!("BatchLog: {} entries loaded from {}", entries.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    /// Like [`BatchLog::open`], but a corrupt file is moved aside to
    /// `<path>.corrupt` and an empty log is started. Returns whether that
    /// happened so the caller can rebuild it.
    pub fn open_or_recover(path: &Path) -> Result<(Self, bool)> {
        match read_entries(path) {
            Ok(entries) => Ok((
                Self {
                    path: path.to_path_buf(),
                    entries: Mutex::new(entries),
                },
                false,
            )),
            Err(Error::Json(e)) => {
                let aside = corrupt_path(path);
                warn!(
                    "Batch log {} is unreadable ({}), moving it to {}",
                    path.display(),
                    e,
                    aside.display()
                );
                std::fs::rename(path, &aside)?;
                Ok((
                    Self {
                        path: path.to_path_buf(),
                        entries: Mutex::new(Vec::new()),
                    },
                    true,
                ))
            }
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Vec<BatchLogEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn find_by_fingerprint(&self, fingerprint: &str) -> Option<BatchLogEntry> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.fingerprint == fingerprint)
            .cloned()
    }

    pub fn find_by_batch_id(&self, batch_id: &str) -> Option<BatchLogEntry> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.batch_id.as_deref() == Some(batch_id))
            .cloned()
    }

    /// Insert an entry, replacing any entry with the same fingerprint.
    pub fn record(&self, entry: BatchLogEntry) -> Result<()> {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|e| e.fingerprint == entry.fingerprint) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        self.persist(&entries)
    }

    /// Apply `f` to the entry with this fingerprint and persist.
    pub fn update_by_fingerprint<F>(&self, fingerprint: &str, f: F) -> Result<Option<BatchLogEntry>>
    where
        F: FnOnce(&mut BatchLogEntry),
    {
        self.update_where(|e| e.fingerprint == fingerprint, f)
    }

    /// Apply `f` to the entry with this batch id and persist.
    pub fn update_by_batch_id<F>(&self, batch_id: &str, f: F) -> Result<Option<BatchLogEntry>>
    where
        F: FnOnce(&mut BatchLogEntry),
    {
        self.update_where(|e| e.batch_id.as_deref() == Some(batch_id), f)
    }

    fn update_where<P, F>(&self, pred: P, f: F) -> Result<Option<BatchLogEntry>>
    where
        P: Fn(&BatchLogEntry) -> bool,
        F: FnOnce(&mut BatchLogEntry),
    {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.iter_mut().find(|e| pred(e)) else {
            return Ok(None);
        };
        f(entry);
        entry.updated_at = chrono::Utc::now().to_rfc3339();
        let updated = entry.clone();
        self.persist(&entries)?;
        Ok(Some(updated))
    }

    /// Batches the provider knows about that have not reached a terminal state.
    pub fn pending(&self) -> Vec<BatchLogEntry> {
        self.entries.lock().iter().filter(|e| e.is_pending()).cloned().collect()
    }

    /// Chunks recorded locally that never got a batch id.
    pub fn orphans(&self) -> Vec<BatchLogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.batch_id.is_none() && e.status == BatchStatus::Created)
            .cloned()
            .collect()
    }

    pub fn ready_to_merge(&self) -> Vec<BatchLogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.is_ready_to_merge())
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> LogSummary {
        let entries = self.entries.lock();
        let mut s = LogSummary {
            total: entries.len(),
            ..Default::default()
        };
        for e in entries.iter() {
            s.requests += e.requests;
            if e.done {
                s.merged += 1;
            }
            match e.status {
                BatchStatus::Created => s.created += 1,
                BatchStatus::Completed => s.completed += 1,
                BatchStatus::Failed => s.failed += 1,
                BatchStatus::Cancelled => s.cancelled += 1,
                BatchStatus::Expired => s.expired += 1,
                _ => s.running += 1,
            }
        }
        s
    }

    fn persist(&self, entries: &[BatchLogEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(entries)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, data)
            .map_err(|e| Error::Storage(format!("{}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| Error::Storage(format!("{}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<Vec<BatchLogEntry>> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&data)?)
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(".corrupt");
    PathBuf::from(p)
}
