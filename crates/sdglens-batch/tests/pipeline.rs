//! End-to-end batch pipeline tests against an in-memory provider.
//!
//! The fake provider keeps uploaded files and batches in memory, finishes a
//! batch on the first poll unless held, and answers every request through a
//! caller-supplied function.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sdglens_batch::{
    build_requests, load_selections, BatchApi, BatchBuilder, BatchInfo, BatchPage, BatchPipeline,
    BatchRequest, ChunkLimits, CreateBatch, Merger, PollOptions, Poller, PromptTemplate,
    RetryPolicy, Submitter,
};
use sdglens_core::{
    BatchStatus, ChunkId, ClassificationResult, DataPaths, DocumentId, Error, Outcome,
    PipelineConfig, Result, Sentiment,
};
use sdglens_ingest::{document_dir, save_splits, Document, ScoreTable, SCORES_FILE, SPLITS_FILE};
use sdglens_store::{BatchLog, RequestCounts, ResultStore, SqliteResultStore};
use serde_json::json;
use tempfile::TempDir;

type Answer = Box<dyn Fn(&BatchRequest) -> String + Send + Sync>;

#[derive(Default)]
struct FakeState {
    next_id: u64,
    files: HashMap<String, Vec<u8>>,
    batches: HashMap<String, BatchInfo>,
    /// Creation order, oldest first.
    order: Vec<String>,
    retrieves: HashMap<String, usize>,
    creates: usize,
}

struct FakeBatchApi {
    state: Mutex<FakeState>,
    answer: Answer,
    /// While set, running batches stay `in_progress`.
    hold: AtomicBool,
    /// While set, the next `create_batch` is rejected.
    reject_create: AtomicBool,
}

impl FakeBatchApi {
    fn new(answer: Answer) -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            answer,
            hold: AtomicBool::new(false),
            reject_create: AtomicBool::new(false),
        }
    }

    fn answering(content: &'static str) -> Self {
        Self::new(Box::new(move |_: &BatchRequest| content.to_string()))
    }

    fn hold(&self, on: bool) {
        self.hold.store(on, Ordering::SeqCst);
    }

    fn reject_next_create(&self) {
        self.reject_create.store(true, Ordering::SeqCst);
    }

    fn creates(&self) -> usize {
        self.state.lock().creates
    }

    fn retrieves(&self, batch_id: &str) -> usize {
        self.state.lock().retrieves.get(batch_id).copied().unwrap_or(0)
    }

    fn next_id(state: &mut FakeState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{}_{}", prefix, state.next_id)
    }

    /// Produce the output file for a batch and move it to `status`.
    fn finish(&self, state: &mut FakeState, batch_id: &str, status: BatchStatus) {
        let input_id = state.batches[batch_id].input_file_id.clone().unwrap_or_default();
        let input = String::from_utf8(state.files.get(&input_id).cloned().unwrap_or_default())
            .unwrap_or_default();

        let mut out = String::new();
        let mut total = 0;
        for line in input.lines().filter(|l| !l.trim().is_empty()) {
            let request: BatchRequest = serde_json::from_str(line).unwrap();
            total += 1;
            let record = json!({
                "id": format!("req_{}", total),
                "custom_id": request.custom_id,
                "response": {
                    "status_code": 200,
                    "body": {
                        "choices": [{"message": {"role": "assistant", "content": (self.answer)(&request)}}],
                        "usage": {"prompt_tokens": 200, "completion_tokens": 8}
                    }
                },
                "error": null
            });
            out.push_str(&record.to_string());
            out.push('\n');
        }

        let file_id = Self::next_id(state, "file-out");
        state.files.insert(file_id.clone(), out.into_bytes());
        let batch = state.batches.get_mut(batch_id).unwrap();
        batch.status = status;
        batch.output_file_id = Some(file_id);
        batch.request_counts = Some(RequestCounts {
            total,
            completed: total,
            failed: 0,
        });
    }
}

#[async_trait]
impl BatchApi for FakeBatchApi {
    async fn upload_file(&self, _file_name: &str, content: Vec<u8>) -> Result<String> {
        let mut state = self.state.lock();
        let id = Self::next_id(&mut state, "file-in");
        state.files.insert(id.clone(), content);
        Ok(id)
    }

    async fn create_batch(&self, request: &CreateBatch) -> Result<BatchInfo> {
        if self.reject_create.swap(false, Ordering::SeqCst) {
            return Err(Error::Api {
                status: 400,
                message: "invalid completion window".into(),
            });
        }
        let mut state = self.state.lock();
        if !state.files.contains_key(&request.input_file_id) {
            return Err(Error::Api {
                status: 400,
                message: "unknown input file".into(),
            });
        }
        let id = Self::next_id(&mut state, "batch");
        let info = BatchInfo {
            id: id.clone(),
            status: BatchStatus::Validating,
            input_file_id: Some(request.input_file_id.clone()),
            output_file_id: None,
            error_file_id: None,
            request_counts: None,
            metadata: Some(request.metadata.clone()),
            created_at: Some(state.next_id as i64),
        };
        state.batches.insert(id.clone(), info.clone());
        state.order.push(id);
        state.creates += 1;
        Ok(info)
    }

    async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchInfo> {
        let mut state = self.state.lock();
        *state.retrieves.entry(batch_id.to_string()).or_default() += 1;
        let status = state
            .batches
            .get(batch_id)
            .map(|b| b.status)
            .ok_or_else(|| Error::Api {
                status: 404,
                message: "no such batch".into(),
            })?;
        match status {
            BatchStatus::Cancelling => self.finish(&mut state, batch_id, BatchStatus::Cancelled),
            s if s.is_running() && self.hold.load(Ordering::SeqCst) => {
                if let Some(b) = state.batches.get_mut(batch_id) {
                    b.status = BatchStatus::InProgress;
                }
            }
            s if s.is_running() => self.finish(&mut state, batch_id, BatchStatus::Completed),
            _ => {}
        }
        Ok(state.batches[batch_id].clone())
    }

    async fn cancel_batch(&self, batch_id: &str) -> Result<BatchInfo> {
        let mut state = self.state.lock();
        let batch = state.batches.get_mut(batch_id).ok_or_else(|| Error::Api {
            status: 404,
            message: "no such batch".into(),
        })?;
        batch.status = BatchStatus::Cancelling;
        Ok(batch.clone())
    }

    async fn list_batches(&self, limit: usize, after: Option<&str>) -> Result<BatchPage> {
        let state = self.state.lock();
        let newest_first: Vec<&String> = state.order.iter().rev().collect();
        let start = match after {
            Some(a) => newest_first.iter().position(|id| *id == a).map(|p| p + 1).unwrap_or(0),
            None => 0,
        };
        let data: Vec<BatchInfo> = newest_first
            .iter()
            .skip(start)
            .take(limit)
            .map(|id| state.batches[*id].clone())
            .collect();
        Ok(BatchPage {
            has_more: start + data.len() < newest_first.len(),
            last_id: data.last().map(|b| b.id.clone()),
            data,
        })
    }

    async fn file_content(&self, file_id: &str) -> Result<Vec<u8>> {
        self.state
            .lock()
            .files
            .get(file_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(file_id.to_string()))
    }
}

struct Harness {
    _dir: TempDir,
    paths: DataPaths,
    config: PipelineConfig,
    api: Arc<FakeBatchApi>,
    log: Arc<BatchLog>,
    store: Arc<SqliteResultStore>,
}

impl Harness {
    fn new(api: FakeBatchApi) -> Self {
        let dir = TempDir::new().unwrap();
        let paths = DataPaths::new(dir.path().join("data")).unwrap();
        let log = Arc::new(BatchLog::open(&paths.batch_log).unwrap());
        let store = Arc::new(SqliteResultStore::open(paths.results_db()).unwrap());
        Self {
            _dir: dir,
            paths,
            config: PipelineConfig::default(),
            api: Arc::new(api),
            log,
            store,
        }
    }

    fn api(&self) -> Arc<dyn BatchApi> {
        self.api.clone()
    }

    fn submitter(&self) -> Submitter {
        Submitter::new(self.api(), self.log.clone(), &self.paths, &self.config)
            .with_retry(RetryPolicy::none())
    }

    fn poller(&self) -> Poller {
        Poller::new(self.api(), self.log.clone()).with_retry(RetryPolicy::none())
    }

    fn merger(&self) -> Merger {
        Merger::new(self.api(), self.log.clone(), self.store.clone(), &self.paths.batch_results)
            .with_retry(RetryPolicy::none())
    }

    fn pipeline(&self) -> BatchPipeline {
        BatchPipeline::new(self.submitter(), self.poller(), self.merger())
    }

    fn limits(&self) -> ChunkLimits {
        ChunkLimits::from_config(&self.config)
    }

    /// Write splits and a one-column score table for a document.
    fn write_document(&self, id: &DocumentId, sentences: &[&str], scores: &[f32]) {
        let map: BTreeMap<ChunkId, String> = sentences
            .iter()
            .enumerate()
            .map(|(i, s)| (ChunkId(i as u64), s.to_string()))
            .collect();
        save_splits(
            &Document::new(id.clone(), map),
            &document_dir(&self.paths.texts, id).join(SPLITS_FILE),
        )
        .unwrap();
        let mut table = ScoreTable::new(vec!["SDG7".into()]);
        for (i, s) in scores.iter().enumerate() {
            table.push(ChunkId(i as u64), vec![*s]).unwrap();
        }
        table
            .write_csv(&document_dir(&self.paths.scores, id).join(SCORES_FILE))
            .unwrap();
    }

    fn groups(&self, threshold: f32) -> BTreeMap<String, sdglens_batch::BuildOutput> {
        let (selections, _) = load_selections(&self.paths.texts, &self.paths.scores, threshold).unwrap();
        let builder = BatchBuilder::new(self.config.model.clone(), PromptTemplate::default());
        build_requests(&builder, &selections)
    }
}

fn fast_poll() -> PollOptions {
    PollOptions {
        interval: Duration::from_millis(1),
        timeout: Duration::from_secs(5),
    }
}

fn without_timestamps(mut rows: Vec<ClassificationResult>) -> Vec<ClassificationResult> {
    for r in &mut rows {
        r.updated_at.clear();
    }
    rows
}

#[tokio::test]
async fn test_single_selected_sentence_end_to_end() {
    let h = Harness::new(FakeBatchApi::answering("[7, False, \"Positive\"]"));
    let doc = DocumentId::new("rwe", 2021);
    h.write_document(
        &doc,
        &[
            "RWE is a utility.",
            "The annual meeting took place in Essen.",
            "Our wind farms supply clean energy to millions of homes.",
        ],
        &[0.1, 0.2, 0.6],
    );

    let groups = h.groups(0.5);
    assert_eq!(groups["rwe"].len(), 1);
    assert_eq!(groups["rwe"].requests[0].custom_id, "sdg1~rwe~2021~2");

    let report = h.pipeline().run(&groups, h.limits(), fast_poll()).await.unwrap();
    assert_eq!(report.submit.submitted.len(), 1);
    assert_eq!(report.poll.finished.len(), 1);
    assert_eq!(report.merge.parsed, 1);

    let all = h.store.list_all().unwrap();
    assert_eq!(all.len(), 1);
    let result = &all[0];
    assert_eq!(result.document, doc);
    assert_eq!(result.chunk_id, ChunkId(2));
    assert_eq!(result.outcome, Outcome::Parsed);
    let labels = result.labels.as_ref().unwrap();
    assert_eq!(labels.sdg_labels, vec![7]);
    assert!(!labels.ai_related);
    assert_eq!(labels.sentiment, Sentiment::Positive);

    let entry = h.log.entries().pop().unwrap();
    assert!(entry.done);
    assert_eq!(entry.status, BatchStatus::Completed);
    assert!(h
        .paths
        .batch_results
        .join(format!("{}_output.jsonl", entry.batch_id.unwrap()))
        .is_file());
}

#[tokio::test]
async fn test_merging_twice_gives_same_results() {
    let h = Harness::new(FakeBatchApi::answering("[3, 7, True, Negative]"));
    h.write_document(&DocumentId::new("basf", 2019), &["a.", "b.", "c.", "d."], &[0.9, 0.1, 0.8, 0.7]);
    let groups = h.groups(0.5);
    h.pipeline().run(&groups, h.limits(), fast_poll()).await.unwrap();
    let first = without_timestamps(h.store.list_all().unwrap());
    assert_eq!(first.len(), 3);

    let batch_id = h.log.entries()[0].batch_id.clone().unwrap();
    h.log.update_by_batch_id(&batch_id, |e| e.done = false).unwrap();
    let again = h.merger().merge_ready().await.unwrap();
    assert_eq!(again.parsed, 3);

    assert_eq!(without_timestamps(h.store.list_all().unwrap()), first);
    assert_eq!(h.store.count().unwrap(), 3);
}

#[tokio::test]
async fn test_submit_skips_already_submitted_chunks() {
    let h = Harness::new(FakeBatchApi::answering("[0, False, Positive]"));
    h.write_document(&DocumentId::new("airbus", 2020), &["x.", "y."], &[0.9, 0.9]);
    let groups = h.groups(0.5);

    let first = h.submitter().submit_groups(&groups, h.limits()).await.unwrap();
    assert_eq!(first.submitted.len(), 1);
    let second = h.submitter().submit_groups(&groups, h.limits()).await.unwrap();
    assert!(second.submitted.is_empty());
    assert_eq!(second.skipped, 1);
    assert_eq!(h.api.creates(), 1);
    assert_eq!(h.log.len(), 1);
}

#[tokio::test]
async fn test_chunk_count_follows_request_bound() {
    let h = Harness::new(FakeBatchApi::answering("[0, False, Positive]"));
    let sentences = ["s."; 7];
    h.write_document(&DocumentId::new("siemens", 2022), &sentences, &[0.9; 7]);
    let groups = h.groups(0.5);
    let limits = ChunkLimits {
        max_requests: 3,
        max_bytes: usize::MAX,
    };

    let report = h.submitter().submit_groups(&groups, limits).await.unwrap();
    assert_eq!(report.submitted.len(), 3);
    assert_eq!(report.requests, 7);
    let mut sizes: Vec<usize> = h.log.entries().iter().map(|e| e.requests).collect();
    sizes.sort();
    assert_eq!(sizes, vec![1, 3, 3]);
}

#[tokio::test]
async fn test_poll_timeout_is_resumable() {
    let h = Harness::new(FakeBatchApi::answering("[13, False, Negative]"));
    h.write_document(&DocumentId::new("eon", 2016), &["coal.", "wind."], &[0.9, 0.9]);
    let groups = h.groups(0.5);
    h.api.hold(true);

    let report = h
        .pipeline()
        .run(
            &groups,
            h.limits(),
            PollOptions {
                interval: Duration::from_millis(5),
                timeout: Duration::from_millis(30),
            },
        )
        .await
        .unwrap();
    assert!(report.poll.timed_out);
    assert_eq!(report.poll.still_running.len(), 1);
    assert_eq!(report.merge.batches, 0);
    let entry = h.log.entries().pop().unwrap();
    assert_eq!(entry.status, BatchStatus::InProgress);
    assert!(!entry.done);

    h.api.hold(false);
    let report = h.pipeline().run(&groups, h.limits(), fast_poll()).await.unwrap();
    assert_eq!(report.submit.skipped, 1);
    assert_eq!(report.poll.finished.len(), 1);
    assert_eq!(report.merge.parsed, 2);
    assert_eq!(h.api.creates(), 1);
}

#[tokio::test]
async fn test_terminal_batches_are_not_polled_again() {
    let h = Harness::new(FakeBatchApi::answering("[0, False, Positive]"));
    h.write_document(&DocumentId::new("sap", 2018), &["x."], &[0.9]);
    let groups = h.groups(0.5);
    let report = h.pipeline().run(&groups, h.limits(), fast_poll()).await.unwrap();
    let batch_id = report.submit.submitted[0].clone();
    let calls = h.api.retrieves(&batch_id);

    let again = h.poller().poll(vec![batch_id.clone()], fast_poll()).await.unwrap();
    assert_eq!(again.finished, vec![(batch_id.clone(), BatchStatus::Completed)]);
    assert_eq!(again.rounds, 0);
    assert_eq!(h.api.retrieves(&batch_id), calls);
}

#[tokio::test]
async fn test_cancel_records_request_and_merges_partial_output() {
    let h = Harness::new(FakeBatchApi::answering("[8, True, Positive]"));
    h.write_document(&DocumentId::new("bmw", 2023), &["x.", "y."], &[0.9, 0.9]);
    let groups = h.groups(0.5);
    h.api.hold(true);
    let submitted = h.submitter().submit_groups(&groups, h.limits()).await.unwrap();
    let batch_id = submitted.submitted[0].clone();

    let cancel = h.poller().cancel(&[batch_id.clone(), "batch_unknown".into()]).await.unwrap();
    assert_eq!(cancel.requested, vec![batch_id.clone()]);
    assert_eq!(cancel.skipped, vec!["batch_unknown".to_string()]);
    let entry = h.log.find_by_batch_id(&batch_id).unwrap();
    assert!(entry.cancel_requested);
    assert_eq!(entry.status, BatchStatus::Validating);

    let poll = h.poller().poll_pending(fast_poll()).await.unwrap();
    assert_eq!(poll.finished, vec![(batch_id.clone(), BatchStatus::Cancelled)]);
    let merge = h.merger().merge_ready().await.unwrap();
    assert_eq!(merge.parsed, 2);
}

#[tokio::test]
async fn test_reconcile_adopts_orphaned_batch() {
    let h = Harness::new(FakeBatchApi::answering("[6, False, Positive]"));
    h.write_document(&DocumentId::new("veolia", 2017), &["water."], &[0.9]);
    let groups = h.groups(0.5);
    h.api.hold(true);
    let submitted = h.submitter().submit_groups(&groups, h.limits()).await.unwrap();
    let batch_id = submitted.submitted[0].clone();

    // Crash after batch creation, before the id was recorded.
    let fingerprint = h.log.entries()[0].fingerprint.clone();
    h.log
        .update_by_fingerprint(&fingerprint, |e| {
            e.batch_id = None;
            e.status = BatchStatus::Created;
        })
        .unwrap();
    assert_eq!(h.log.orphans().len(), 1);

    let report = h
        .poller()
        .reconcile(&h.paths.batches, &h.paths.mappings)
        .await
        .unwrap();
    assert_eq!(report.adopted, 1);
    assert_eq!(report.rebuilt, 0);
    let entry = h.log.find_by_fingerprint(&fingerprint).unwrap();
    assert_eq!(entry.batch_id.as_deref(), Some(batch_id.as_str()));
    assert!(entry.status.is_running());

    let again = h.submitter().submit_groups(&groups, h.limits()).await.unwrap();
    assert_eq!(again.skipped, 1);
    assert_eq!(h.api.creates(), 1);
}

#[tokio::test]
async fn test_rejected_create_is_resubmitted_next_run() {
    let h = Harness::new(FakeBatchApi::answering("[9, False, Positive]"));
    h.write_document(&DocumentId::new("thyssen", 2019), &["steel.", "hydrogen."], &[0.9, 0.9]);
    let groups = h.groups(0.5);
    h.api.reject_next_create();

    let first = h.submitter().submit_groups(&groups, h.limits()).await.unwrap();
    assert!(first.submitted.is_empty());
    assert_eq!(first.failed.len(), 1);
    assert!(first.failed[0].1.contains("invalid completion window"));
    let entry = h.log.find_by_fingerprint(&first.failed[0].0).unwrap();
    assert_eq!(entry.status, BatchStatus::Created);
    assert!(entry.batch_id.is_none());
    assert!(entry.last_error.as_deref().unwrap().contains("invalid completion window"));
    assert_eq!(h.api.creates(), 0);

    let second = h.submitter().submit_groups(&groups, h.limits()).await.unwrap();
    assert_eq!(second.submitted.len(), 1);
    assert!(second.failed.is_empty());
    assert_eq!(h.api.creates(), 1);
    assert_eq!(h.log.len(), 1);
    let entry = h.log.entries().pop().unwrap();
    assert_eq!(entry.batch_id.as_deref(), Some(second.submitted[0].as_str()));
    assert!(entry.last_error.is_none());
}

#[tokio::test]
async fn test_run_adopts_orphan_instead_of_resubmitting() {
    let h = Harness::new(FakeBatchApi::answering("[6, False, Positive]"));
    let doc = DocumentId::new("veolia", 2018);
    h.write_document(&doc, &["water."], &[0.9]);
    let groups = h.groups(0.5);
    h.api.hold(true);
    let submitted = h.submitter().submit_groups(&groups, h.limits()).await.unwrap();
    let batch_id = submitted.submitted[0].clone();

    // Crash after batch creation, before the id was recorded.
    let fingerprint = h.log.entries()[0].fingerprint.clone();
    h.log
        .update_by_fingerprint(&fingerprint, |e| {
            e.batch_id = None;
            e.status = BatchStatus::Created;
        })
        .unwrap();

    h.api.hold(false);
    let report = h.pipeline().run(&groups, h.limits(), fast_poll()).await.unwrap();
    assert_eq!(report.adopted, 1);
    assert!(report.submit.submitted.is_empty());
    assert_eq!(report.submit.skipped, 1);
    assert_eq!(report.poll.finished, vec![(batch_id.clone(), BatchStatus::Completed)]);
    assert_eq!(report.merge.parsed, 1);
    assert_eq!(h.api.creates(), 1);
    assert!(h.store.get(&doc, ChunkId(0)).unwrap().is_some());
}

#[tokio::test]
async fn test_corrupt_log_is_rebuilt_and_merged() {
    let h = Harness::new(FakeBatchApi::answering("[12, False, Negative]"));
    h.write_document(&DocumentId::new("nestle", 2015), &["packaging.", "sugar."], &[0.9, 0.2]);
    let groups = h.groups(0.5);
    h.submitter().submit_groups(&groups, h.limits()).await.unwrap();

    std::fs::write(&h.paths.batch_log, "[{\"fingerprint\": ").unwrap();
    let (log, recovered) = BatchLog::open_or_recover(&h.paths.batch_log).unwrap();
    assert!(recovered);
    let log = Arc::new(log);
    let poller = Poller::new(h.api(), log.clone()).with_retry(RetryPolicy::none());

    let report = poller.reconcile(&h.paths.batches, &h.paths.mappings).await.unwrap();
    assert_eq!(report.rebuilt, 1);
    assert_eq!(report.adopted, 1);

    poller.poll_pending(fast_poll()).await.unwrap();
    let merger = Merger::new(h.api(), log.clone(), h.store.clone(), &h.paths.batch_results)
        .with_retry(RetryPolicy::none());
    let merge = merger.merge_ready().await.unwrap();
    assert_eq!(merge.parsed, 1);
    let stored = h
        .store
        .get(&DocumentId::new("nestle", 2015), ChunkId(0))
        .unwrap()
        .unwrap();
    assert_eq!(stored.labels.unwrap().sdg_labels, vec![12]);
}
