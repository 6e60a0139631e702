//! Batch pipeline: selection → submission → polling → merge.

use std::collections::BTreeMap;
use std::path::Path;

use sdglens_core::{DocumentId, Result};
use sdglens_ingest::{
    discover_documents, document_dir, filter, load_splits, Document, FilterResult, ScoreTable,
    SCORES_FILE, SPLITS_FILE,
};
use tracing::{info, warn};

use crate::builder::{BatchBuilder, BuildOutput, ChunkLimits};
use crate::merger::{MergeReport, Merger};
use crate::poller::{PollOptions, PollReport, Poller};
use crate::submitter::{SubmitReport, Submitter};

/// A document and the sentences selected from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub document: Document,
    pub filter: FilterResult,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionReport {
    pub documents: usize,
    pub selected: usize,
    /// Documents left out, with the reason.
    pub skipped: Vec<(DocumentId, String)>,
}

/// Load every score table under `scores_root`, pair it with its splits
/// under `texts_root`, and apply the threshold.
///
/// A document with a missing or unreadable file is skipped and reported.
pub fn load_selections(
    texts_root: &Path,
    scores_root: &Path,
    threshold: f32,
) -> Result<(Vec<Selection>, SelectionReport)> {
    let mut report = SelectionReport::default();
    let mut selections = Vec::new();

    for (id, scores_path) in discover_documents(scores_root, SCORES_FILE)? {
        let splits_path = document_dir(texts_root, &id).join(SPLITS_FILE);
        if !splits_path.is_file() {
            warn!("{}: no {} found, skipping", id, SPLITS_FILE);
            report.skipped.push((id, format!("missing {}", splits_path.display())));
            continue;
        }
        let table = match ScoreTable::read_csv(&scores_path) {
            Ok(t) => t,
            Err(e) => {
                warn!("{}: unreadable score table: {}", id, e);
                report.skipped.push((id, e.to_string()));
                continue;
            }
        };
        let document = match load_splits(&splits_path, id.clone()) {
            Ok(d) => d,
            Err(e) => {
                warn!("{}: unreadable splits: {}", id, e);
                report.skipped.push((id, e.to_string()));
                continue;
            }
        };

        let selection = filter(&table, threshold);
        report.documents += 1;
        report.selected += selection.len();
        selections.push(Selection {
            document,
            filter: selection,
        });
    }

    info!(
        "Selected {} sentences from {} documents ({} skipped) at threshold {}",
        report.selected,
        report.documents,
        report.skipped.len(),
        threshold
    );
    Ok((selections, report))
}

/// Build grouped requests for a set of selections.
pub fn build_requests(builder: &BatchBuilder, selections: &[Selection]) -> BTreeMap<String, BuildOutput> {
    builder.build_grouped(selections.iter().map(|s| (&s.document, &s.filter)))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Chunks whose batch was created by an earlier, interrupted run.
    pub adopted: usize,
    pub submit: SubmitReport,
    pub poll: PollReport,
    pub merge: MergeReport,
}

/// Submit, wait, merge.
pub struct BatchPipeline {
    submitter: Submitter,
    poller: Poller,
    merger: Merger,
}

impl BatchPipeline {
    pub fn new(submitter: Submitter, poller: Poller, merger: Merger) -> Self {
        Self {
            submitter,
            poller,
            merger,
        }
    }

    /// Adopt batches an interrupted run created but never recorded, submit
    /// new chunks, poll everything still running, merge what finished.
    /// Batches still running at the timeout are picked up by the next run.
    pub async fn run(
        &self,
        groups: &BTreeMap<String, BuildOutput>,
        limits: ChunkLimits,
        options: PollOptions,
    ) -> Result<RunReport> {
        let start = std::time::Instant::now();
        let adopted = self.poller.adopt_logged_orphans().await?;
        let submit = self.submitter.submit_groups(groups, limits).await?;
        let poll = self.poller.poll_pending(options).await?;
        let merge = self.merger.merge_ready().await?;

        info!(
            "Run complete: submitted={}, finished={}, still running={}, stored={}, duration={}ms",
            submit.submitted.len(),
            poll.finished.len(),
            poll.still_running.len(),
            merge.stored(),
            start.elapsed().as_millis()
        );
        Ok(RunReport {
            adopted,
            submit,
            poll,
            merge,
        })
    }

    pub fn submitter(&self) -> &Submitter {
        &self.submitter
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn merger(&self) -> &Merger {
        &self.merger
    }
}
