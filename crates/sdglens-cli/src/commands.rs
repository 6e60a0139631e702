//! One function per subcommand. Each returns the process exit code.

use std::collections::BTreeMap;

use anyhow::Context as _;
use sdglens_aggregate::write_tables;
use sdglens_batch::{build_requests, load_selections, BuildOutput, ChunkLimits};
use sdglens_ingest::{
    discover_documents, document_dir, load_splits, save_splits, Splitter, EMBEDDINGS_FILE,
    RAW_TEXT_FILE, SCORES_FILE, SPLITS_FILE,
};
use sdglens_infer::{KeywordKind, KeywordSet, PrecomputedEmbeddings, Scorer};
use sdglens_store::{export_all, ResultStore};
use tracing::{info, warn};

use crate::report;
use crate::state::AppState;

pub const SDG_KEYWORDS_FILE: &str = "sdg.json";
pub const AI_KEYWORDS_FILE: &str = "ai.json";

/// Value following `name`, e.g. `--threshold 0.6`.
pub fn option<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

pub fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

/// Arguments that are neither flags nor flag values.
pub fn positionals(args: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut skip = false;
    for a in args {
        if skip {
            skip = false;
            continue;
        }
        if a.starts_with("--") {
            skip = VALUE_OPTIONS.contains(&a.as_str());
            continue;
        }
        out.push(a.clone());
    }
    out
}

const VALUE_OPTIONS: [&str; 3] = ["--threshold", "--company", "--data-dir"];

/// Split every `results.txt` into `splits.json`.
pub fn split(state: &AppState, args: &[String]) -> anyhow::Result<i32> {
    let force = has_flag(args, "--force");
    let splitter = Splitter::new();
    let (mut written, mut existing, mut failed) = (0, 0, 0);

    for (id, raw_path) in discover_documents(&state.paths.texts, RAW_TEXT_FILE)? {
        let out = document_dir(&state.paths.texts, &id).join(SPLITS_FILE);
        if out.is_file() && !force {
            existing += 1;
            continue;
        }
        let raw = match std::fs::read_to_string(&raw_path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("{}: cannot read {}: {}", id, raw_path.display(), e);
                failed += 1;
                continue;
            }
        };
        let doc = splitter.split(id, &raw);
        save_splits(&doc, &out)?;
        written += 1;
    }

    info!("Split {} documents ({} already split, {} failed)", written, existing, failed);
    println!("split: {} written, {} existing, {} failed", written, existing, failed);
    Ok(if failed > 0 { 1 } else { 0 })
}

fn load_keyword_sets(state: &AppState) -> anyhow::Result<Vec<KeywordSet>> {
    let sdg_path = state.paths.keywords.join(SDG_KEYWORDS_FILE);
    let mut sets = vec![KeywordSet::load(&sdg_path, KeywordKind::Sdg)
        .with_context(|| format!("loading {}", sdg_path.display()))?];
    let ai_path = state.paths.keywords.join(AI_KEYWORDS_FILE);
    if ai_path.is_file() {
        sets.push(KeywordSet::load(&ai_path, KeywordKind::Ai)?);
    }
    Ok(sets)
}

/// Score every document that has precomputed sentence embeddings.
pub fn score(state: &AppState, args: &[String]) -> anyhow::Result<i32> {
    let sets = load_keyword_sets(state)?;
    let has_ai = sets.iter().any(|s| s.kind == KeywordKind::Ai);
    let scorer = Scorer::new(sets).with_term_flags(has_ai && !has_flag(args, "--no-terms"));
    let (mut scored, mut failed) = (0, 0);

    for (id, embeddings_path) in discover_documents(&state.paths.scores, EMBEDDINGS_FILE)? {
        let splits_path = document_dir(&state.paths.texts, &id).join(SPLITS_FILE);
        let result = load_splits(&splits_path, id.clone()).and_then(|doc| {
            let source = PrecomputedEmbeddings::load(&embeddings_path)?;
            scorer.score(&doc, &source)
        });
        match result {
            Ok((table, _)) => {
                table.write_csv(&document_dir(&state.paths.scores, &id).join(SCORES_FILE))?;
                scored += 1;
            }
            Err(e) => {
                warn!("{}: scoring failed: {}", id, e);
                failed += 1;
            }
        }
    }

    println!("score: {} documents scored, {} failed", scored, failed);
    Ok(if failed > 0 { 1 } else { 0 })
}

fn threshold(state: &AppState, args: &[String]) -> anyhow::Result<f32> {
    match option(args, "--threshold") {
        Some(t) => t
            .parse::<f32>()
            .ok()
            .filter(|t| t.is_finite())
            .with_context(|| format!("invalid threshold {:?}", t)),
        None => Ok(state.config.threshold),
    }
}

/// Select sentences above the threshold and build grouped requests.
fn prepare(state: &AppState, args: &[String]) -> anyhow::Result<BTreeMap<String, BuildOutput>> {
    let threshold = threshold(state, args)?;
    let (selections, selection) =
        load_selections(&state.paths.texts, &state.paths.scores, threshold)?;
    for (id, why) in &selection.skipped {
        warn!("{}: skipped ({})", id, why);
    }
    let mut groups = build_requests(&state.builder()?, &selections);
    if let Some(company) = option(args, "--company") {
        groups.retain(|group, _| group == company);
    }
    Ok(groups)
}

pub async fn submit(state: &AppState, args: &[String]) -> anyhow::Result<i32> {
    let groups = prepare(state, args)?;
    let api = state.api()?;
    state.poller(api.clone()).adopt_logged_orphans().await?;

    let report = state
        .submitter(api)
        .submit_groups(&groups, ChunkLimits::from_config(&state.config))
        .await?;
    report::print_submit(&report);
    Ok(if report.failed.is_empty() { 0 } else { 1 })
}

pub async fn poll(state: &AppState, args: &[String]) -> anyhow::Result<i32> {
    let poller = state.poller(state.api()?);
    let ids = positionals(args);
    let report = if ids.is_empty() {
        poller.poll_pending(state.poll_options()).await?
    } else {
        poller.poll(ids, state.poll_options()).await?
    };
    report::print_poll(&report);
    Ok(0)
}

pub async fn cancel(state: &AppState, args: &[String]) -> anyhow::Result<i32> {
    let ids = positionals(args);
    if ids.is_empty() {
        eprintln!("Usage: sdglens cancel <batch-id>...");
        return Ok(1);
    }
    let report = state.poller(state.api()?).cancel(&ids).await?;
    report::print_cancel(&report);
    Ok(if report.errors.is_empty() { 0 } else { 1 })
}

pub async fn merge(state: &AppState) -> anyhow::Result<i32> {
    let report = state.merger(state.api()?).merge_ready().await?;
    report::print_merge(&report);
    Ok(0)
}

pub async fn reconcile(state: &AppState) -> anyhow::Result<i32> {
    let report = state
        .poller(state.api()?)
        .reconcile(&state.paths.batches, &state.paths.mappings)
        .await?;
    report::print_reconcile(&report);
    Ok(if report.errors == 0 { 0 } else { 1 })
}

pub fn status(state: &AppState) -> anyhow::Result<i32> {
    let summary = state.log.summary();
    let stored = state.store.count()?;
    report::print_status(&summary, stored, &state.log.entries());
    Ok(0)
}

pub fn export(state: &AppState) -> anyhow::Result<i32> {
    let (documents, rows) = export_all(state.store.as_ref(), &state.paths.exports)?;
    println!(
        "export: {} rows for {} documents written to {}",
        rows,
        documents,
        state.paths.exports.display()
    );
    Ok(0)
}

pub fn aggregate(state: &AppState) -> anyhow::Result<i32> {
    let report = write_tables(state.store.as_ref(), &state.paths.exports)?;
    println!(
        "aggregate: {} results counted ({} skipped)\n  {}\n  {}",
        report.counted,
        report.skipped,
        report.counts_path.display(),
        report.diff_path.display()
    );
    Ok(0)
}

/// Submit, poll and merge in one go.
pub async fn run(state: &AppState, args: &[String]) -> anyhow::Result<i32> {
    let groups = prepare(state, args)?;
    let api = state.api()?;
    let report = state
        .pipeline(api)
        .run(
            &groups,
            ChunkLimits::from_config(&state.config),
            state.poll_options(),
        )
        .await?;
    report::print_submit(&report.submit);
    report::print_poll(&report.poll);
    report::print_merge(&report.merge);
    Ok(if report.submit.failed.is_empty() { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &[&str]) -> Vec<String> {
        s.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_option_and_positionals() {
        let a = args(&["batch_1", "--threshold", "0.6", "--force", "batch_2", "--company", "rwe"]);
        assert_eq!(option(&a, "--threshold"), Some("0.6"));
        assert_eq!(option(&a, "--company"), Some("rwe"));
        assert_eq!(option(&a, "--data-dir"), None);
        assert!(has_flag(&a, "--force"));
        assert_eq!(positionals(&a), vec!["batch_1", "batch_2"]);
    }
}
