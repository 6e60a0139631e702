//! Human-readable command summaries.

use sdglens_batch::{CancelReport, MergeReport, PollReport, ReconcileReport, SubmitReport};
use sdglens_store::{BatchLogEntry, LogSummary};

pub fn print_submit(report: &SubmitReport) {
    println!("=== Submit ===");
    println!("Batches submitted:  {}", report.submitted.len());
    println!("Requests:           {}", report.requests);
    println!("Already submitted:  {}", report.skipped);
    for id in &report.submitted {
        println!("  + {}", id);
    }
    print_errors(&report.failed);
}

pub fn print_poll(report: &PollReport) {
    println!("=== Poll ===");
    println!("Rounds:             {}", report.rounds);
    println!("Finished:           {}", report.finished.len());
    for (id, status) in &report.finished {
        println!("  {} {}", id, status.as_str());
    }
    println!("Still running:      {}", report.still_running.len());
    if report.timed_out {
        println!("Timed out; run `sdglens poll` again to resume.");
    }
    if report.errors > 0 {
        println!("Poll errors:        {}", report.errors);
    }
}

pub fn print_cancel(report: &CancelReport) {
    println!("=== Cancel ===");
    println!("Requested:          {}", report.requested.len());
    println!("Skipped:            {}", report.skipped.len());
    print_errors(&report.errors);
}

pub fn print_merge(report: &MergeReport) {
    println!("=== Merge ===");
    println!("Batches merged:     {}", report.batches);
    println!("Parsed:             {}", report.parsed);
    println!("Parse failures:     {}", report.parse_failures);
    println!("Request failures:   {}", report.request_failed);
    if report.unattributable > 0 {
        println!("Unattributable:     {}", report.unattributable);
    }
    if report.malformed_lines > 0 {
        println!("Malformed lines:    {}", report.malformed_lines);
    }
}

pub fn print_reconcile(report: &ReconcileReport) {
    println!("=== Reconcile ===");
    println!("Refreshed:          {}", report.refreshed);
    println!("Rebuilt from disk:  {}", report.rebuilt);
    println!("Adopted:            {}", report.adopted);
    println!("Errors:             {}", report.errors);
}

pub fn print_status(summary: &LogSummary, stored: usize, entries: &[BatchLogEntry]) {
    println!("=== Batch log ===");
    println!("Batches:            {}", summary.total);
    println!("Requests:           {}", summary.requests);
    println!("Not yet submitted:  {}", summary.created);
    println!("Running:            {}", summary.running);
    println!("Completed:          {}", summary.completed);
    println!("Failed:             {}", summary.failed);
    println!("Cancelled:          {}", summary.cancelled);
    println!("Expired:            {}", summary.expired);
    println!("Merged:             {}", summary.merged);
    println!("Stored results:     {}", stored);

    let problems: Vec<&BatchLogEntry> = entries.iter().filter(|e| e.last_error.is_some()).collect();
    if !problems.is_empty() {
        println!();
        println!("Last errors:");
        for e in problems {
            println!(
                "  - {} ({}): {}",
                e.batch_id.as_deref().unwrap_or(&e.fingerprint[..12.min(e.fingerprint.len())]),
                e.status.as_str(),
                e.last_error.as_deref().unwrap_or_default()
            );
        }
    }
}

fn print_errors(errors: &[(String, String)]) {
    if errors.is_empty() {
        return;
    }
    println!();
    println!("Errors:");
    for (what, e) in errors {
        println!("  - {}: {}", what, e);
    }
}
