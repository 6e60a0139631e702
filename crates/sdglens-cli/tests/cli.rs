//! Command-line tests for the offline stages: split, score, status, export
//! and aggregate. No provider is contacted.

use std::path::Path;
use std::process::{Command, Output};

fn sdglens(data_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sdglens"))
        .args(args)
        .arg("--data-dir")
        .arg(data_dir)
        .env_remove("OPENAI_API_KEY")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run sdglens")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).to_string()
}

/// `help` lists every pipeline command.
#[test]
fn test_help_lists_commands() {
    let out = Command::new(env!("CARGO_BIN_EXE_sdglens"))
        .arg("help")
        .output()
        .unwrap();
    assert!(out.status.success());
    let text = stdout(&out);
    for cmd in [
        "split", "score", "submit", "poll", "cancel", "merge", "reconcile", "status", "export",
        "aggregate", "run",
    ] {
        assert!(text.contains(cmd), "help is missing {}", cmd);
    }
}

#[test]
fn test_unknown_command_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = sdglens(dir.path(), &["frobnicate"]);
    assert!(!out.status.success());
}

/// Split a report, score it against one SDG vector, and check the table.
#[test]
fn test_split_then_score() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path();
    let doc_dir = data.join("texts/rwe/2021");
    std::fs::create_dir_all(&doc_dir).unwrap();
    std::fs::write(
        doc_dir.join("results.txt"),
        "RWE is a utility. The meeting was in Essen.\n\nOur wind farms supply clean energy.",
    )
    .unwrap();

    let out = sdglens(data, &["split"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let splits: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(doc_dir.join("splits.json")).unwrap())
            .unwrap();
    assert_eq!(splits["2"], "Our wind farms supply clean energy.");

    // Second run leaves existing splits alone.
    let out = sdglens(data, &["split"]);
    assert!(stdout(&out).contains("0 written, 1 existing"));

    std::fs::write(
        data.join("keywords/sdg.json"),
        serde_json::json!({ "7": [1.0, 0.0] }).to_string(),
    )
    .unwrap();
    let scores_dir = data.join("scores_csv/rwe/2021");
    std::fs::create_dir_all(&scores_dir).unwrap();
    std::fs::write(
        scores_dir.join("embeddings.json"),
        serde_json::json!({
            "0": [0.0, 1.0],
            "1": [0.0, 1.0],
            "2": [1.0, 0.0],
        })
        .to_string(),
    )
    .unwrap();

    let out = sdglens(data, &["score"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let table = std::fs::read_to_string(scores_dir.join("similarity_scores.csv")).unwrap();
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines[0], "sentence_id,sdg_7");
    assert_eq!(lines.len(), 4);
    assert!(lines[3].starts_with("2,1"));
}

/// With an empty store, status/export/aggregate still succeed and
/// aggregate writes header-only tables.
#[test]
fn test_offline_reports_on_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path();

    let out = sdglens(data, &["status"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("Stored results:     0"));

    assert!(sdglens(data, &["export"]).status.success());

    let out = sdglens(data, &["aggregate"]);
    assert!(out.status.success());
    let counts =
        std::fs::read_to_string(data.join("exports/company_year_sentiment_counts.csv")).unwrap();
    assert!(counts.starts_with("company,year,sentiment,0,"));
    assert_eq!(counts.lines().count(), 1);
}

/// Provider commands need an API key.
#[test]
fn test_submit_without_api_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = sdglens(dir.path(), &["merge"]);
    assert!(!out.status.success());
}
