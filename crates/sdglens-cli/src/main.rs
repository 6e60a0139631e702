//! SDGLens: classify annual-report sentences by SDG, AI relevance and
//! sentiment through an LLM batch API.

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

mod commands;
mod report;
mod state;

use state::AppState;

fn resolve_data_dir(args: &[String]) -> PathBuf {
    if let Some(dir) = commands::option(args, "--data-dir") {
        return PathBuf::from(dir);
    }
    std::env::var("SDGLENS_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

fn print_help() {
    println!("SDGLens: SDG, AI and sentiment classification of report sentences");
    println!();
    println!("Usage: sdglens <command> [options]");
    println!();
    println!("Commands:");
    println!("  split [--force]              Split texts/<company>/<year>/results.txt into sentences");
    println!("  score [--no-terms]           Score sentences against keywords/sdg.json (and ai.json)");
    println!("  submit [--threshold T]       Build requests above T and submit new batches");
    println!("  poll [batch-id...]           Poll running batches until done or timed out");
    println!("  cancel <batch-id...>         Request cancellation of running batches");
    println!("  merge                        Download finished batches and store results");
    println!("  reconcile                    Rebuild the batch log from disk and the provider");
    println!("  status                       Show batch log and result counts");
    println!("  export                       Write per-document classification CSV/JSON");
    println!("  aggregate                    Write company/year count tables");
    println!("  run [--threshold T]          submit, poll and merge in one go");
    println!("  help                         Show this help message");
    println!();
    println!("Options:");
    println!("  --data-dir <dir>             Data directory (default $SDGLENS_DATA_DIR or ./data)");
    println!("  --company <name>             Restrict submit/run to one company");
    println!();
    println!("Environment: OPENAI_API_KEY, OPENAI_BASE_URL, RUST_LOG");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1).map(String::as_str) else {
        print_help();
        std::process::exit(1);
    };
    if matches!(command, "--help" | "-h" | "help") {
        print_help();
        return Ok(());
    }
    let rest = &args[2..];

    let known = [
        "split", "score", "submit", "poll", "cancel", "merge", "reconcile", "status", "export",
        "aggregate", "run",
    ];
    if !known.contains(&command) {
        eprintln!("Unknown command: {}. Use 'sdglens help' for usage.", command);
        std::process::exit(1);
    }

    let state = AppState::open(&resolve_data_dir(rest))?;
    let code = match command {
        "split" => commands::split(&state, rest)?,
        "score" => commands::score(&state, rest)?,
        "submit" => commands::submit(&state, rest).await?,
        "poll" => commands::poll(&state, rest).await?,
        "cancel" => commands::cancel(&state, rest).await?,
        "merge" => commands::merge(&state).await?,
        "reconcile" => commands::reconcile(&state).await?,
        "status" => commands::status(&state)?,
        "export" => commands::export(&state)?,
        "aggregate" => commands::aggregate(&state)?,
        "run" => commands::run(&state, rest).await?,
        _ => unreachable!("command checked above"),
    };
    std::process::exit(code);
}
