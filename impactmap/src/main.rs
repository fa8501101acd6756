use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::Level;

use impactmap_core::orchestrator::{run, RunOptions};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Computes which e2e targets must re-run for the current change set.
///
/// Prints exactly one line to stdout: a JSON array of `{"name", "detections"?}`
/// entries sorted by name. Every flag can also be supplied through its
/// environment variable; a non-empty value counts as set.
#[derive(Parser)]
#[command(name = "impactmap")]
#[command(about = "Symbol-level change-impact analysis for Rush-style monorepos")]
struct Cli {
    /// Repository root to analyze.
    #[arg(long, default_value = ".")]
    repo_root: PathBuf,

    /// Baseline commit; overrides the branch comparison.
    #[arg(long, env = "COMPARE_COMMIT")]
    compare_commit: Option<String>,

    /// Branch to compute the merge base against.
    #[arg(long, env = "COMPARE_BRANCH", default_value = "origin/master")]
    compare_branch: String,

    /// Include type/interface-only changes in the analysis.
    #[arg(long)]
    include_types: bool,

    /// Track CSS/SCSS changes and propagate taint through style imports.
    #[arg(long)]
    include_css: bool,

    /// Comma-separated glob filter over target names (`*` matches any run
    /// of characters).
    #[arg(long, env = "TARGETS")]
    targets: Option<String>,

    /// BASIC for progress on stdout, DEBUG for tracing on stderr; anything
    /// else is silent except the final result.
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

/// An environment toggle counts as enabled on any non-empty value.
fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| !v.is_empty())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.log_level.as_deref().map(str::to_ascii_uppercase) {
        Some(level) if level == "BASIC" => {
            tracing_subscriber::fmt()
                .with_max_level(Level::INFO)
                .with_target(false)
                .with_writer(io::stdout)
                .init();
        }
        Some(level) if level == "DEBUG" => {
            tracing_subscriber::fmt()
                .with_max_level(Level::DEBUG)
                .with_writer(io::stderr)
                .init();
        }
        _ => {}
    }

    let opts = RunOptions {
        repo_root: cli.repo_root,
        compare_commit: cli.compare_commit.filter(|c| !c.is_empty()),
        compare_branch: cli.compare_branch,
        include_types: cli.include_types || env_flag("INCLUDE_TYPES"),
        include_css: cli.include_css || env_flag("INCLUDE_CSS"),
        targets_filter: cli.targets.filter(|t| !t.is_empty()),
    };

    let hits = run(&opts)?;
    println!("{}", serde_json::to_string(&hits)?);
    Ok(())
}
