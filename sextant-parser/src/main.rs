//! Sextant parser - batch driver.
//!
//! Discovers the workspace, imports a build log, parses every outstanding
//! build action and clusters ambiguous symbols into the workspace database.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sextant_parser::config::SextantConfig;
use sextant_parser::{Database, Pipeline, RunOptions};

/// Parse build actions and cluster ambiguous symbols
#[derive(Parser, Debug)]
#[command(name = "sextant-parser")]
#[command(about = "Parse build actions and cluster ambiguous symbols")]
#[command(version)]
struct Cli {
    /// Workspace root to discover
    #[arg(default_value = ".")]
    root: PathBuf,

    /// Path to the workspace database
    #[arg(long, env = "SEXTANT_DATABASE")]
    database: Option<PathBuf>,

    /// Build log to import (compilation database or native action list)
    #[arg(long)]
    build_log: Option<PathBuf>,

    /// Cluster worker pool size
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Skip clustering
    #[arg(long)]
    no_cluster: bool,

    /// Dispatch whole commands to parsers instead of single files
    #[arg(long)]
    whole_command: bool,

    /// Configuration file (default: sextant.toml in the root)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).compact())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    let root = cli.root.canonicalize().unwrap_or_else(|_| cli.root.clone());

    let mut config = match &cli.config {
        Some(path) => SextantConfig::from_file(path)?,
        None => SextantConfig::load(&root),
    };
    if let Some(jobs) = cli.jobs {
        config.cluster.jobs = Some(jobs);
    }
    if cli.no_cluster {
        config.cluster.enabled = false;
    }
    if cli.whole_command {
        config.parse.whole_command = true;
    }
    config.validate()?;

    let db_path = cli
        .database
        .unwrap_or_else(|| root.join(".sextant").join("workspace.duckdb"));
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let db = Arc::new(Database::open(&db_path)?);
    tracing::info!("Using database {:?}", db_path);

    let mut options = RunOptions::new(&root);
    if let Some(log) = cli.build_log {
        options = options.with_build_log(log);
    }

    let pipeline = Pipeline::new(db, config);
    let mut last_percent = None;
    let summary = pipeline.run(&options, |current, total| {
        let percent = (current * 100).checked_div(total).unwrap_or(100);
        if last_percent != Some(percent / 10) {
            last_percent = Some(percent / 10);
            tracing::info!("Scheduled {}/{} files ({}%)", current, total, percent);
        }
    })?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "parsed: {} succeeded, {} failed, {} deferred, {} partial",
            summary.parse.succeeded,
            summary.parse.failed,
            summary.parse.deferred,
            summary.parse.partial
        );
        println!(
            "actions: {} scheduled, {} links, {} skipped",
            summary.schedule.tasks, summary.schedule.links, summary.schedule.skipped
        );
        if let Some(cluster) = &summary.cluster {
            println!(
                "clusters: {} files ({} concerned, {} excluded)",
                cluster.clustered, cluster.concerned, cluster.excluded
            );
        }
    }
    Ok(())
}
