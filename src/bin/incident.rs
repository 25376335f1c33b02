//! Incident runner: regenerates an audit directory from a wire-capture log and compares it
//! against a golden audit directory, or just compares two already-generated audit directories
//! directly.
//!
//! Two subcommands:
//!   `incident regenerate --input-dir CAP --golden-dir GOLDEN [--config CFG]` replays `CAP` into a
//!   scratch directory and diffs the result against `GOLDEN`.
//!   `incident compare --left DIR --right DIR` diffs two existing audit directories without
//!   running anything.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use exec_reconciler::config::RunConfig;
use exec_reconciler::core::clock::{CycleConversion, QuantaClock};
use exec_reconciler::persist::audit_diff::{diff_directories, AuditDiffOptions, DiffEntry};
use exec_reconciler::replay::{ReplayConfig, ReplayEngine};
use exec_reconciler::service::Service;

#[derive(Parser, Debug)]
#[command(name = "incident")]
#[command(about = "Regenerate or compare a golden audit directory")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Audit record fields to ignore when comparing (e.g. timestamps expected to vary run-to-run).
    #[arg(long = "ignore-field", global = true)]
    ignore_fields: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a wire-capture directory and diff the resulting audit output against a golden copy.
    Regenerate {
        #[arg(long)]
        input_dir: PathBuf,
        #[arg(long)]
        golden_dir: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Diff two existing audit directories.
    Compare {
        #[arg(long)]
        left: PathBuf,
        #[arg(long)]
        right: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("incident=info".parse().unwrap()))
        .init();

    let args = Args::parse();
    std::process::exit(run(args));
}

fn run(args: Args) -> i32 {
    let ignore_fields: Vec<&'static str> = args
        .ignore_fields
        .iter()
        .map(|s| Box::leak(s.clone().into_boxed_str()) as &'static str)
        .collect();
    let opts = AuditDiffOptions { ignore_fields };

    match args.command {
        Command::Compare { left, right } => report_diff(&left, &right, &opts),
        Command::Regenerate { input_dir, golden_dir, config } => {
            let scratch = match tempfile::tempdir() {
                Ok(d) => d,
                Err(e) => {
                    tracing::error!(error = %e, "failed to create scratch directory");
                    return 4;
                }
            };

            let mut run_cfg = match &config {
                Some(path) => match RunConfig::load(path).with_context(|| format!("loading config from {}", path.display())) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::error!(error = %format!("{e:#}"), "failed to load config");
                        return 3;
                    }
                },
                None => RunConfig::default(),
            };
            run_cfg.audit_output_dir = scratch.path().to_path_buf();

            let service = match Service::spawn_with_clock(
                run_cfg.service_config(),
                QuantaClock::new(),
                CycleConversion::identity(),
            ) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "failed to start reconciler service");
                    return 3;
                }
            };
            let handles = service.producer_handles();

            let replay_cfg = ReplayConfig { directory: Some(input_dir), ..ReplayConfig::default() };
            let mut engine = ReplayEngine::new(replay_cfg, handles.primary_ring, handles.dropcopy_ring);
            let replay_result = engine.run(&handles.stop);

            handles.stop.store(true, std::sync::atomic::Ordering::Release);
            let recon_counters = service.shutdown();

            match replay_result {
                Ok(counters) => tracing::info!(?counters, ?recon_counters, "regeneration replay finished"),
                Err(e) => {
                    tracing::error!(error = %e, "regeneration replay failed");
                    return 5;
                }
            }

            report_diff(scratch.path(), &golden_dir, &opts)
        }
    }
}

fn report_diff(left: &std::path::Path, right: &std::path::Path, opts: &AuditDiffOptions) -> i32 {
    let diffs = match diff_directories(left, right, opts) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, "failed to diff audit directories");
            return 4;
        }
    };

    if diffs.is_empty() {
        tracing::info!("no divergence: audit directories match");
        return 0;
    }

    for diff in &diffs {
        match diff {
            DiffEntry::MissingInRight { file, index } => {
                tracing::warn!(file, index, "record present on left only")
            }
            DiffEntry::MissingInLeft { file, index } => {
                tracing::warn!(file, index, "record present on right only")
            }
            DiffEntry::FieldMismatch { file, index, field, left, right } => {
                tracing::warn!(file, index, field, left, right, "field mismatch")
            }
            DiffEntry::FileCountMismatch { left_count, right_count } => {
                tracing::warn!(left_count, right_count, "file count mismatch")
            }
        }
    }
    tracing::error!(diff_count = diffs.len(), "audit directories diverge");
    2
}
