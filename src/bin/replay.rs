//! Replay driver: reads a wire-capture directory (or explicit file list), drives the same
//! reconciler and audit writer a live run uses, and writes an audit directory. Two runs against
//! the same input and configuration must produce byte-identical audit output.

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::Context;
use clap::Parser;
use exec_reconciler::config::RunConfig;
use exec_reconciler::core::clock::{CycleConversion, QuantaClock};
use exec_reconciler::replay::{Pacing, ReplayConfig, ReplayEngine};
use exec_reconciler::service::Service;

#[derive(Parser, Debug)]
#[command(name = "replay")]
#[command(about = "Replay a wire-capture log through the reconciler and write an audit directory")]
struct Args {
    /// Directory of wire-capture files to scan (mutually exclusive with `--file`).
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Explicit wire-capture file(s); repeat for multiple. Overrides `--input-dir`.
    #[arg(long = "file")]
    files: Vec<PathBuf>,

    /// Directory to write the audit log into. Overrides the config file's `audit_output_dir`.
    #[arg(long)]
    output_dir: PathBuf,

    /// TOML configuration file for reconciliation tuning. Defaults if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Lower bound (inclusive) on `capture_ts_ns`.
    #[arg(long)]
    from_ns: Option<u64>,

    /// Upper bound (exclusive) on `capture_ts_ns`.
    #[arg(long)]
    to_ns: Option<u64>,

    /// Replay as fast as the rings accept records, ignoring original pacing.
    #[arg(long)]
    fast: bool,

    /// Playback speed multiplier (ignored if `--fast` is set).
    #[arg(long, default_value_t = 1.0)]
    speed: f64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("replay=info".parse().unwrap()))
        .init();

    let args = Args::parse();
    std::process::exit(run(args));
}

fn run(args: Args) -> i32 {
    let mut run_cfg = match &args.config {
        Some(path) => match RunConfig::load(path).with_context(|| format!("loading config from {}", path.display())) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "failed to load config");
                return 3;
            }
        },
        None => RunConfig::default(),
    };
    run_cfg.audit_output_dir = args.output_dir;

    if args.input_dir.is_none() && args.files.is_empty() {
        tracing::error!("one of --input-dir or --file is required");
        return 3;
    }

    // Share one clock/conversion between the replay producer and the reconciler so the
    // deadline math and the replay's own pacing agree on what "now" means.
    let clock = QuantaClock::new();
    let conv = CycleConversion::identity();

    let service = match Service::spawn_with_clock(run_cfg.service_config(), clock, conv) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to start reconciler service");
            return 3;
        }
    };
    let handles = service.producer_handles();

    let replay_cfg = ReplayConfig {
        files: args.files,
        directory: args.input_dir,
        from_ns: args.from_ns,
        to_ns: args.to_ns,
        pacing: if args.fast { Pacing::Fast } else { Pacing::Speed(args.speed) },
        ..ReplayConfig::default()
    };
    let mut engine = ReplayEngine::new(replay_cfg, handles.primary_ring, handles.dropcopy_ring);

    let replay_result = engine.run(&handles.stop);

    // Shutdown order: producer (the replay engine, already finished synchronously above)
    // first, reconciler next, writer last.
    handles.stop.store(true, Ordering::Release);
    let recon_counters = service.shutdown();

    match replay_result {
        Ok(counters) => {
            tracing::info!(?counters, ?recon_counters, "replay finished");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "replay failed");
            5
        }
    }
}
