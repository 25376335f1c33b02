//! Live reconciler service driver.
//!
//! The actual venue ingestion front-end (a FIX text parser and a published-messaging subscriber)
//! is deliberately outside the core and is not implemented here. This binary spawns the
//! reconciler and audit-writer threads and exposes their input rings; an ingestion front-end
//! wired in elsewhere pushes `ExecEvent`s into them. `--stub-input-dir` is a loopback/file-tailing
//! stand-in for local testing, reusing the replay engine to feed a wire-capture directory into the
//! same rings. For a fully self-contained, deterministic run use `replay` instead, which drives
//! the same [`exec_reconciler::service::Service`] and then shuts down once the input is exhausted.

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::Context;
use clap::Parser;
use exec_reconciler::config::RunConfig;
use exec_reconciler::replay::{Pacing, ReplayConfig, ReplayEngine};
use exec_reconciler::service::Service;

#[derive(Parser, Debug)]
#[command(name = "reconciler")]
#[command(about = "Live execution-report reconciliation service")]
struct Args {
    /// TOML configuration file. Falls back to built-in defaults if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `audit_output_dir` from the config file.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Local-testing stub producer: feeds a wire-capture directory into the live rings instead of
    /// waiting for a real FIX/messaging front-end. Not a substitute for one in production.
    #[arg(long)]
    stub_input_dir: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("reconciler=info".parse().unwrap()))
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
    if let Some(dir) = args.output_dir {
        run_cfg.audit_output_dir = dir;
    }

    let service = match Service::spawn(run_cfg.service_config()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to start reconciler service");
            return 3;
        }
    };

    tracing::info!("reconciler service started; waiting for an external ingestion front-end to feed its rings");
    let stop = service.stop_flag();
    install_signal_handler();

    // An auxiliary, non-hot-path channel: the stub producer signals completion here so the main
    // loop can log it without polling the thread handle directly.
    let (stub_done_tx, stub_done_rx) = crossbeam::channel::bounded::<()>(1);
    let stub_thread = args.stub_input_dir.map(|dir| {
        let handles = service.producer_handles();
        tracing::info!(dir = %dir.display(), "starting local-testing stub producer");
        std::thread::spawn(move || {
            let cfg = ReplayConfig { directory: Some(dir), pacing: Pacing::Fast, ..ReplayConfig::default() };
            let mut engine = ReplayEngine::new(cfg, handles.primary_ring, handles.dropcopy_ring);
            // The stub only feeds events; it never signals `stop` itself, since a live reconciler
            // keeps running after its (finite) local test input is exhausted.
            let local_stop = std::sync::atomic::AtomicBool::new(false);
            match engine.run(&local_stop) {
                Ok(counters) => tracing::info!(?counters, "stub producer finished"),
                Err(e) => tracing::error!(error = %e, "stub producer failed"),
            }
            let _ = stub_done_tx.send(());
        })
    });

    while !SHUTDOWN_REQUESTED.load(Ordering::Relaxed) {
        if stub_done_rx.try_recv().is_ok() {
            tracing::info!("stub producer drained its input; still waiting for a shutdown signal");
        }
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
    stop.store(true, Ordering::Release);

    if let Some(handle) = stub_thread {
        let _ = handle.join();
    }

    let counters = service.shutdown();
    tracing::info!(?counters, "reconciler service stopped");
    0
}

static SHUTDOWN_REQUESTED: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Release);
}

fn install_signal_handler() {
    unsafe {
        libc::signal(libc::SIGINT, on_shutdown_signal as usize as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_shutdown_signal as usize as libc::sighandler_t);
    }
}
