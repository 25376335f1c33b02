//! Thread wiring for a live run: exactly three hot threads (primary ingestor, drop-copy
//! ingestor, reconciler) plus the audit writer. The ingestors are external collaborators (FIX
//! parser, messaging subscriber, or — in replay — [`crate::replay::ReplayEngine`]); this module
//! owns the reconciler and writer threads, the rings between them, and the single `stop_flag`
//! that gates shutdown.
//!
//! Join order on shutdown matters for correctness: producers first, reconciler next, writer
//! last, so nothing is dropped that the writer could still have persisted.
//!
//! The reconciler and writer threads can each be pinned to a CPU core via `core_affinity`, the
//! same optional-pinning shape a hot ingest thread typically uses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::core::clock::{Clock, CycleConversion, QuantaClock};
use crate::core::config::ReconConfig;
use crate::core::divergence::Divergence;
use crate::core::event::ExecEvent;
use crate::core::reconciler::{ReconCounters, Reconciler};
use crate::core::ring::SpscRing;
use crate::core::sequence::SequenceGapEvent;
use crate::core::store::StoreError;
use crate::persist::audit_writer::{AuditLogConfig, AuditLogCounters, AuditLogWriter};

/// Exec rings (producer -> reconciler) default to 2^16 entries; emission rings (reconciler ->
/// writer) default to 4096.
pub const DEFAULT_EXEC_RING_CAPACITY: usize = 1 << 16;
pub const DEFAULT_EMISSION_RING_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub store_capacity: usize,
    pub exec_ring_capacity: usize,
    pub emission_ring_capacity: usize,
    pub recon: ReconConfig,
    pub audit: AuditLogConfig,
    /// Calibration window for the cycles<->ns conversion factor; ignored if a `CycleConversion`
    /// is supplied directly via [`Service::spawn_with_clock`].
    pub calibration_window: Duration,
    /// Optional CPU cores to pin the reconciler and audit-writer threads to. `None` leaves thread
    /// placement to the OS scheduler.
    pub pin_reconciler_core: Option<core_affinity::CoreId>,
    pub pin_writer_core: Option<core_affinity::CoreId>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            store_capacity: 1 << 20,
            exec_ring_capacity: DEFAULT_EXEC_RING_CAPACITY,
            emission_ring_capacity: DEFAULT_EMISSION_RING_CAPACITY,
            recon: ReconConfig::default(),
            audit: AuditLogConfig::default(),
            calibration_window: Duration::from_millis(100),
            pin_reconciler_core: None,
            pin_writer_core: None,
        }
    }
}

#[derive(Debug)]
pub enum ServiceError {
    Store(StoreError),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "service construction failed: {e:?}"),
        }
    }
}
impl std::error::Error for ServiceError {}

/// The rings a producer (live ingestor or [`crate::replay::ReplayEngine`]) needs to feed the
/// reconciler, plus the shared stop flag it should watch.
pub struct ProducerHandles {
    pub primary_ring: Arc<SpscRing<ExecEvent>>,
    pub dropcopy_ring: Arc<SpscRing<ExecEvent>>,
    pub stop: Arc<AtomicBool>,
}

/// Owns the reconciler and audit-writer threads for one run. Construct with [`Service::spawn`],
/// hand [`Service::producer_handles`] to whatever feeds events in, then call [`Service::shutdown`]
/// once the producer side is done.
pub struct Service {
    stop: Arc<AtomicBool>,
    primary_ring: Arc<SpscRing<ExecEvent>>,
    dropcopy_ring: Arc<SpscRing<ExecEvent>>,
    reconciler_thread: Option<JoinHandle<ReconCounters>>,
    writer_thread: Option<JoinHandle<()>>,
    audit_counters: Arc<AuditLogCounters>,
}

impl Service {
    /// Spawns the reconciler and writer threads using a freshly calibrated [`QuantaClock`].
    pub fn spawn(cfg: ServiceConfig) -> Result<Self, ServiceError> {
        let clock = QuantaClock::new();
        let conv = CycleConversion::calibrate(&clock, cfg.calibration_window);
        Self::spawn_with_clock(cfg, clock, conv)
    }

    /// Spawns with an explicit clock and conversion factor — used by tests (an identity
    /// conversion avoids the real calibration sleep) and by the replay driver (which shares one
    /// clock between the replay producer and the reconciler for consistent pacing).
    pub fn spawn_with_clock(cfg: ServiceConfig, clock: QuantaClock, conv: CycleConversion) -> Result<Self, ServiceError> {
        let primary_ring = Arc::new(SpscRing::<ExecEvent>::new(cfg.exec_ring_capacity));
        let dropcopy_ring = Arc::new(SpscRing::<ExecEvent>::new(cfg.exec_ring_capacity));
        let divergence_ring = Arc::new(SpscRing::<Divergence>::new(cfg.emission_ring_capacity));
        let gap_ring = Arc::new(SpscRing::<SequenceGapEvent>::new(cfg.emission_ring_capacity));

        let mut reconciler = Reconciler::new(
            cfg.store_capacity,
            primary_ring.clone(),
            dropcopy_ring.clone(),
            divergence_ring.clone(),
            gap_ring.clone(),
            conv,
            cfg.recon,
        )
        .map_err(ServiceError::Store)?;

        let mut writer = AuditLogWriter::new(cfg.audit.clone(), divergence_ring, gap_ring);
        let audit_counters = writer.counters();

        let stop = Arc::new(AtomicBool::new(false));

        let recon_stop = stop.clone();
        let recon_clock = clock.clone();
        let recon_core = cfg.pin_reconciler_core;
        let reconciler_thread = std::thread::Builder::new()
            .name("reconciler".to_string())
            .spawn(move || {
                if let Some(core) = recon_core {
                    core_affinity::set_for_current(core);
                }
                reconciler.run(&recon_clock, &recon_stop);
                reconciler.counters()
            })
            .expect("failed to spawn reconciler thread");

        let writer_stop = stop.clone();
        let writer_clock = clock;
        let writer_core = cfg.pin_writer_core;
        let writer_thread = std::thread::Builder::new()
            .name("audit-writer".to_string())
            .spawn(move || {
                if let Some(core) = writer_core {
                    core_affinity::set_for_current(core);
                }
                writer.run(&writer_clock, &writer_stop);
            })
            .expect("failed to spawn audit writer thread");

        Ok(Self {
            stop,
            primary_ring,
            dropcopy_ring,
            reconciler_thread: Some(reconciler_thread),
            writer_thread: Some(writer_thread),
            audit_counters,
        })
    }

    /// Rings and stop flag for whatever is producing exec events (a live ingestor or a
    /// [`crate::replay::ReplayEngine`]).
    pub fn producer_handles(&self) -> ProducerHandles {
        ProducerHandles {
            primary_ring: self.primary_ring.clone(),
            dropcopy_ring: self.dropcopy_ring.clone(),
            stop: self.stop.clone(),
        }
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn audit_counters(&self) -> Arc<AuditLogCounters> {
        self.audit_counters.clone()
    }

    /// Signals shutdown and joins reconciler then writer, in that order. The caller is
    /// responsible for having already stopped and joined its producer thread(s) first; this
    /// drains whatever they left in the rings.
    pub fn shutdown(mut self) -> ReconCounters {
        self.stop.store(true, Ordering::Release);
        let recon_counters = self
            .reconciler_thread
            .take()
            .expect("reconciler thread already joined")
            .join()
            .expect("reconciler thread panicked");
        tracing::info!("reconciler thread joined");
        self.writer_thread
            .take()
            .expect("writer thread already joined")
            .join()
            .expect("audit writer thread panicked");
        tracing::info!("audit writer thread joined");
        recon_counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{ExecType, Ident, OrdStatus, Source};

    fn sample_event(source: Source, cl_ord_id: &str) -> ExecEvent {
        ExecEvent {
            source,
            session_id: 0,
            seq_num: 1,
            transact_time_ns: 1,
            sending_time_ns: 1,
            ingest_tsc: 0,
            exec_type: ExecType::New,
            ord_status: OrdStatus::New,
            cum_qty: 0,
            last_qty: 0,
            price_micros: 0,
            cl_ord_id: Ident::from_str(cl_ord_id),
            order_id: Ident::empty(),
            exec_id: Ident::empty(),
        }
    }

    #[test]
    fn end_to_end_event_flows_through_to_counters() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ServiceConfig {
            audit: AuditLogConfig {
                output_dir: dir.path().to_path_buf(),
                flush_idle_timeout: Duration::from_millis(1),
                ..AuditLogConfig::default()
            },
            ..ServiceConfig::default()
        };
        let clock = QuantaClock::new();
        let service = Service::spawn_with_clock(cfg, clock, CycleConversion::identity()).unwrap();

        let handles = service.producer_handles();
        handles.primary_ring.try_push(sample_event(Source::Primary, "SVC1"));
        handles.dropcopy_ring.try_push(sample_event(Source::DropCopy, "SVC1"));

        // Give the reconciler thread a moment to observe and match the order.
        std::thread::sleep(Duration::from_millis(50));

        let counters = service.shutdown();
        assert_eq!(counters.internal_events, 1);
        assert_eq!(counters.dropcopy_events, 1);
        assert_eq!(counters.orders_matched, 1);
    }
}
