//! Top-level run configuration: a TOML file (with CLI overrides layered on by each driver) that
//! is the only externally-configurable surface of the core. Internally this expands into
//! [`ReconConfig`] and [`AuditLogConfig`], which use `Duration`/`PathBuf` directly; `RunConfig`
//! sticks to plain numeric/string fields so it round-trips through `toml` cleanly.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::config::ReconConfig;
use crate::persist::audit_writer::AuditLogConfig;
use crate::service::ServiceConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub store_capacity: usize,
    pub exec_ring_capacity: usize,
    pub emission_ring_capacity: usize,

    pub grace_period_ns: u64,
    pub gap_recheck_period_ns: u64,
    pub divergence_dedup_window_ns: u64,
    pub qty_tolerance: i64,
    pub px_tolerance: i64,
    pub timing_slack_ns: u64,
    pub gap_close_timeout_ns: u64,
    pub enable_windowed_recon: bool,
    pub enable_gap_suppression: bool,

    pub audit_output_dir: PathBuf,
    pub audit_rotate_max_bytes: u64,
    pub audit_rotate_interval_secs: u64,
    pub audit_batch_max_records: usize,
    pub audit_batch_max_bytes: usize,
    pub audit_flush_idle_timeout_ms: u64,
    pub audit_staging_buffer_bytes: usize,
    pub audit_shutdown_grace_secs: u64,
    pub audit_degraded_backoff_start_secs: u64,
    pub audit_degraded_backoff_max_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        let recon = ReconConfig::default();
        let audit = AuditLogConfig::default();
        Self {
            store_capacity: 1 << 20,
            exec_ring_capacity: crate::service::DEFAULT_EXEC_RING_CAPACITY,
            emission_ring_capacity: crate::service::DEFAULT_EMISSION_RING_CAPACITY,
            grace_period_ns: recon.grace_period_ns,
            gap_recheck_period_ns: recon.gap_recheck_period_ns,
            divergence_dedup_window_ns: recon.divergence_dedup_window_ns,
            qty_tolerance: recon.qty_tolerance,
            px_tolerance: recon.px_tolerance,
            timing_slack_ns: recon.timing_slack_ns,
            gap_close_timeout_ns: recon.gap_close_timeout_ns,
            enable_windowed_recon: recon.enable_windowed_recon,
            enable_gap_suppression: recon.enable_gap_suppression,
            audit_output_dir: audit.output_dir,
            audit_rotate_max_bytes: audit.rotate_max_bytes,
            audit_rotate_interval_secs: audit.rotate_interval.as_secs(),
            audit_batch_max_records: audit.batch_max_records,
            audit_batch_max_bytes: audit.batch_max_bytes,
            audit_flush_idle_timeout_ms: audit.flush_idle_timeout.as_millis() as u64,
            audit_staging_buffer_bytes: audit.staging_buffer_bytes,
            audit_shutdown_grace_secs: audit.shutdown_grace.as_secs(),
            audit_degraded_backoff_start_secs: audit.degraded_backoff_start.as_secs(),
            audit_degraded_backoff_max_secs: audit.degraded_backoff_max.as_secs(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "could not read config file: {e}"),
            Self::Parse(e) => write!(f, "could not parse config file: {e}"),
        }
    }
}
impl std::error::Error for ConfigError {}

impl RunConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&text).map_err(ConfigError::Parse)
    }

    pub fn recon_config(&self) -> ReconConfig {
        ReconConfig {
            grace_period_ns: self.grace_period_ns,
            gap_recheck_period_ns: self.gap_recheck_period_ns,
            divergence_dedup_window_ns: self.divergence_dedup_window_ns,
            qty_tolerance: self.qty_tolerance,
            px_tolerance: self.px_tolerance,
            timing_slack_ns: self.timing_slack_ns,
            gap_close_timeout_ns: self.gap_close_timeout_ns,
            enable_windowed_recon: self.enable_windowed_recon,
            enable_gap_suppression: self.enable_gap_suppression,
        }
    }

    pub fn audit_config(&self) -> AuditLogConfig {
        AuditLogConfig {
            output_dir: self.audit_output_dir.clone(),
            rotate_max_bytes: self.audit_rotate_max_bytes,
            rotate_interval: Duration::from_secs(self.audit_rotate_interval_secs),
            batch_max_records: self.audit_batch_max_records,
            batch_max_bytes: self.audit_batch_max_bytes,
            flush_idle_timeout: Duration::from_millis(self.audit_flush_idle_timeout_ms),
            staging_buffer_bytes: self.audit_staging_buffer_bytes,
            shutdown_grace: Duration::from_secs(self.audit_shutdown_grace_secs),
            degraded_backoff_start: Duration::from_secs(self.audit_degraded_backoff_start_secs),
            degraded_backoff_max: Duration::from_secs(self.audit_degraded_backoff_max_secs),
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            store_capacity: self.store_capacity,
            exec_ring_capacity: self.exec_ring_capacity,
            emission_ring_capacity: self.emission_ring_capacity,
            recon: self.recon_config(),
            audit: self.audit_config(),
            calibration_window: Duration::from_millis(100),
            ..ServiceConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = RunConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let parsed: RunConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.grace_period_ns, cfg.grace_period_ns);
        assert_eq!(parsed.audit_output_dir, cfg.audit_output_dir);
    }

    #[test]
    fn partial_toml_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "grace_period_ns = 250000000\n").unwrap();

        let cfg = RunConfig::load(&path).unwrap();
        assert_eq!(cfg.grace_period_ns, 250_000_000);
        assert_eq!(cfg.gap_recheck_period_ns, RunConfig::default().gap_recheck_period_ns);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = RunConfig::load(std::path::Path::new("/nonexistent/run.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
