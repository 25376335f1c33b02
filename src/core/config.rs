//! Reconciliation tuning knobs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    pub grace_period_ns: u64,
    pub gap_recheck_period_ns: u64,
    pub divergence_dedup_window_ns: u64,
    pub qty_tolerance: i64,
    pub px_tolerance: i64,
    pub timing_slack_ns: u64,
    pub gap_close_timeout_ns: u64,
    pub enable_windowed_recon: bool,
    pub enable_gap_suppression: bool,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            grace_period_ns: 500_000_000,
            gap_recheck_period_ns: 100_000_000,
            divergence_dedup_window_ns: 1_000_000_000,
            qty_tolerance: 0,
            px_tolerance: 0,
            timing_slack_ns: 0,
            gap_close_timeout_ns: 1_000_000_000,
            enable_windowed_recon: true,
            enable_gap_suppression: true,
        }
    }
}
