//! Emitted divergence record.

use crate::core::event::OrdStatus;
use crate::core::recon_state::MismatchMask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DivergenceKind {
    MissingFill = 0,
    PhantomOrder = 1,
    StateMismatch = 2,
    QuantityMismatch = 3,
    TimingAnomaly = 4,
    MissingDropCopy = 5,
}

#[derive(Debug, Clone, Copy)]
pub struct Divergence {
    pub fingerprint: u64,
    pub kind: DivergenceKind,
    pub internal_status: OrdStatus,
    pub dropcopy_status: OrdStatus,
    pub internal_cum_qty: i64,
    pub dropcopy_cum_qty: i64,
    pub internal_avg_px_micros: i64,
    pub dropcopy_avg_px_micros: i64,
    pub internal_ts_ns: i64,
    pub dropcopy_ts_ns: i64,
    pub detect_tsc: u64,
    pub mismatch_mask: MismatchMask,
}
