//! The reconciliation core: data model, state stores, timers, and the decision loop.
//!
//! Everything here is owned by a single thread at runtime; nothing in this module acquires a
//! lock or performs I/O.

pub mod arena;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod divergence;
pub mod event;
pub mod lifecycle;
pub mod reconciler;
pub mod recon_state;
pub mod ring;
pub mod sequence;
pub mod store;
pub mod wheel;

pub use config::ReconConfig;
pub use divergence::{Divergence, DivergenceKind};
pub use event::{make_order_key, ExecEvent, ExecType, Ident, OrdStatus, Source};
pub use reconciler::{ReconCounters, Reconciler};
pub use recon_state::{MismatchMask, ReconState};
pub use sequence::{GapKind, SequenceGapEvent, SequenceTracker};
