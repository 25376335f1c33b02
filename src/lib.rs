//! Execution reconciliation core.
//!
//! Reconciles a PRIMARY execution-report stream against a DROPCOPY echo stream and raises a
//! confirmed divergence whenever the two views of an order disagree beyond a grace window,
//! unless the disagreement is explained by a known sequence gap.
//!
//! [`core`] holds the data model and the single-threaded decision loop. [`persist`] holds the
//! durable audit log and the wire-capture format that deterministic replay reads back.
//! [`replay`] is the time-controlled producer that feeds a wire log into the same reconciler a
//! live run would use. [`service`] wires the reconciler and audit-writer threads together with
//! the shutdown protocol. [`config`] is the externally-configurable surface, loaded from TOML.

pub mod config;
pub mod core;
pub mod persist;
pub mod replay;
pub mod service;
