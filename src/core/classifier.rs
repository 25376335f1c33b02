//! Field-by-field mismatch detection and divergence-kind derivation.

use crate::core::config::ReconConfig;
use crate::core::divergence::DivergenceKind;
use crate::core::recon_state::MismatchMask;
use crate::core::store::{OrderState, SideView};

/// Computes the mismatch bitmask for the current state of an order.
///
/// `LEAVES_QTY` is not directly observable: the wire format carries no order quantity, only
/// cumulative fills, so "remaining" is approximated per side as that side's own last
/// `last_qty - cum_qty` delta (the gap between its most recent fill's slice and its running
/// total) compared across sides.
pub fn compute_mismatch(order: &OrderState, cfg: &ReconConfig) -> MismatchMask {
    let mut mask = MismatchMask::empty();
    let (i, d) = (&order.internal, &order.dropcopy);

    if i.seen != d.seen {
        mask.set(MismatchMask::EXISTENCE);
        // When only one side has been seen, other field comparisons are meaningless.
        return mask;
    }
    if !i.seen && !d.seen {
        return mask;
    }

    if i.status != d.status {
        mask.set(MismatchMask::STATUS);
    }
    if (i.cum_qty - d.cum_qty).abs() > cfg.qty_tolerance {
        mask.set(MismatchMask::CUM_QTY);
    }
    if (leaves(i) - leaves(d)).abs() > cfg.qty_tolerance {
        mask.set(MismatchMask::LEAVES_QTY);
    }
    if (i.avg_px_micros - d.avg_px_micros).abs() > cfg.px_tolerance {
        mask.set(MismatchMask::AVG_PX);
    }
    if i.last_exec_id_hash != 0 && d.last_exec_id_hash != 0 && i.last_exec_id_hash != d.last_exec_id_hash {
        mask.set(MismatchMask::EXEC_ID);
    }
    mask
}

fn leaves(side: &SideView) -> i64 {
    side.last_qty - side.cum_qty
}

/// Derives the divergence kind from the mismatch bitmask and seen-flags, in strict priority
/// order (ties broken by the earliest-matching rule).
pub fn classify_divergence(order: &OrderState, mask: MismatchMask) -> DivergenceKind {
    let (i, d) = (&order.internal, &order.dropcopy);

    if mask.has(MismatchMask::EXISTENCE) {
        if i.seen && !d.seen {
            return DivergenceKind::MissingDropCopy;
        }
        if d.seen && !i.seen {
            return DivergenceKind::PhantomOrder;
        }
    }

    if mask.has(MismatchMask::STATUS) {
        let dropcopy_past_primary =
            is_fill_status(d.status as u8) && !is_fill_status(i.status as u8);
        if dropcopy_past_primary {
            return DivergenceKind::MissingFill;
        }
        return DivergenceKind::StateMismatch;
    }

    if mask.has(MismatchMask::CUM_QTY) || mask.has(MismatchMask::AVG_PX) || mask.has(MismatchMask::LEAVES_QTY) {
        return DivergenceKind::QuantityMismatch;
    }

    DivergenceKind::TimingAnomaly
}

fn is_fill_status(status: u8) -> bool {
    use crate::core::event::OrdStatus::*;
    matches!(
        crate::core::event::OrdStatus::from_u8(status),
        PartiallyFilled | Filled
    )
}
