//! Order status transition validator.

use crate::core::event::OrdStatus;

/// Whether `from -> to` is a legal status transition. `Unknown` accepts any first status;
/// terminal statuses accept no outward transition; identical statuses are always accepted
/// (idempotent re-delivery).
pub fn is_valid_transition(from: OrdStatus, to: OrdStatus) -> bool {
    use OrdStatus::*;

    if from == to {
        return true;
    }
    if from.is_terminal() {
        return false;
    }

    match from {
        Unknown => true,
        New | PendingNew => matches!(to, Working | PartiallyFilled | Filled | CancelPending | Rejected),
        Working => matches!(to, PartiallyFilled | Filled | CancelPending | Rejected),
        PartiallyFilled => matches!(to, PartiallyFilled | Filled | CancelPending),
        CancelPending => matches!(to, Canceled | Rejected | PartiallyFilled | Filled),
        Replaced => matches!(to, Working | PartiallyFilled | Filled | CancelPending | Rejected),
        Filled | Canceled | Rejected => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrdStatus::*;

    #[test]
    fn unknown_accepts_any_first_status() {
        assert!(is_valid_transition(Unknown, New));
        assert!(is_valid_transition(Unknown, Filled));
    }

    #[test]
    fn terminal_statuses_reject_everything_but_self() {
        assert!(!is_valid_transition(Filled, Working));
        assert!(is_valid_transition(Filled, Filled));
        assert!(!is_valid_transition(Canceled, New));
        assert!(!is_valid_transition(Rejected, Working));
    }

    #[test]
    fn new_to_filled_directly_is_legal() {
        assert!(is_valid_transition(New, Filled));
    }

    #[test]
    fn new_to_replaced_is_illegal() {
        assert!(!is_valid_transition(New, Replaced));
    }

    #[test]
    fn partially_filled_cannot_go_back_to_working() {
        assert!(!is_valid_transition(PartiallyFilled, Working));
    }

    #[test]
    fn cancel_pending_can_still_fill() {
        assert!(is_valid_transition(CancelPending, Filled));
        assert!(is_valid_transition(CancelPending, Canceled));
    }
}
