//! Per-order reconciliation state and the open-addressed store that indexes it.

use crate::core::arena::{Arena, ArenaHandle};
use crate::core::event::{make_order_key, ExecEvent, OrdStatus};
use crate::core::recon_state::{MismatchMask, ReconState};

/// One side's view of an order (internal-from-primary or external-from-dropcopy).
#[derive(Debug, Clone, Copy)]
pub struct SideView {
    pub seen: bool,
    pub session_id: u16,
    pub status: OrdStatus,
    pub cum_qty: i64,
    pub last_qty: i64,
    pub avg_px_micros: i64,
    pub last_event_ts_ns: i64,
    pub last_exec_id_hash: u64,
}

impl SideView {
    fn zeroed() -> Self {
        Self {
            seen: false,
            session_id: 0,
            status: OrdStatus::Unknown,
            cum_qty: 0,
            last_qty: 0,
            avg_px_micros: 0,
            last_event_ts_ns: 0,
            last_exec_id_hash: 0,
        }
    }
}

/// Full per-order reconciliation record. Trivially copyable, owned exclusively by the
/// reconciler thread.
#[derive(Debug, Clone, Copy)]
pub struct OrderState {
    pub fingerprint: u64,
    pub internal: SideView,
    pub dropcopy: SideView,
    pub recon_state: ReconState,
    pub mismatch: MismatchMask,
    pub mismatch_first_seen_tsc: u64,
    pub recon_deadline_tsc: u64,
    pub timer_generation: u64,
    pub timer_scheduled: bool,
    /// Gap epoch each side was tagged with at the moment a suppression was applied; `0` means
    /// "never tagged" (epoch `0` is the sentinel "no gap ever" value).
    pub gap_suppression_epoch_primary: u32,
    pub gap_suppression_epoch_dropcopy: u32,
    pub last_emitted_mask: MismatchMask,
    pub last_emitted_tsc: u64,
    pub illegal_transition_count: u32,
}

impl OrderState {
    pub fn zeroed() -> Self {
        Self {
            fingerprint: 0,
            internal: SideView::zeroed(),
            dropcopy: SideView::zeroed(),
            recon_state: ReconState::Unknown,
            mismatch: MismatchMask::empty(),
            mismatch_first_seen_tsc: 0,
            recon_deadline_tsc: 0,
            timer_generation: 0,
            timer_scheduled: false,
            gap_suppression_epoch_primary: 0,
            gap_suppression_epoch_dropcopy: 0,
            last_emitted_mask: MismatchMask::empty(),
            last_emitted_tsc: 0,
            illegal_transition_count: 0,
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    InvalidCapacity,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCapacity => write!(f, "order state store capacity must be non-zero"),
        }
    }
}
impl std::error::Error for StoreError {}

fn next_power_of_two(n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    n.next_power_of_two()
}

/// Open-addressed hash map from order fingerprint to [`ArenaHandle`], backed by an [`Arena`].
/// Bucket count is `next_power_of_two(2 * capacity_hint)`; linear probing is capped at
/// `min(bucket_count, 64)` to bound worst-case latency.
pub struct OrderStateStore {
    arena: Arena,
    buckets: Vec<Option<(u64, ArenaHandle)>>,
    max_probe: usize,
    overflow_count: u64,
}

impl OrderStateStore {
    pub fn new(capacity_hint: usize) -> Result<Self, StoreError> {
        if capacity_hint == 0 {
            return Err(StoreError::InvalidCapacity);
        }
        let bucket_count = next_power_of_two(capacity_hint.saturating_mul(2));
        let max_probe = bucket_count.min(64);
        Ok(Self {
            arena: Arena::with_capacity(capacity_hint),
            buckets: vec![None; bucket_count],
            max_probe,
            overflow_count: 0,
        })
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    fn slot_for(&self, key: u64) -> usize {
        (key as usize) & (self.buckets.len() - 1)
    }

    /// Finds or creates the order state for `event`'s ClOrdID. Returns `None` on probe
    /// exhaustion or arena exhaustion; caller counts and drops the event.
    pub fn upsert(&mut self, event: &ExecEvent) -> Option<(u64, ArenaHandle)> {
        let key = make_order_key(&event.cl_ord_id);
        let start = self.slot_for(key);
        for probe in 0..self.max_probe {
            let idx = (start + probe) & (self.buckets.len() - 1);
            match self.buckets[idx] {
                Some((k, h)) if k == key => return Some((key, h)),
                None => {
                    let handle = match self.arena.allocate() {
                        Some(h) => h,
                        None => {
                            self.overflow_count += 1;
                            return None;
                        }
                    };
                    self.arena.get_mut(handle).fingerprint = key;
                    self.buckets[idx] = Some((key, handle));
                    return Some((key, handle));
                }
                Some(_) => continue,
            }
        }
        self.overflow_count += 1;
        None
    }

    pub fn find(&self, key: u64) -> Option<ArenaHandle> {
        let start = self.slot_for(key);
        for probe in 0..self.max_probe {
            let idx = (start + probe) & (self.buckets.len() - 1);
            match self.buckets[idx] {
                Some((k, h)) if k == key => return Some(h),
                None => return None,
                Some(_) => continue,
            }
        }
        None
    }

    pub fn get(&self, handle: ArenaHandle) -> &OrderState {
        self.arena.get(handle)
    }

    pub fn get_mut(&mut self, handle: ArenaHandle) -> &mut OrderState {
        self.arena.get_mut(handle)
    }

    /// Resets the arena and clears every bucket in one pass (end-of-day refresh).
    pub fn reset_epoch(&mut self) {
        self.arena.reset();
        for b in self.buckets.iter_mut() {
            *b = None;
        }
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{ExecType, Ident, Source};

    fn event_with_cl_ord_id(id: &str) -> ExecEvent {
        ExecEvent {
            source: Source::Primary,
            session_id: 0,
            seq_num: 1,
            transact_time_ns: 1,
            sending_time_ns: 1,
            ingest_tsc: 1,
            exec_type: ExecType::New,
            ord_status: OrdStatus::New,
            cum_qty: 0,
            last_qty: 0,
            price_micros: 0,
            cl_ord_id: Ident::from_str(id),
            order_id: Ident::empty(),
            exec_id: Ident::empty(),
        }
    }

    #[test]
    fn upsert_is_idempotent_for_same_id() {
        let mut store = OrderStateStore::new(16).unwrap();
        let e = event_with_cl_ord_id("CID1");
        let (k1, h1) = store.upsert(&e).unwrap();
        let (k2, h2) = store.upsert(&e).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(h1, h2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn find_returns_none_for_unknown_key() {
        let store = OrderStateStore::new(16).unwrap();
        assert!(store.find(0xdead_beef).is_none());
    }

    #[test]
    fn reset_epoch_clears_everything() {
        let mut store = OrderStateStore::new(16).unwrap();
        let e = event_with_cl_ord_id("CID1");
        store.upsert(&e).unwrap();
        assert_eq!(store.len(), 1);
        store.reset_epoch();
        assert_eq!(store.len(), 0);
        assert!(store.find(make_order_key(&e.cl_ord_id)).is_none());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(OrderStateStore::new(0).is_err());
    }

    #[test]
    fn overflow_increments_counter_not_panics() {
        let mut store = OrderStateStore::new(1).unwrap();
        for i in 0..100u32 {
            let e = event_with_cl_ord_id(&format!("CID{i}"));
            let _ = store.upsert(&e);
        }
        assert!(store.overflow_count() > 0);
    }
}
