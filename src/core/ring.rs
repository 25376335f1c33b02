//! Bounded single-producer/single-consumer ring buffer.
//!
//! Head and tail counters sit on separate cache lines to avoid false sharing between the
//! producer and the consumer threads. Never blocks, never allocates after construction: a full
//! push or an empty pop both return without the caller having to handle an error type.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

#[repr(align(64))]
struct CachePadded<T>(T);

pub struct SpscRing<T> {
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    /// `capacity` must be a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "SpscRing capacity must be a power of two");
        let mut v = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            v.push(UnsafeCell::new(MaybeUninit::uninit()));
        }
        Self {
            buf: v.into_boxed_slice(),
            mask: capacity - 1,
            head: CachePadded(AtomicUsize::new(0)),
            tail: CachePadded(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Producer-side only. Returns `false` if the ring is full.
    pub fn try_push(&self, value: T) -> bool
    where
        T: Copy,
    {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= self.buf.len() {
            return false;
        }
        let idx = head & self.mask;
        unsafe {
            (*self.buf[idx].get()).write(value);
        }
        self.head.0.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// Consumer-side only. Returns `None` if the ring is empty.
    pub fn try_pop(&self) -> Option<T>
    where
        T: Copy,
    {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        if tail == head {
            return None;
        }
        let idx = tail & self.mask;
        let value = unsafe { (*self.buf[idx].get()).assume_init() };
        self.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// Approximate occupancy; only meaningful as a hint when read concurrently.
    pub fn size_approx(&self) -> usize {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Relaxed);
        head.wrapping_sub(tail)
    }

    pub fn is_empty_approx(&self) -> bool {
        self.size_approx() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_preserves_order() {
        let ring: SpscRing<u32> = SpscRing::new(4);
        assert!(ring.try_push(1));
        assert!(ring.try_push(2));
        assert_eq!(ring.try_pop(), Some(1));
        assert_eq!(ring.try_pop(), Some(2));
        assert_eq!(ring.try_pop(), None);
    }

    #[test]
    fn full_ring_rejects_push() {
        let ring: SpscRing<u32> = SpscRing::new(2);
        assert!(ring.try_push(1));
        assert!(ring.try_push(2));
        assert!(!ring.try_push(3));
    }

    #[test]
    fn wraps_around_capacity() {
        let ring: SpscRing<u32> = SpscRing::new(2);
        for i in 0..100u32 {
            assert!(ring.try_push(i));
            assert_eq!(ring.try_pop(), Some(i));
        }
    }

    #[test]
    #[should_panic]
    fn non_power_of_two_capacity_panics() {
        let _ring: SpscRing<u32> = SpscRing::new(3);
    }

    #[test]
    fn concurrent_producer_consumer_delivers_all_in_order() {
        use std::sync::Arc;
        use std::thread;

        let ring: Arc<SpscRing<u64>> = Arc::new(SpscRing::new(1024));
        let producer_ring = ring.clone();
        const N: u64 = 50_000;
        let producer = thread::spawn(move || {
            let mut i = 0u64;
            while i < N {
                if producer_ring.try_push(i) {
                    i += 1;
                }
            }
        });
        let mut received = Vec::with_capacity(N as usize);
        while received.len() < N as usize {
            if let Some(v) = ring.try_pop() {
                received.push(v);
            }
        }
        producer.join().unwrap();
        assert_eq!(received, (0..N).collect::<Vec<_>>());
    }
}
