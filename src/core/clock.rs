//! Monotonic time abstraction and the cycles<->nanoseconds conversion layer.
//!
//! All deadline math inside the reconciler runs in cycle-counter units; all configuration is
//! expressed in nanoseconds. The conversion factor is calibrated once at startup and applied
//! via Q32.32 fixed-point multiplication to keep the hot path branch-free and allocation-free.

use std::time::Duration;

/// Injectable clock source: production code uses [`QuantaClock`], tests use a manually-advanced
/// fake, mirroring the steady-clock/system-clock split most exec-engine clock abstractions use.
pub trait Clock: Send {
    /// Monotonic cycle-counter-equivalent ticks. Not wall-clock; only differences are meaningful.
    fn now_tsc(&self) -> u64;
    /// Wall-clock nanoseconds since the Unix epoch, used only for filenames and reporting.
    fn now_wall_ns(&self) -> i64;
}

/// Production clock backed by `quanta`, which already abstracts over TSC vs. a portable
/// monotonic fallback per platform — no hand-rolled `rdtsc` inline assembly needed. Cheap to
/// clone: every field is a plain counter or a copy of `quanta::Clock` itself, so each hot thread
/// (reconciler, writer) gets its own instance sharing the same calibration origin.
#[derive(Clone)]
pub struct QuantaClock {
    inner: quanta::Clock,
    start_wall_ns: i64,
    start_raw: u64,
}

impl QuantaClock {
    pub fn new() -> Self {
        let inner = quanta::Clock::new();
        let start_raw = inner.raw();
        let start_wall_ns = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64;
        Self {
            inner,
            start_wall_ns,
            start_raw,
        }
    }
}

impl Default for QuantaClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for QuantaClock {
    fn now_tsc(&self) -> u64 {
        self.inner.raw()
    }

    fn now_wall_ns(&self) -> i64 {
        let elapsed = self.inner.delta(self.start_raw, self.inner.raw());
        self.start_wall_ns + elapsed.as_nanos() as i64
    }
}

/// Q32.32 fixed-point cycles-per-nanosecond factor, computed once from a calibration window.
#[derive(Debug, Clone, Copy)]
pub struct CycleConversion {
    cycles_per_ns_q32_32: u64,
}

impl CycleConversion {
    /// Calibrates by sampling `clock` across `window`. Requires a non-trivial window
    /// (>= 100ms recommended) for a stable estimate; this is a one-time startup cost, never on
    /// the hot path.
    pub fn calibrate(clock: &dyn Clock, window: Duration) -> Self {
        let t0 = clock.now_tsc();
        let wall0 = clock.now_wall_ns();
        std::thread::sleep(window);
        let t1 = clock.now_tsc();
        let wall1 = clock.now_wall_ns();

        let cycles = t1.saturating_sub(t0).max(1);
        let ns = (wall1 - wall0).max(1) as u64;
        let cycles_per_ns_q32_32 = ((cycles as u128) << 32) / ns as u128;
        Self {
            cycles_per_ns_q32_32: cycles_per_ns_q32_32 as u64,
        }
    }

    /// A conversion that treats one cycle as one nanosecond; useful for tests and any platform
    /// where `quanta` already reports nanosecond-equivalent ticks.
    pub fn identity() -> Self {
        Self {
            cycles_per_ns_q32_32: 1u64 << 32,
        }
    }

    #[inline]
    pub fn ns_to_cycles(&self, ns: u64) -> u64 {
        (((ns as u128) * self.cycles_per_ns_q32_32 as u128) >> 32) as u64
    }

    #[inline]
    pub fn cycles_to_ns(&self, cycles: u64) -> u64 {
        (((cycles as u128) << 32) / self.cycles_per_ns_q32_32.max(1) as u128) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_conversion_is_lossless_for_round_numbers() {
        let c = CycleConversion::identity();
        assert_eq!(c.ns_to_cycles(1_000_000), 1_000_000);
        assert_eq!(c.cycles_to_ns(1_000_000), 1_000_000);
    }

    struct FakeClock {
        tsc: std::sync::atomic::AtomicU64,
    }
    impl Clock for FakeClock {
        fn now_tsc(&self) -> u64 {
            self.tsc.load(std::sync::atomic::Ordering::Relaxed)
        }
        fn now_wall_ns(&self) -> i64 {
            self.tsc.load(std::sync::atomic::Ordering::Relaxed) as i64
        }
    }

    #[test]
    fn fake_clock_supports_deterministic_tests() {
        let clock = FakeClock {
            tsc: std::sync::atomic::AtomicU64::new(42),
        };
        assert_eq!(clock.now_tsc(), 42);
        clock.tsc.store(100, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(clock.now_tsc(), 100);
    }
}
