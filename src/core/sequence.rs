//! Per-(source, session) gap/duplicate/out-of-order classification.

use crate::core::event::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GapKind {
    Gap = 0,
    Duplicate = 1,
    OutOfOrder = 2,
    GapFill = 3,
}

#[derive(Debug, Clone, Copy)]
pub struct SequenceGapEvent {
    pub source: Source,
    pub session_id: u16,
    pub kind: GapKind,
    pub expected_seq: u64,
    pub seen_seq: u64,
    pub detect_ts_ns: u64,
    /// Whether this observation closed a previously open gap.
    pub closed_gap: bool,
}

#[derive(Debug, Clone, Copy)]
struct OpenGap {
    start: u64,
    end_exclusive: u64,
    detected_tsc: u64,
}

/// Tracks expected-next-sequence for one `(source, session)` pair.
pub struct SequenceTracker {
    initialized: bool,
    last_seen: u64,
    expected: u64,
    open_gap: Option<OpenGap>,
    /// Monotonically increasing; `0` is the sentinel "no gap has ever been open". Skips `0` on wrap.
    gap_epoch: u32,
    pub orders_in_gap_count: u64,
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self {
            initialized: false,
            last_seen: 0,
            expected: 0,
            open_gap: None,
            gap_epoch: 0,
            orders_in_gap_count: 0,
        }
    }

    pub fn gap_epoch(&self) -> u32 {
        self.gap_epoch
    }

    pub fn gap_open(&self) -> bool {
        self.open_gap.is_some()
    }

    fn bump_epoch(&mut self) -> u32 {
        self.gap_epoch = self.gap_epoch.wrapping_add(1);
        if self.gap_epoch == 0 {
            self.gap_epoch = 1;
        }
        self.gap_epoch
    }

    /// Feeds one observed sequence number. Returns the classified gap event, if any.
    pub fn track(
        &mut self,
        source: Source,
        session_id: u16,
        seq: u64,
        now_tsc: u64,
        now_ns: u64,
    ) -> Option<SequenceGapEvent> {
        if !self.initialized {
            self.initialized = true;
            self.last_seen = seq;
            self.expected = seq + 1;
            return None;
        }

        if seq == self.expected {
            let closed = self.maybe_close_gap(seq);
            self.last_seen = seq;
            self.expected = seq + 1;
            if closed {
                return Some(SequenceGapEvent {
                    source,
                    session_id,
                    kind: GapKind::GapFill,
                    expected_seq: seq,
                    seen_seq: seq,
                    detect_ts_ns: now_ns,
                    closed_gap: true,
                });
            }
            return None;
        }

        if seq > self.expected {
            let gap_start = self.expected;
            self.open_gap = Some(OpenGap {
                start: gap_start,
                end_exclusive: seq,
                detected_tsc: now_tsc,
            });
            self.bump_epoch();
            self.orders_in_gap_count = 0;
            self.last_seen = seq;
            self.expected = seq + 1;
            return Some(SequenceGapEvent {
                source,
                session_id,
                kind: GapKind::Gap,
                expected_seq: gap_start,
                seen_seq: seq,
                detect_ts_ns: now_ns,
                closed_gap: false,
            });
        }

        // seq < expected
        if seq == self.last_seen {
            return Some(SequenceGapEvent {
                source,
                session_id,
                kind: GapKind::Duplicate,
                expected_seq: self.expected,
                seen_seq: seq,
                detect_ts_ns: now_ns,
                closed_gap: false,
            });
        }

        if let Some(gap) = self.open_gap {
            if seq >= gap.start && seq < gap.end_exclusive {
                self.open_gap = None;
                return Some(SequenceGapEvent {
                    source,
                    session_id,
                    kind: GapKind::GapFill,
                    expected_seq: self.expected,
                    seen_seq: seq,
                    detect_ts_ns: now_ns,
                    closed_gap: true,
                });
            }
        }

        Some(SequenceGapEvent {
            source,
            session_id,
            kind: GapKind::OutOfOrder,
            expected_seq: self.expected,
            seen_seq: seq,
            detect_ts_ns: now_ns,
            closed_gap: false,
        })
    }

    /// `seq == expected` can still close a gap if the gap's end happens to equal `seq`.
    fn maybe_close_gap(&mut self, seq: u64) -> bool {
        if let Some(gap) = self.open_gap {
            if seq >= gap.start && seq < gap.end_exclusive {
                self.open_gap = None;
                return true;
            }
        }
        false
    }

    /// Closes an abandoned gap once it has been open longer than `timeout_tsc_delta`.
    /// Returns `true` if a gap was closed by this call.
    pub fn check_gap_timeout(&mut self, now_tsc: u64, timeout_tsc_delta: u64) -> bool {
        if let Some(gap) = self.open_gap {
            if now_tsc.saturating_sub(gap.detected_tsc) >= timeout_tsc_delta {
                self.open_gap = None;
                return true;
            }
        }
        false
    }
}
