//! Normalized execution report and the fingerprint used to index it.

/// Which feed an [`ExecEvent`] arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Source {
    Primary = 0,
    DropCopy = 1,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::DropCopy => "dropcopy",
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Primary),
            1 => Some(Self::DropCopy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExecType {
    New = 0,
    PartialFill = 1,
    Fill = 2,
    Cancel = 3,
    Replace = 4,
    Rejected = 5,
    Unknown = 255,
}

impl ExecType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::New,
            1 => Self::PartialFill,
            2 => Self::Fill,
            3 => Self::Cancel,
            4 => Self::Replace,
            5 => Self::Rejected,
            _ => Self::Unknown,
        }
    }
}

/// Order status across the full FIX-style execution-report lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OrdStatus {
    Unknown = 0,
    New = 1,
    PendingNew = 2,
    Working = 3,
    PartiallyFilled = 4,
    Filled = 5,
    CancelPending = 6,
    Canceled = 7,
    Replaced = 8,
    Rejected = 9,
}

impl OrdStatus {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::New,
            2 => Self::PendingNew,
            3 => Self::Working,
            4 => Self::PartiallyFilled,
            5 => Self::Filled,
            6 => Self::CancelPending,
            7 => Self::Canceled,
            8 => Self::Replaced,
            9 => Self::Rejected,
            _ => Self::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected)
    }
}

/// A bounded-length identifier (ClOrdID / OrderID / ExecID), stored inline, never heap-owned.
#[derive(Debug, Clone, Copy)]
pub struct Ident {
    bytes: [u8; 32],
    len: u8,
}

impl Ident {
    pub const CAPACITY: usize = 32;

    pub fn empty() -> Self {
        Self { bytes: [0u8; 32], len: 0 }
    }

    pub fn from_slice(s: &[u8]) -> Self {
        let len = s.len().min(Self::CAPACITY);
        let mut bytes = [0u8; 32];
        bytes[..len].copy_from_slice(&s[..len]);
        Self { bytes, len: len as u8 }
    }

    pub fn from_str(s: &str) -> Self {
        Self::from_slice(s.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl PartialEq for Ident {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}
impl Eq for Ident {}

/// Normalized execution report. `Copy` so it can pass through rings by value.
#[derive(Debug, Clone, Copy)]
pub struct ExecEvent {
    pub source: Source,
    pub session_id: u16,
    pub seq_num: u64,
    pub transact_time_ns: i64,
    pub sending_time_ns: i64,
    pub ingest_tsc: u64,
    pub exec_type: ExecType,
    pub ord_status: OrdStatus,
    pub cum_qty: i64,
    pub last_qty: i64,
    pub price_micros: i64,
    pub cl_ord_id: Ident,
    pub order_id: Ident,
    pub exec_id: Ident,
}

impl ExecEvent {
    /// The timestamp that governs deadline math: `transact_time` if set, else `sending_time`.
    pub fn event_time_ns(&self) -> i64 {
        if self.transact_time_ns != 0 {
            self.transact_time_ns
        } else {
            self.sending_time_ns
        }
    }
}

/// 64-bit FNV-1a over the ClOrdID bytes. `0` is reserved as "empty" and is never returned;
/// a natural collision to zero is remapped to `1`.
pub fn make_order_key(cl_ord_id: &Ident) -> u64 {
    const OFFSET_BASIS: u64 = 14695981039346656037;
    const PRIME: u64 = 1099511628211;

    let mut hash = OFFSET_BASIS;
    for &b in cl_ord_id.as_bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    if hash == 0 {
        1
    } else {
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_never_zero() {
        assert_ne!(make_order_key(&Ident::empty()), 0);
        assert_ne!(make_order_key(&Ident::from_str("ABC123")), 0);
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = make_order_key(&Ident::from_str("CID1"));
        let b = make_order_key(&Ident::from_str("CID1"));
        assert_eq!(a, b);
        let c = make_order_key(&Ident::from_str("CID2"));
        assert_ne!(a, c);
    }

    #[test]
    fn ident_truncates_past_capacity() {
        let long = "X".repeat(64);
        let id = Ident::from_str(&long);
        assert_eq!(id.len(), 32);
    }

    #[test]
    fn event_time_prefers_transact_time() {
        let mut e = blank_event();
        e.transact_time_ns = 100;
        e.sending_time_ns = 50;
        assert_eq!(e.event_time_ns(), 100);
        e.transact_time_ns = 0;
        assert_eq!(e.event_time_ns(), 50);
    }

    fn blank_event() -> ExecEvent {
        ExecEvent {
            source: Source::Primary,
            session_id: 0,
            seq_num: 0,
            transact_time_ns: 0,
            sending_time_ns: 0,
            ingest_tsc: 0,
            exec_type: ExecType::New,
            ord_status: OrdStatus::New,
            cum_qty: 0,
            last_qty: 0,
            price_micros: 0,
            cl_ord_id: Ident::empty(),
            order_id: Ident::empty(),
            exec_id: Ident::empty(),
        }
    }
}
