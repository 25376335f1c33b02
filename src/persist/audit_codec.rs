//! Versioned TLV audit record codec: `[type:u32 LE][payload_len:u32 LE][payload][crc32c:u32 LE]`.
//! The CRC covers the header and payload, never the trailer itself.

use crate::core::divergence::{Divergence, DivergenceKind};
use crate::core::event::OrdStatus;
use crate::core::recon_state::MismatchMask;
use crate::core::sequence::{GapKind, SequenceGapEvent};
use crate::persist::crc32c::{crc32c, Crc32cState};

pub const HEADER_SIZE: usize = 8;
pub const TRAILER_SIZE: usize = 4;

pub const DIVERGENCE_PAYLOAD_SIZE_V1: usize = 62;
pub const GAP_PAYLOAD_SIZE_V1: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AuditRecordType {
    Divergence = 1,
    SequenceGap = 2,
}

impl AuditRecordType {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::Divergence),
            2 => Some(Self::SequenceGap),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum DecodeError {
    TruncatedAtEnd,
    InvalidType(u32),
    VersionMismatch(u16),
    InvalidLength(u32),
    InvalidCrc,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TruncatedAtEnd => write!(f, "truncated at end of buffer"),
            Self::InvalidType(t) => write!(f, "invalid audit record type: {t}"),
            Self::VersionMismatch(v) => write!(f, "unsupported audit schema version: {v}"),
            Self::InvalidLength(n) => write!(f, "invalid audit payload length: {n}"),
            Self::InvalidCrc => write!(f, "audit record crc mismatch"),
        }
    }
}
impl std::error::Error for DecodeError {}

/// `true` for an error that represents a clean end-of-file (no bytes, or a record boundary with
/// nothing left), as opposed to a genuine corruption.
pub fn is_graceful_eof(buf: &[u8]) -> bool {
    buf.is_empty()
}

pub enum DecodedRecord {
    Divergence(Divergence),
    Gap(SequenceGapEvent),
}

fn encode_divergence_payload_v1(d: &Divergence) -> [u8; DIVERGENCE_PAYLOAD_SIZE_V1] {
    let mut buf = [0u8; DIVERGENCE_PAYLOAD_SIZE_V1];
    let mut off = 0;
    macro_rules! put {
        ($bytes:expr) => {{
            let b = $bytes;
            buf[off..off + b.len()].copy_from_slice(&b);
            off += b.len();
        }};
    }
    put!(1u16.to_le_bytes()); // schema_version
    put!([d.kind as u8]);
    put!([d.internal_status as u8]);
    put!([d.dropcopy_status as u8]);
    put!([0u8]); // reserved
    put!(d.fingerprint.to_le_bytes());
    put!(d.internal_cum_qty.to_le_bytes());
    put!(d.dropcopy_cum_qty.to_le_bytes());
    put!(d.internal_avg_px_micros.to_le_bytes());
    put!(d.dropcopy_avg_px_micros.to_le_bytes());
    put!(d.internal_ts_ns.to_le_bytes());
    put!(d.dropcopy_ts_ns.to_le_bytes());
    debug_assert_eq!(off, DIVERGENCE_PAYLOAD_SIZE_V1);
    buf
}

fn decode_divergence_v1(buf: &[u8]) -> Result<Divergence, DecodeError> {
    if buf.len() != DIVERGENCE_PAYLOAD_SIZE_V1 {
        return Err(DecodeError::InvalidLength(buf.len() as u32));
    }
    let version = u16::from_le_bytes(buf[0..2].try_into().unwrap());
    if version != 1 {
        return Err(DecodeError::VersionMismatch(version));
    }
    let kind = match buf[2] {
        0 => DivergenceKind::MissingFill,
        1 => DivergenceKind::PhantomOrder,
        2 => DivergenceKind::StateMismatch,
        3 => DivergenceKind::QuantityMismatch,
        4 => DivergenceKind::TimingAnomaly,
        5 => DivergenceKind::MissingDropCopy,
        _ => DivergenceKind::TimingAnomaly,
    };
    let internal_status = OrdStatus::from_u8(buf[3]);
    let dropcopy_status = OrdStatus::from_u8(buf[4]);
    let fingerprint = u64::from_le_bytes(buf[6..14].try_into().unwrap());
    let internal_cum_qty = i64::from_le_bytes(buf[14..22].try_into().unwrap());
    let dropcopy_cum_qty = i64::from_le_bytes(buf[22..30].try_into().unwrap());
    let internal_avg_px_micros = i64::from_le_bytes(buf[30..38].try_into().unwrap());
    let dropcopy_avg_px_micros = i64::from_le_bytes(buf[38..46].try_into().unwrap());
    let internal_ts_ns = i64::from_le_bytes(buf[46..54].try_into().unwrap());
    let dropcopy_ts_ns = i64::from_le_bytes(buf[54..62].try_into().unwrap());

    Ok(Divergence {
        fingerprint,
        kind,
        internal_status,
        dropcopy_status,
        internal_cum_qty,
        dropcopy_cum_qty,
        internal_avg_px_micros,
        dropcopy_avg_px_micros,
        internal_ts_ns,
        dropcopy_ts_ns,
        detect_tsc: 0,
        mismatch_mask: MismatchMask::empty(),
    })
}

fn encode_gap_payload_v1(g: &SequenceGapEvent) -> [u8; GAP_PAYLOAD_SIZE_V1] {
    let mut buf = [0u8; GAP_PAYLOAD_SIZE_V1];
    let mut off = 0;
    macro_rules! put {
        ($bytes:expr) => {{
            let b = $bytes;
            buf[off..off + b.len()].copy_from_slice(&b);
            off += b.len();
        }};
    }
    put!(1u16.to_le_bytes());
    put!([g.source as u8]);
    put!([g.kind as u8]);
    put!(g.session_id.to_le_bytes());
    put!(g.expected_seq.to_le_bytes());
    put!(g.seen_seq.to_le_bytes());
    put!(g.detect_ts_ns.to_le_bytes());
    debug_assert_eq!(off, GAP_PAYLOAD_SIZE_V1);
    buf
}

fn decode_gap_v1(buf: &[u8]) -> Result<SequenceGapEvent, DecodeError> {
    if buf.len() != GAP_PAYLOAD_SIZE_V1 {
        return Err(DecodeError::InvalidLength(buf.len() as u32));
    }
    let version = u16::from_le_bytes(buf[0..2].try_into().unwrap());
    if version != 1 {
        return Err(DecodeError::VersionMismatch(version));
    }
    let source = crate::core::event::Source::from_u8(buf[2]).unwrap_or(crate::core::event::Source::Primary);
    let kind = match buf[3] {
        0 => GapKind::Gap,
        1 => GapKind::Duplicate,
        2 => GapKind::OutOfOrder,
        3 => GapKind::GapFill,
        _ => GapKind::Gap,
    };
    let session_id = u16::from_le_bytes(buf[4..6].try_into().unwrap());
    let expected_seq = u64::from_le_bytes(buf[6..14].try_into().unwrap());
    let seen_seq = u64::from_le_bytes(buf[14..22].try_into().unwrap());
    let detect_ts_ns = u64::from_le_bytes(buf[22..30].try_into().unwrap());

    Ok(SequenceGapEvent {
        source,
        session_id,
        kind,
        expected_seq,
        seen_seq,
        detect_ts_ns,
        closed_gap: matches!(kind, GapKind::GapFill),
    })
}

fn compute_record_crc(record_type: u32, payload: &[u8]) -> u32 {
    let mut state = Crc32cState::new();
    state.update(&record_type.to_le_bytes());
    state.update(&(payload.len() as u32).to_le_bytes());
    state.update(payload);
    state.finalize()
}

pub fn encode_divergence_record_v1(d: &Divergence) -> Vec<u8> {
    let payload = encode_divergence_payload_v1(d);
    encode_record(AuditRecordType::Divergence, &payload)
}

pub fn encode_gap_record_v1(g: &SequenceGapEvent) -> Vec<u8> {
    let payload = encode_gap_payload_v1(g);
    encode_record(AuditRecordType::SequenceGap, &payload)
}

fn encode_record(record_type: AuditRecordType, payload: &[u8]) -> Vec<u8> {
    let type_u32 = record_type as u32;
    let crc = compute_record_crc(type_u32, payload);
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    out.extend_from_slice(&type_u32.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

/// Full validation pipeline: truncation -> invalid type -> CRC -> version mismatch -> invalid
/// length -> decode. Returns the record and the number of bytes consumed.
pub fn decode_record(buf: &[u8]) -> Result<(DecodedRecord, usize), DecodeError> {
    if buf.len() < HEADER_SIZE {
        return Err(DecodeError::TruncatedAtEnd);
    }
    let record_type = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let Some(kind) = AuditRecordType::from_u32(record_type) else {
        return Err(DecodeError::InvalidType(record_type));
    };
    let payload_len = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    let total = HEADER_SIZE + payload_len as usize + TRAILER_SIZE;
    if buf.len() < total {
        return Err(DecodeError::TruncatedAtEnd);
    }

    let crc_expected = u32::from_le_bytes(buf[total - 4..total].try_into().unwrap());
    let crc_actual = crc32c(&buf[..total - 4]);
    if crc_expected != crc_actual {
        return Err(DecodeError::InvalidCrc);
    }

    let payload = &buf[HEADER_SIZE..total - TRAILER_SIZE];
    let decoded = match kind {
        AuditRecordType::Divergence => DecodedRecord::Divergence(decode_divergence_v1(payload)?),
        AuditRecordType::SequenceGap => DecodedRecord::Gap(decode_gap_v1(payload)?),
    };
    Ok((decoded, total))
}

pub fn audit_filename_prefix() -> &'static str {
    "audit_"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::Source;

    fn sample_divergence() -> Divergence {
        Divergence {
            fingerprint: 0xdead_beef,
            kind: DivergenceKind::QuantityMismatch,
            internal_status: OrdStatus::Filled,
            dropcopy_status: OrdStatus::Filled,
            internal_cum_qty: 100,
            dropcopy_cum_qty: 150,
            internal_avg_px_micros: 1_000_000,
            dropcopy_avg_px_micros: 1_000_000,
            internal_ts_ns: 10,
            dropcopy_ts_ns: 20,
            detect_tsc: 0,
            mismatch_mask: MismatchMask(MismatchMask::CUM_QTY),
        }
    }

    fn sample_gap() -> SequenceGapEvent {
        SequenceGapEvent {
            source: Source::Primary,
            session_id: 3,
            kind: GapKind::Gap,
            expected_seq: 10,
            seen_seq: 15,
            detect_ts_ns: 999,
            closed_gap: false,
        }
    }

    #[test]
    fn divergence_round_trips() {
        let d = sample_divergence();
        let bytes = encode_divergence_record_v1(&d);
        let (decoded, consumed) = decode_record(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        match decoded {
            DecodedRecord::Divergence(got) => {
                assert_eq!(got.fingerprint, d.fingerprint);
                assert_eq!(got.internal_cum_qty, 100);
                assert_eq!(got.dropcopy_cum_qty, 150);
                assert_eq!(got.kind, DivergenceKind::QuantityMismatch);
            }
            _ => panic!("expected divergence record"),
        }
    }

    #[test]
    fn gap_round_trips() {
        let g = sample_gap();
        let bytes = encode_gap_record_v1(&g);
        let (decoded, consumed) = decode_record(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        match decoded {
            DecodedRecord::Gap(got) => {
                assert_eq!(got.expected_seq, 10);
                assert_eq!(got.seen_seq, 15);
                assert_eq!(got.kind, GapKind::Gap);
            }
            _ => panic!("expected gap record"),
        }
    }

    #[test]
    fn single_bit_corruption_is_detected() {
        let d = sample_divergence();
        let mut bytes = encode_divergence_record_v1(&d);
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        assert!(matches!(decode_record(&bytes), Err(DecodeError::InvalidCrc)));
    }

    #[test]
    fn truncated_header_is_graceful_eof_candidate() {
        let bytes = encode_divergence_record_v1(&sample_divergence());
        let short = &bytes[..4];
        assert!(matches!(decode_record(short), Err(DecodeError::TruncatedAtEnd)));
        assert!(!is_graceful_eof(short));
        assert!(is_graceful_eof(&[]));
    }

    #[test]
    fn invalid_type_is_reported() {
        let mut bytes = encode_divergence_record_v1(&sample_divergence());
        bytes[0..4].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(decode_record(&bytes), Err(DecodeError::InvalidType(99))));
    }
}
