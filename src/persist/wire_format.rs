//! Wire-capture record framing: `[payload_len:u32 LE][capture_ts_ns:u64 LE][payload][crc32c:u32 LE]`.
//!
//! The payload is a bit-exact serialization of an [`ExecEvent`], including `source`, `session_id`,
//! and `seq_num` — replay needs all three to recover the correct target ring and to feed the
//! sequence tracker.

use crate::core::event::{ExecEvent, ExecType, Ident, OrdStatus, Source};
use crate::persist::crc32c::{crc32c, Crc32cState};

pub const WIRE_PAYLOAD_SIZE: usize = 160;
const FRAME_HEADER_SIZE: usize = 4 + 8; // payload_len + capture_ts_ns
const FRAME_TRAILER_SIZE: usize = 4; // crc32c

pub fn framed_size(payload_len: usize) -> usize {
    FRAME_HEADER_SIZE + payload_len + FRAME_TRAILER_SIZE
}

#[derive(Debug)]
pub enum WireDecodeError {
    Truncated,
    InvalidLength(u32),
    InvalidCrc,
}

impl std::fmt::Display for WireDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated wire record"),
            Self::InvalidLength(n) => write!(f, "invalid wire payload length: {n}"),
            Self::InvalidCrc => write!(f, "wire record crc mismatch"),
        }
    }
}
impl std::error::Error for WireDecodeError {}

/// Serializes one [`ExecEvent`] into its fixed 160-byte wire payload.
pub fn encode_payload(event: &ExecEvent) -> [u8; WIRE_PAYLOAD_SIZE] {
    let mut buf = [0u8; WIRE_PAYLOAD_SIZE];
    let mut off = 0;

    macro_rules! put {
        ($bytes:expr) => {{
            let b = $bytes;
            buf[off..off + b.len()].copy_from_slice(&b);
            off += b.len();
        }};
    }

    put!([event.source as u8]);
    put!(event.session_id.to_le_bytes());
    put!(event.seq_num.to_le_bytes());
    put!(event.transact_time_ns.to_le_bytes());
    put!(event.sending_time_ns.to_le_bytes());
    put!(event.ingest_tsc.to_le_bytes());
    put!([event.exec_type as u8]);
    put!([event.ord_status as u8]);
    put!(event.cum_qty.to_le_bytes());
    put!(event.last_qty.to_le_bytes());
    put!(event.price_micros.to_le_bytes());
    put!([event.cl_ord_id.len() as u8]);
    put!(pad32(event.cl_ord_id.as_bytes()));
    put!([event.order_id.len() as u8]);
    put!(pad32(event.order_id.as_bytes()));
    put!([event.exec_id.len() as u8]);
    put!(pad32(event.exec_id.as_bytes()));

    debug_assert_eq!(off, WIRE_PAYLOAD_SIZE);
    buf
}

fn pad32(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[..bytes.len()].copy_from_slice(bytes);
    out
}

/// Deserializes a 160-byte payload back into an [`ExecEvent`].
pub fn decode_payload(buf: &[u8]) -> Result<ExecEvent, WireDecodeError> {
    if buf.len() != WIRE_PAYLOAD_SIZE {
        return Err(WireDecodeError::InvalidLength(buf.len() as u32));
    }
    let mut off = 0;
    macro_rules! take {
        ($n:expr) => {{
            let s = &buf[off..off + $n];
            off += $n;
            s
        }};
    }

    let source = Source::from_u8(take!(1)[0]).unwrap_or(Source::Primary);
    let session_id = u16::from_le_bytes(take!(2).try_into().unwrap());
    let seq_num = u64::from_le_bytes(take!(8).try_into().unwrap());
    let transact_time_ns = i64::from_le_bytes(take!(8).try_into().unwrap());
    let sending_time_ns = i64::from_le_bytes(take!(8).try_into().unwrap());
    let ingest_tsc = u64::from_le_bytes(take!(8).try_into().unwrap());
    let exec_type = ExecType::from_u8(take!(1)[0]);
    let ord_status = OrdStatus::from_u8(take!(1)[0]);
    let cum_qty = i64::from_le_bytes(take!(8).try_into().unwrap());
    let last_qty = i64::from_le_bytes(take!(8).try_into().unwrap());
    let price_micros = i64::from_le_bytes(take!(8).try_into().unwrap());

    let cl_ord_len = take!(1)[0] as usize;
    let cl_ord_id = Ident::from_slice(&take!(32)[..cl_ord_len.min(32)]);
    let order_len = take!(1)[0] as usize;
    let order_id = Ident::from_slice(&take!(32)[..order_len.min(32)]);
    let exec_len = take!(1)[0] as usize;
    let exec_id = Ident::from_slice(&take!(32)[..exec_len.min(32)]);

    Ok(ExecEvent {
        source,
        session_id,
        seq_num,
        transact_time_ns,
        sending_time_ns,
        ingest_tsc,
        exec_type,
        ord_status,
        cum_qty,
        last_qty,
        price_micros,
        cl_ord_id,
        order_id,
        exec_id,
    })
}

/// Encodes one full framed record: header + payload + trailer.
pub fn encode_record(event: &ExecEvent, capture_ts_ns: u64) -> Vec<u8> {
    let payload = encode_payload(event);
    let mut out = Vec::with_capacity(framed_size(WIRE_PAYLOAD_SIZE));
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&capture_ts_ns.to_le_bytes());
    out.extend_from_slice(&payload);

    let mut crc = Crc32cState::new();
    crc.update(&out);
    out.extend_from_slice(&crc.finalize().to_le_bytes());
    out
}

pub struct DecodedWireRecord {
    pub event: ExecEvent,
    pub capture_ts_ns: u64,
}

/// Parses one record from the front of `buf`. Returns the record and the number of bytes
/// consumed, so the caller can advance through a file. A zero-length remainder is a graceful EOF.
pub fn parse_record(buf: &[u8]) -> Result<(DecodedWireRecord, usize), WireDecodeError> {
    if buf.is_empty() {
        return Err(WireDecodeError::Truncated);
    }
    if buf.len() < FRAME_HEADER_SIZE {
        return Err(WireDecodeError::Truncated);
    }
    let payload_len = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    if payload_len as usize != WIRE_PAYLOAD_SIZE {
        return Err(WireDecodeError::InvalidLength(payload_len));
    }
    let capture_ts_ns = u64::from_le_bytes(buf[4..12].try_into().unwrap());
    let total = framed_size(payload_len as usize);
    if buf.len() < total {
        return Err(WireDecodeError::Truncated);
    }

    let crc_expected = u32::from_le_bytes(buf[total - 4..total].try_into().unwrap());
    let crc_actual = crc32c(&buf[..total - 4]);
    if crc_expected != crc_actual {
        return Err(WireDecodeError::InvalidCrc);
    }

    let payload = &buf[FRAME_HEADER_SIZE..total - FRAME_TRAILER_SIZE];
    let event = decode_payload(payload)?;
    Ok((DecodedWireRecord { event, capture_ts_ns }, total))
}

pub fn default_filename_prefix() -> &'static str {
    "wire_capture_"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{ExecType, Ident};

    fn sample_event() -> ExecEvent {
        ExecEvent {
            source: Source::DropCopy,
            session_id: 7,
            seq_num: 42,
            transact_time_ns: 111,
            sending_time_ns: 222,
            ingest_tsc: 333,
            exec_type: ExecType::Fill,
            ord_status: OrdStatus::Filled,
            cum_qty: 100,
            last_qty: 100,
            price_micros: 1_234_500,
            cl_ord_id: Ident::from_str("CID-ABC"),
            order_id: Ident::from_str("OID-XYZ"),
            exec_id: Ident::from_str("EXEC-1"),
        }
    }

    #[test]
    fn payload_round_trips() {
        let event = sample_event();
        let payload = encode_payload(&event);
        assert_eq!(payload.len(), WIRE_PAYLOAD_SIZE);
        let decoded = decode_payload(&payload).unwrap();
        assert_eq!(decoded.seq_num, 42);
        assert_eq!(decoded.session_id, 7);
        assert_eq!(decoded.cl_ord_id.as_bytes(), b"CID-ABC");
        assert_eq!(decoded.source, Source::DropCopy);
    }

    #[test]
    fn record_round_trips_with_capture_timestamp() {
        let event = sample_event();
        let bytes = encode_record(&event, 999_000);
        let (decoded, consumed) = parse_record(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.capture_ts_ns, 999_000);
        assert_eq!(decoded.event.seq_num, 42);
    }

    #[test]
    fn corrupted_record_fails_crc() {
        let event = sample_event();
        let mut bytes = encode_record(&event, 0);
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert!(matches!(parse_record(&bytes), Err(WireDecodeError::InvalidCrc)));
    }

    #[test]
    fn truncated_tail_is_reported_not_panicked() {
        let event = sample_event();
        let bytes = encode_record(&event, 0);
        let truncated = &bytes[..bytes.len() - 2];
        assert!(matches!(parse_record(truncated), Err(WireDecodeError::Truncated)));
    }

    #[test]
    fn empty_buffer_is_graceful_eof() {
        assert!(matches!(parse_record(&[]), Err(WireDecodeError::Truncated)));
    }
}
