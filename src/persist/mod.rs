//! Durable persistence: the audit trail, the wire capture format, and the tooling that reads
//! both back (replay source, post-incident diff).

pub mod audit_codec;
pub mod audit_diff;
pub mod audit_writer;
pub mod crc32c;
pub mod wire_format;
pub mod wire_reader;
pub mod wire_writer;

pub use audit_codec::{AuditRecordType, DecodedRecord, DecodeError};
pub use audit_diff::{diff_directories, AuditDiffOptions, DiffEntry};
pub use audit_writer::{AuditLogConfig, AuditLogCounters, AuditLogWriter};
pub use wire_format::{WireDecodeError, WIRE_PAYLOAD_SIZE};
pub use wire_reader::WireDirReader;
pub use wire_writer::{WireCaptureConfig, WireCaptureCounters, WireCaptureWriter};
