//! # timber-proto
//!
//! Shared data model and wire formats for the timber logging daemon.
//!
//! This crate provides:
//!
//! - [`Partition`] — The eight log partitions and their bitmask form
//! - [`Priority`] — Text-record severity levels
//! - [`Record`] — The atomic log record, immutable after insertion
//! - [`Timestamp`] — Realtime stamps as carried on the wire
//! - [`IngestHeader`] — The producer datagram header
//! - Egress framing ([`encode_frame`] / [`decode_frame`])
//! - [`ReadRequest`] — The reader-socket request line
//! - [`ControlCommand`] — The administrative protocol
//!
//! Framing is byte-exact little-endian; nothing here is self-describing,
//! so every parser rejects what it does not recognize rather than
//! guessing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod control;
pub mod egress;
pub mod error;
pub mod ingest;
pub mod partition;
pub mod priority;
pub mod record;
pub mod request;

pub use control::ControlCommand;
pub use egress::{decode_frame, encode_frame, EGRESS_HEADER_SIZE};
pub use error::WireError;
pub use ingest::{IngestHeader, INGEST_HEADER_SIZE, MAX_DATAGRAM_PAYLOAD};
pub use partition::{Partition, PartitionMask};
pub use priority::Priority;
pub use record::{event_payload, text_payload, Record, Timestamp, MAX_PAYLOAD, RECORD_OVERHEAD};
pub use request::{ReadMode, ReadRequest};
