//! The reader-socket frame format.
//!
//! Records stream to readers as length-prefixed frames:
//!
//! ```text
//! le16 payload_len | le16 hdr_size (= 24)
//! le32 pid | le32 tid | le32 realtime_sec | le32 realtime_nsec
//! le32 partition_id | le32 uid
//! payload
//! ```
//!
//! Every header field round-trips a record exactly; the decoder exists
//! for client tooling and tests.

use crate::error::WireError;
use crate::partition::Partition;
use crate::record::{Record, Timestamp, MAX_PAYLOAD};

/// Size of the per-frame header after the two length fields.
pub const EGRESS_HEADER_SIZE: usize = 24;

const PREFIX_SIZE: usize = 4;

/// Encodes a record into one egress frame.
#[must_use]
pub fn encode_frame(record: &Record) -> Vec<u8> {
    let mut frame = Vec::with_capacity(PREFIX_SIZE + EGRESS_HEADER_SIZE + record.payload.len());
    let len = u16::try_from(record.payload.len()).unwrap_or(u16::MAX);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&(EGRESS_HEADER_SIZE as u16).to_le_bytes());
    frame.extend_from_slice(&record.pid.to_le_bytes());
    frame.extend_from_slice(&record.tid.to_le_bytes());
    frame.extend_from_slice(&record.realtime.sec.to_le_bytes());
    frame.extend_from_slice(&record.realtime.nsec.to_le_bytes());
    frame.extend_from_slice(&u32::from(record.partition.id()).to_le_bytes());
    frame.extend_from_slice(&record.uid.to_le_bytes());
    frame.extend_from_slice(&record.payload);
    frame
}

/// Decodes one frame from the front of `buf`.
///
/// On success returns the record (with `sequence` zero, which the wire
/// does not carry) and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`WireError::Truncated`] when `buf` holds less than one whole
/// frame and [`WireError::MalformedFrame`] when the fixed fields do not
/// match the layout.
pub fn decode_frame(buf: &[u8]) -> Result<(Record, usize), WireError> {
    if buf.len() < PREFIX_SIZE {
        return Err(WireError::Truncated {
            need: PREFIX_SIZE,
            have: buf.len(),
        });
    }
    let payload_len = usize::from(u16::from_le_bytes([buf[0], buf[1]]));
    let hdr_size = usize::from(u16::from_le_bytes([buf[2], buf[3]]));
    if hdr_size != EGRESS_HEADER_SIZE {
        return Err(WireError::MalformedFrame("unexpected header size"));
    }
    if payload_len == 0 || payload_len > MAX_PAYLOAD {
        return Err(WireError::MalformedFrame("unreasonable payload length"));
    }
    let total = PREFIX_SIZE + hdr_size + payload_len;
    if buf.len() < total {
        return Err(WireError::Truncated {
            need: total,
            have: buf.len(),
        });
    }

    let word = |offset: usize| {
        let at = PREFIX_SIZE + offset;
        u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
    };
    let partition_id = word(16);
    let partition = u8::try_from(partition_id)
        .ok()
        .and_then(Partition::from_id)
        .ok_or(WireError::MalformedFrame("unknown partition id"))?;

    let payload_at = PREFIX_SIZE + hdr_size;
    Ok((
        Record {
            sequence: 0,
            partition,
            realtime: Timestamp::new(word(8), word(12)),
            uid: word(20),
            pid: word(0),
            tid: word(4),
            payload: buf[payload_at..payload_at + payload_len].to_vec(),
        },
        total,
    ))
}
