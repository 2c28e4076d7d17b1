//! The producer datagram format.
//!
//! Each datagram is exactly one record: an 11-byte fixed header followed
//! by the partition-specific payload. Credentials (uid, pid) are not in
//! the datagram; the receiving socket supplies them.

use crate::error::WireError;
use crate::partition::Partition;
use crate::record::Timestamp;

/// Size of the fixed datagram header in bytes.
pub const INGEST_HEADER_SIZE: usize = 11;

/// Maximum payload a single datagram may carry.
pub const MAX_DATAGRAM_PAYLOAD: usize = 4080;

/// The fixed header at the front of every ingest datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestHeader {
    /// Destination partition.
    pub partition: Partition,
    /// Sender thread id.
    pub tid: u16,
    /// Producer-side realtime stamp; all-zero means "stamp on arrival".
    pub realtime: Timestamp,
}

impl IngestHeader {
    /// Creates a header.
    #[must_use]
    pub const fn new(partition: Partition, tid: u16, realtime: Timestamp) -> Self {
        Self {
            partition,
            tid,
            realtime,
        }
    }

    /// Parses a datagram into its header and payload.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Truncated`] when the datagram is shorter than
    /// the fixed header, [`WireError::UnknownPartition`] for an id outside
    /// the closed set, and [`WireError::BadPayloadLength`] for an empty or
    /// oversized payload.
    pub fn parse(datagram: &[u8]) -> Result<(Self, &[u8]), WireError> {
        if datagram.len() < INGEST_HEADER_SIZE {
            return Err(WireError::Truncated {
                need: INGEST_HEADER_SIZE,
                have: datagram.len(),
            });
        }
        let partition =
            Partition::from_id(datagram[0]).ok_or(WireError::UnknownPartition(datagram[0]))?;
        let tid = u16::from_le_bytes([datagram[1], datagram[2]]);
        let sec = u32::from_le_bytes([datagram[3], datagram[4], datagram[5], datagram[6]]);
        let nsec = u32::from_le_bytes([datagram[7], datagram[8], datagram[9], datagram[10]]);

        let payload = &datagram[INGEST_HEADER_SIZE..];
        if payload.is_empty() || payload.len() > MAX_DATAGRAM_PAYLOAD {
            return Err(WireError::BadPayloadLength(payload.len()));
        }

        Ok((
            Self {
                partition,
                tid,
                realtime: Timestamp::new(sec, nsec),
            },
            payload,
        ))
    }

    /// Encodes this header followed by `payload` into one datagram.
    #[must_use]
    pub fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let mut datagram = Vec::with_capacity(INGEST_HEADER_SIZE + payload.len());
        datagram.push(self.partition.id());
        datagram.extend_from_slice(&self.tid.to_le_bytes());
        datagram.extend_from_slice(&self.realtime.sec.to_le_bytes());
        datagram.extend_from_slice(&self.realtime.nsec.to_le_bytes());
        datagram.extend_from_slice(payload);
        datagram
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let header = IngestHeader::new(Partition::Radio, 777, Timestamp::new(5, 6));
        let datagram = header.encode(b"payload");
        let (parsed, payload) = IngestHeader::parse(&datagram).expect("parse");
        assert_eq!(parsed, header);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn rejects_short_datagram() {
        let err = IngestHeader::parse(&[0; 5]).expect_err("short");
        assert_eq!(err, WireError::Truncated { need: 11, have: 5 });
    }

    #[test]
    fn rejects_unknown_partition() {
        let mut datagram = IngestHeader::new(Partition::Main, 1, Timestamp::default()).encode(b"x");
        datagram[0] = 9;
        assert_eq!(
            IngestHeader::parse(&datagram),
            Err(WireError::UnknownPartition(9))
        );
    }

    #[test]
    fn rejects_empty_payload() {
        let datagram = IngestHeader::new(Partition::Main, 1, Timestamp::default()).encode(&[]);
        assert_eq!(
            IngestHeader::parse(&datagram),
            Err(WireError::BadPayloadLength(0))
        );
    }

    #[test]
    fn rejects_oversized_payload() {
        let big = vec![0u8; MAX_DATAGRAM_PAYLOAD + 1];
        let datagram = IngestHeader::new(Partition::Main, 1, Timestamp::default()).encode(&big);
        assert_eq!(
            IngestHeader::parse(&datagram),
            Err(WireError::BadPayloadLength(MAX_DATAGRAM_PAYLOAD + 1))
        );
    }
}
