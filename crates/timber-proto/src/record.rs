//! The atomic log record and its realtime stamp.
//!
//! This module provides:
//! - [`Timestamp`] — Seconds/nanoseconds realtime as carried on the wire
//! - [`Record`] — One log record, immutable once the store has numbered it

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::partition::Partition;
use crate::priority::Priority;

/// Maximum payload length of a single record, in bytes.
pub const MAX_PAYLOAD: usize = 4096;

/// Fixed accounting overhead charged per resident record, in bytes.
///
/// Matches the egress frame header so that quota accounting approximates
/// what a reader actually receives.
pub const RECORD_OVERHEAD: usize = 28;

/// A realtime stamp with nanosecond resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub sec: u32,
    /// Nanoseconds within the second.
    pub nsec: u32,
}

impl Timestamp {
    /// Creates a stamp from its parts.
    #[must_use]
    pub const fn new(sec: u32, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    /// Reads the system realtime clock.
    #[must_use]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: u32::try_from(since_epoch.as_secs()).unwrap_or(u32::MAX),
            nsec: since_epoch.subsec_nanos(),
        }
    }

    /// True for the all-zero stamp, which producers send to mean
    /// "stamp on arrival".
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.sec == 0 && self.nsec == 0
    }

    /// Converts to a UTC datetime for display. Returns `None` for stamps
    /// chrono cannot represent.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.sec), self.nsec)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

impl FromStr for Timestamp {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || WireError::InvalidRequest(format!("bad timestamp '{s}'"));
        let (sec, nsec) = s.split_once('.').ok_or_else(bad)?;
        let sec: u32 = sec.parse().map_err(|_| bad())?;
        let nsec: u32 = nsec.parse().map_err(|_| bad())?;
        if nsec >= 1_000_000_000 {
            return Err(bad());
        }
        Ok(Self { sec, nsec })
    }
}

/// One log record.
///
/// The store assigns `sequence` at insertion; a value of zero marks a
/// record that has not been inserted yet. All other fields are fixed by
/// the producer (or the ingest endpoint, for the credentials).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Store-assigned total-order identifier. Zero until insertion.
    pub sequence: u64,
    /// The partition this record belongs to.
    pub partition: Partition,
    /// Realtime stamp.
    pub realtime: Timestamp,
    /// Sending user id, from socket credentials.
    pub uid: u32,
    /// Sending process id, from socket credentials.
    pub pid: u32,
    /// Sending thread id, from the ingest header.
    pub tid: u32,
    /// Opaque payload, `1..=MAX_PAYLOAD` bytes.
    pub payload: Vec<u8>,
}

impl Record {
    /// Bytes this record charges against its partition's quota.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        self.payload.len() + RECORD_OVERHEAD
    }

    /// The priority byte of a text record. `None` for binary partitions
    /// and for payloads that do not start with a known priority value.
    #[must_use]
    pub fn priority(&self) -> Option<Priority> {
        if self.partition.is_binary() {
            return None;
        }
        self.payload.first().copied().and_then(Priority::from_u8)
    }

    /// The event tag of a binary record (little-endian u32 prefix).
    #[must_use]
    pub fn event_tag(&self) -> Option<u32> {
        if !self.partition.is_binary() || self.payload.len() < 4 {
            return None;
        }
        let bytes: [u8; 4] = self.payload[..4].try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// The NUL-terminated tag string of a text record.
    #[must_use]
    pub fn text_tag(&self) -> Option<&str> {
        if self.partition.is_binary() {
            return None;
        }
        let body = self.payload.get(1..)?;
        let end = body.iter().position(|b| *b == 0)?;
        std::str::from_utf8(&body[..end]).ok()
    }

    /// The message body of a text record (after the tag's NUL, trimmed of
    /// the trailing NUL if present).
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        if self.partition.is_binary() {
            return None;
        }
        let body = self.payload.get(1..)?;
        let tag_end = body.iter().position(|b| *b == 0)?;
        let mut msg = body.get(tag_end + 1..)?;
        if let Some((&0, rest)) = msg.split_last() {
            msg = rest;
        }
        std::str::from_utf8(msg).ok()
    }
}

/// Builds the payload of a text record: priority byte, NUL-terminated
/// tag, NUL-terminated message.
#[must_use]
pub fn text_payload(priority: Priority, tag: &str, message: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + tag.len() + 1 + message.len() + 1);
    payload.push(priority as u8);
    payload.extend_from_slice(tag.as_bytes());
    payload.push(0);
    payload.extend_from_slice(message.as_bytes());
    payload.push(0);
    payload
}

/// Builds the payload of a binary event record: little-endian tag then
/// the event body.
#[must_use]
pub fn event_payload(tag: u32, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + body.len());
    payload.extend_from_slice(&tag.to_le_bytes());
    payload.extend_from_slice(body);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_record(partition: Partition) -> Record {
        Record {
            sequence: 7,
            partition,
            realtime: Timestamp::new(100, 500),
            uid: 1000,
            pid: 42,
            tid: 43,
            payload: text_payload(Priority::Warn, "netd", "link down"),
        }
    }

    // ===========================================
    // Timestamp
    // ===========================================

    #[test]
    fn timestamp_parse_display() {
        let ts: Timestamp = "12.000000034".parse().expect("parse");
        assert_eq!(ts, Timestamp::new(12, 34));
        assert_eq!(ts.to_string(), "12.000000034");
    }

    #[test]
    fn timestamp_rejects_garbage() {
        assert!("12".parse::<Timestamp>().is_err());
        assert!("a.b".parse::<Timestamp>().is_err());
        assert!("1.1000000000".parse::<Timestamp>().is_err());
    }

    #[test]
    fn timestamp_zero() {
        assert!(Timestamp::default().is_zero());
        assert!(!Timestamp::now().is_zero());
    }

    // ===========================================
    // Record payload views
    // ===========================================

    #[test]
    fn text_record_views() {
        let record = text_record(Partition::Main);
        assert_eq!(record.priority(), Some(Priority::Warn));
        assert_eq!(record.text_tag(), Some("netd"));
        assert_eq!(record.message(), Some("link down"));
        assert_eq!(record.event_tag(), None);
    }

    #[test]
    fn binary_record_views() {
        let record = Record {
            sequence: 1,
            partition: Partition::Events,
            realtime: Timestamp::new(1, 0),
            uid: 0,
            pid: 1,
            tid: 1,
            payload: event_payload(0x1234_5678, &[9, 9]),
        };
        assert_eq!(record.event_tag(), Some(0x1234_5678));
        assert_eq!(record.priority(), None);
        assert_eq!(record.text_tag(), None);
    }

    #[test]
    fn wire_size_includes_overhead() {
        let record = text_record(Partition::Main);
        assert_eq!(record.wire_size(), record.payload.len() + RECORD_OVERHEAD);
    }

    #[test]
    fn malformed_text_payload_views_are_none() {
        let record = Record {
            sequence: 1,
            partition: Partition::Main,
            realtime: Timestamp::default(),
            uid: 0,
            pid: 0,
            tid: 0,
            payload: vec![0xff, b'x'],
        };
        assert_eq!(record.priority(), None);
        assert_eq!(record.text_tag(), None);
    }
}
