//! The reader-socket request line.
//!
//! A reader opens the stream socket and sends a single newline-terminated
//! line of `key=value` words plus an optional mode word, e.g.
//!
//! ```text
//! logIds=1 tail=100 uid=1000 stream
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::WireError;
use crate::partition::PartitionMask;
use crate::priority::Priority;
use crate::record::Timestamp;

/// Whether a subscription terminates at the tail or streams on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadMode {
    /// Serve everything up to the current tail, then terminate.
    #[default]
    Dump,
    /// Serve the initial range, then block for new records.
    Stream,
}

/// A parsed reader request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    /// Partitions to serve. Never empty.
    pub mask: PartitionMask,
    /// Seed the stream with the last `n` matching records.
    pub tail: Option<usize>,
    /// Skip records stamped before this time.
    pub start: Option<Timestamp>,
    /// Serve only records from this pid.
    pub pid: Option<u32>,
    /// Serve only records from this uid.
    pub uid: Option<u32>,
    /// Serve only text records at or above this priority.
    pub min_priority: Option<Priority>,
    /// End a streaming read after this many seconds with nothing to
    /// serve.
    pub timeout_secs: Option<u64>,
    /// Dump or stream.
    pub mode: ReadMode,
}

impl ReadRequest {
    /// A dump request over `mask` with no filters.
    #[must_use]
    pub const fn dump(mask: PartitionMask) -> Self {
        Self {
            mask,
            tail: None,
            start: None,
            pid: None,
            uid: None,
            min_priority: None,
            timeout_secs: None,
            mode: ReadMode::Dump,
        }
    }

    /// A streaming request over `mask` with no filters.
    #[must_use]
    pub const fn stream(mask: PartitionMask) -> Self {
        Self {
            mask,
            tail: None,
            start: None,
            pid: None,
            uid: None,
            min_priority: None,
            timeout_secs: None,
            mode: ReadMode::Stream,
        }
    }
}

impl FromStr for ReadRequest {
    type Err = WireError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut mask: Option<PartitionMask> = None;
        let mut request = Self::dump(PartitionMask::empty());

        for word in line.split_whitespace() {
            match word {
                "dump" => request.mode = ReadMode::Dump,
                "stream" => request.mode = ReadMode::Stream,
                _ => {
                    let (key, value) = word.split_once('=').ok_or_else(|| {
                        WireError::InvalidRequest(format!("expected key=value, got '{word}'"))
                    })?;
                    let bad =
                        || WireError::InvalidRequest(format!("bad value '{value}' for '{key}'"));
                    match key {
                        "logIds" => mask = Some(value.parse()?),
                        "tail" => request.tail = Some(value.parse().map_err(|_| bad())?),
                        "start" => request.start = Some(value.parse()?),
                        "pid" => request.pid = Some(value.parse().map_err(|_| bad())?),
                        "uid" => request.uid = Some(value.parse().map_err(|_| bad())?),
                        "prio" => {
                            let raw: u8 = value.parse().map_err(|_| bad())?;
                            request.min_priority = Some(Priority::from_u8(raw).ok_or_else(bad)?);
                        }
                        "timeout" => {
                            request.timeout_secs = Some(value.parse().map_err(|_| bad())?);
                        }
                        _ => {
                            return Err(WireError::InvalidRequest(format!(
                                "unknown key '{key}'"
                            )))
                        }
                    }
                }
            }
        }

        let mask = mask
            .ok_or_else(|| WireError::InvalidRequest("missing logIds".to_string()))?;
        if mask.is_empty() {
            return Err(WireError::InvalidRequest("empty logIds mask".to_string()));
        }
        request.mask = mask;
        Ok(request)
    }
}

impl fmt::Display for ReadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "logIds={}", self.mask)?;
        if let Some(tail) = self.tail {
            write!(f, " tail={tail}")?;
        }
        if let Some(start) = self.start {
            write!(f, " start={start}")?;
        }
        if let Some(pid) = self.pid {
            write!(f, " pid={pid}")?;
        }
        if let Some(uid) = self.uid {
            write!(f, " uid={uid}")?;
        }
        if let Some(prio) = self.min_priority {
            write!(f, " prio={}", prio as u8)?;
        }
        if let Some(timeout) = self.timeout_secs {
            write!(f, " timeout={timeout}")?;
        }
        match self.mode {
            ReadMode::Dump => write!(f, " dump"),
            ReadMode::Stream => write!(f, " stream"),
        }
    }
}
