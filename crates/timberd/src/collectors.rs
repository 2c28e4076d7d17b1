//! Line collectors for the kernel ring and the audit stream.
//!
//! This module provides:
//! - [`parse_kmsg_line`] — `/dev/kmsg` record lines into priority +
//!   message
//! - [`parse_audit_line`] — audit denial lines into pid / uid / comm /
//!   timestamp / message
//! - [`KernelCollector`] / [`AuditCollector`] — feed parsed lines into
//!   the store
//!
//! Both collectors are plain line-to-record functions. The daemon runs
//! one follow task per configured source path: existing content is
//! collected first, then appended lines as they arrive. Neither
//! collector talks to a kernel interface directly.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use timber_proto::{event_payload, text_payload, Partition, Priority, Timestamp};
use timber_store::LogStore;

use crate::Result;

/// How long a follow task sleeps at end-of-file before re-reading.
const FOLLOW_POLL: Duration = Duration::from_millis(100);

/// Event tag carried by the binary mirror of an audit record.
const AUDIT_EVENT_TAG: u32 = 1003;

/// A parsed `/dev/kmsg` record line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsgLine {
    /// Syslog level mapped into a record priority.
    pub priority: Priority,
    /// The message body.
    pub message: String,
}

/// Parses one `/dev/kmsg` record line:
/// `<level>,<seq>,<usec-since-boot>,<flag>;<message>`.
///
/// Returns `None` for continuation lines and anything malformed.
#[must_use]
pub fn parse_kmsg_line(line: &str) -> Option<KmsgLine> {
    // Continuation lines start with a space.
    if line.starts_with(' ') {
        return None;
    }
    let (prefix, message) = line.split_once(';')?;
    let mut fields = prefix.split(',');
    let level: u8 = fields.next()?.parse().ok()?;
    // seq and usec must at least be numeric for the line to be trusted.
    let _seq: u64 = fields.next()?.parse().ok()?;
    let _usec: u64 = fields.next()?.parse().ok()?;

    // Syslog severities 0..=7, most severe first.
    let priority = match level & 7 {
        0 | 1 | 2 => Priority::Fatal,
        3 => Priority::Error,
        4 => Priority::Warn,
        5 | 6 => Priority::Info,
        _ => Priority::Debug,
    };
    let message = message.trim_end();
    if message.is_empty() {
        return None;
    }
    Some(KmsgLine {
        priority,
        message: message.to_string(),
    })
}

/// A parsed audit line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLine {
    /// Realtime stamp from the `audit(<sec>.<msec>:<serial>)` field.
    pub realtime: Timestamp,
    /// `pid=` field when present.
    pub pid: u32,
    /// `uid=` field when present.
    pub uid: u32,
    /// `comm="…"` field when present.
    pub comm: Option<String>,
    /// The full line, kept verbatim as the record body.
    pub message: String,
}

fn field_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let at = line.find(key)? + key.len();
    let rest = &line[at..];
    let end = rest
        .find(|c: char| c.is_whitespace() || c == ')')
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

fn quoted_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let at = line.find(key)? + key.len();
    let rest = &line[at..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

/// Parses one audit line, e.g.
/// `type=1400 audit(1610000000.123:456): avc: denied { read } for pid=1234 ...`.
///
/// Lines without an `audit(` stamp are rejected; missing pid/uid fields
/// default to zero and a missing comm stays `None`.
#[must_use]
pub fn parse_audit_line(line: &str) -> Option<AuditLine> {
    let stamp = field_value(line, "audit(")?;
    let (sec, rest) = stamp.split_once('.')?;
    let msec = rest.split(':').next()?;
    let sec: u32 = sec.parse().ok()?;
    let msec: u32 = msec.parse().ok()?;

    // Space-anchored so `auid=` and `spid=` do not match.
    let pid = field_value(line, " pid=").and_then(|v| v.parse().ok()).unwrap_or(0);
    let uid = field_value(line, " uid=").and_then(|v| v.parse().ok()).unwrap_or(0);
    let comm = quoted_value(line, " comm=\"")
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    Some(AuditLine {
        realtime: Timestamp::new(sec, msec.saturating_mul(1_000_000)),
        pid,
        uid,
        comm,
        message: line.trim_end().to_string(),
    })
}

/// Follows `path` like `tail -f`: existing lines first, then appended
/// ones as they arrive. A partial write is held back until its
/// newline lands.
async fn follow_lines<F>(path: &Path, mut sink: F) -> Result<()>
where
    F: FnMut(&str) -> Result<()>,
{
    let file = tokio::fs::File::open(path).await?;
    let mut reader = BufReader::new(file);
    let mut pending = String::new();
    loop {
        let read = reader.read_line(&mut pending).await?;
        if read == 0 {
            tokio::time::sleep(FOLLOW_POLL).await;
            continue;
        }
        if pending.ends_with('\n') {
            let line = pending.trim_end();
            if !line.is_empty() {
                sink(line)?;
            }
            pending.clear();
        }
    }
}

/// Reformats kernel ring lines into the kernel partition.
pub struct KernelCollector {
    store: Arc<LogStore>,
}

impl KernelCollector {
    /// Creates the collector.
    #[must_use]
    pub fn new(store: Arc<LogStore>) -> Self {
        Self { store }
    }

    /// Stores one line. Unparsable lines are skipped, not errors.
    ///
    /// # Errors
    ///
    /// Store rejections other than by parsing.
    pub fn collect_line(&self, line: &str) -> Result<bool> {
        let Some(parsed) = parse_kmsg_line(line) else {
            return Ok(false);
        };
        self.store.log(
            Partition::Kernel,
            Timestamp::default(),
            0,
            0,
            0,
            text_payload(parsed.priority, "kernel", &parsed.message),
        )?;
        Ok(true)
    }

    /// Runs the collector once over a file, line by line.
    ///
    /// # Errors
    ///
    /// I/O failures reading the file; store rejections.
    pub fn collect_file(&self, path: &Path) -> Result<usize> {
        let contents = std::fs::read_to_string(path)?;
        let mut stored = 0;
        for line in contents.lines() {
            if self.collect_line(line)? {
                stored += 1;
            }
        }
        info!(path = %path.display(), stored, "kernel ring source collected");
        Ok(stored)
    }

    /// Follows `path` indefinitely, storing each record line as it
    /// appears. Runs until the source fails or the task is dropped.
    ///
    /// # Errors
    ///
    /// I/O failures on the source; store rejections.
    pub async fn follow_file(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "following kernel ring source");
        follow_lines(path, |line| self.collect_line(line).map(|_| ())).await
    }
}

/// Reformats audit lines into the security partition, with optional
/// text copies into main and binary copies into events, where
/// unprivileged readers can see denials.
pub struct AuditCollector {
    store: Arc<LogStore>,
    also_main: bool,
    also_events: bool,
}

impl AuditCollector {
    /// Creates the collector. The two mirrors toggle independently.
    #[must_use]
    pub fn new(store: Arc<LogStore>, also_main: bool, also_events: bool) -> Self {
        Self {
            store,
            also_main,
            also_events,
        }
    }

    /// Stores one line. Unparsable lines are skipped, not errors.
    ///
    /// # Errors
    ///
    /// Store rejections other than by parsing.
    pub fn collect_line(&self, line: &str) -> Result<bool> {
        let Some(parsed) = parse_audit_line(line) else {
            debug!("skipping non-audit line");
            return Ok(false);
        };
        // Attributed to the daemon (uid 0), which is in the approved
        // set; the originating pid lands in the record header and the
        // offender's comm becomes the text tag.
        let tag = parsed.comm.as_deref().unwrap_or("auditd");
        let payload = text_payload(Priority::Warn, tag, &parsed.message);
        self.store.log(
            Partition::Security,
            parsed.realtime,
            0,
            parsed.pid,
            0,
            payload.clone(),
        )?;
        if self.also_main {
            self.store
                .log(Partition::Main, parsed.realtime, 0, parsed.pid, 0, payload)?;
        }
        if self.also_events {
            self.store.log(
                Partition::Events,
                parsed.realtime,
                0,
                parsed.pid,
                0,
                event_payload(AUDIT_EVENT_TAG, parsed.message.as_bytes()),
            )?;
        }
        Ok(true)
    }

    /// Runs the collector once over a file, line by line.
    ///
    /// # Errors
    ///
    /// I/O failures reading the file; store rejections.
    pub fn collect_file(&self, path: &Path) -> Result<usize> {
        let contents = std::fs::read_to_string(path)?;
        let mut stored = 0;
        for line in contents.lines() {
            if self.collect_line(line)? {
                stored += 1;
            }
        }
        info!(path = %path.display(), stored, "audit source collected");
        Ok(stored)
    }

    /// Follows `path` indefinitely, storing each audit line as it
    /// appears. Runs until the source fails or the task is dropped.
    ///
    /// # Errors
    ///
    /// I/O failures on the source; store rejections.
    pub async fn follow_file(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "following audit source");
        follow_lines(path, |line| self.collect_line(line).map(|_| ())).await
    }
}
