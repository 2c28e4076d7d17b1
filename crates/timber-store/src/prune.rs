//! Eviction policy configuration.
//!
//! This module provides:
//! - [`PruneEntry`] — One `(uid, pid)` selector with an allow or deny
//!   action
//! - [`PruneList`] — Per-partition ordered selector lists parsed from
//!   the administrative string
//!
//! The administrative form is
//! `"<partition>: <entry…>; <partition>: <entry…>; …"` where an entry is
//! `[!|~]uid[/pid]`. `!` marks a deny (sacrifice first); `~` or a bare
//! selector marks an allow (keep longest). `*` wildcards either field.
//! The first matching entry wins.

use std::fmt;
use std::str::FromStr;

use timber_proto::Partition;

use crate::error::StoreError;

/// What a matching selector means for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneAction {
    /// Keep these records longest.
    Allow,
    /// Sacrifice these records first.
    Deny,
}

/// One ordered selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneEntry {
    /// Matching uid; `None` is a wildcard.
    pub uid: Option<u32>,
    /// Matching pid; `None` is a wildcard.
    pub pid: Option<u32>,
    /// Allow or deny.
    pub action: PruneAction,
}

impl PruneEntry {
    /// True if this selector matches the given source.
    #[must_use]
    pub fn matches(&self, uid: u32, pid: u32) -> bool {
        self.uid.is_none_or(|u| u == uid) && self.pid.is_none_or(|p| p == pid)
    }
}

impl fmt::Display for PruneEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.action == PruneAction::Deny {
            write!(f, "!")?;
        }
        match self.uid {
            Some(uid) => write!(f, "{uid}")?,
            None => write!(f, "*")?,
        }
        if let Some(pid) = self.pid {
            write!(f, "/{pid}")?;
        }
        Ok(())
    }
}

fn parse_entry(token: &str) -> Result<PruneEntry, StoreError> {
    let bad = || StoreError::InvalidArgument(format!("bad prune entry '{token}'"));

    let (action, rest) = match token.strip_prefix('!') {
        Some(rest) => (PruneAction::Deny, rest),
        None => (PruneAction::Allow, token.strip_prefix('~').unwrap_or(token)),
    };
    if rest.is_empty() {
        return Err(bad());
    }

    let (uid_part, pid_part) = match rest.split_once('/') {
        Some((uid, pid)) => (uid, Some(pid)),
        None => (rest, None),
    };
    let uid = match uid_part {
        "*" => None,
        n => Some(n.parse().map_err(|_| bad())?),
    };
    let pid = match pid_part {
        None | Some("*") => None,
        Some(n) => Some(n.parse().map_err(|_| bad())?),
    };
    Ok(PruneEntry { uid, pid, action })
}

/// Ordered allow/deny selectors per partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneList {
    entries: [Vec<PruneEntry>; Partition::COUNT],
}

impl PruneList {
    /// An empty policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The selectors configured for `partition`, in declaration order.
    #[must_use]
    pub fn entries(&self, partition: Partition) -> &[PruneEntry] {
        &self.entries[partition.id() as usize]
    }

    /// The action of the first matching selector, if any.
    #[must_use]
    pub fn action(&self, partition: Partition, uid: u32, pid: u32) -> Option<PruneAction> {
        self.entries(partition)
            .iter()
            .find(|e| e.matches(uid, pid))
            .map(|e| e.action)
    }

    /// True if the source is deny-listed for `partition`.
    #[must_use]
    pub fn is_denied(&self, partition: Partition, uid: u32, pid: u32) -> bool {
        self.action(partition, uid, pid) == Some(PruneAction::Deny)
    }

    /// True if the source is allow-listed for `partition`.
    #[must_use]
    pub fn is_allowed(&self, partition: Partition, uid: u32, pid: u32) -> bool {
        self.action(partition, uid, pid) == Some(PruneAction::Allow)
    }

    /// True if `uid` is protected as a whole for `partition`: the first
    /// selector that can match the uid regardless of pid is an allow.
    /// Pid-scoped allows protect only that pid, not the uid.
    #[must_use]
    pub fn is_uid_allowed(&self, partition: Partition, uid: u32) -> bool {
        self.entries(partition)
            .iter()
            .find(|e| e.pid.is_none() && e.uid.is_none_or(|u| u == uid))
            .map(|e| e.action)
            == Some(PruneAction::Allow)
    }

    /// True if any partition carries any selector.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Vec::is_empty)
    }
}

impl FromStr for PruneList {
    type Err = StoreError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let mut list = Self::new();
        for group in spec.split(';') {
            let group = group.trim();
            if group.is_empty() {
                continue;
            }
            let (partition, entries) = group.split_once(':').ok_or_else(|| {
                StoreError::InvalidArgument(format!("missing partition in '{group}'"))
            })?;
            let partition = parse_partition_token(partition.trim())?;
            let slot = &mut list.entries[partition.id() as usize];
            for token in entries.split_whitespace() {
                slot.push(parse_entry(token)?);
            }
        }
        Ok(list)
    }
}

fn parse_partition_token(token: &str) -> Result<Partition, StoreError> {
    if let Ok(id) = token.parse::<u8>() {
        return Partition::from_id(id)
            .ok_or_else(|| StoreError::InvalidArgument(format!("unknown partition id {id}")));
    }
    token
        .parse()
        .map_err(|_| StoreError::InvalidArgument(format!("unknown partition '{token}'")))
}

impl fmt::Display for PruneList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for partition in Partition::ALL {
            let entries = self.entries(partition);
            if entries.is_empty() {
                continue;
            }
            if !first {
                write!(f, "; ")?;
            }
            first = false;
            write!(f, "{partition}:")?;
            for entry in entries {
                write!(f, " {entry}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_deny_and_allow() {
        let list: PruneList = "0: !1000 2000".parse().expect("parse");
        assert!(list.is_denied(Partition::Main, 1000, 1));
        assert!(list.is_allowed(Partition::Main, 2000, 1));
        assert_eq!(list.action(Partition::Main, 3000, 1), None);
    }

    #[test]
    fn tilde_is_allow() {
        let list: PruneList = "main: ~1000".parse().expect("parse");
        assert!(list.is_allowed(Partition::Main, 1000, 7));
        assert!(!list.is_allowed(Partition::Radio, 1000, 7));
    }

    #[test]
    fn first_match_wins() {
        let list: PruneList = "main: !1000/5 1000".parse().expect("parse");
        assert!(list.is_denied(Partition::Main, 1000, 5));
        assert!(list.is_allowed(Partition::Main, 1000, 6));
    }

    #[test]
    fn wildcards() {
        let list: PruneList = "events: !*/42 *".parse().expect("parse");
        assert!(list.is_denied(Partition::Events, 7, 42));
        assert!(list.is_allowed(Partition::Events, 7, 43));
    }

    #[test]
    fn multiple_partitions() {
        let list: PruneList = "0: !1000; radio: 2000; 7: !3000/1".parse().expect("parse");
        assert!(list.is_denied(Partition::Main, 1000, 0));
        assert!(list.is_allowed(Partition::Radio, 2000, 0));
        assert!(list.is_denied(Partition::Kernel, 3000, 1));
        assert!(!list.is_denied(Partition::Kernel, 3000, 2));
    }

    #[test]
    fn rejects_malformed() {
        assert!("nope: 1".parse::<PruneList>().is_err());
        assert!("9: 1".parse::<PruneList>().is_err());
        assert!("main: abc".parse::<PruneList>().is_err());
        assert!("main 1000".parse::<PruneList>().is_err());
        assert!("main: !".parse::<PruneList>().is_err());
    }

    #[test]
    fn empty_spec_is_empty_list() {
        let list: PruneList = "".parse().expect("parse");
        assert!(list.is_empty());
        assert_eq!(list.to_string(), "");
    }

    #[test]
    fn display_round_trips() {
        let list: PruneList = "main: !1000 2000/7; kernel: !*/9".parse().expect("parse");
        let reparsed: PruneList = list.to_string().parse().expect("reparse");
        assert_eq!(list, reparsed);
        assert_eq!(list.to_string(), "main: !1000 2000/7; kernel: !*/9");
    }
}
