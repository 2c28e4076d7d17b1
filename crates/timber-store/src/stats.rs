//! Accounting that feeds eviction decisions and the statistics dump.
//!
//! This module provides:
//! - [`SourceStats`] — bytes / records / drops for one source
//! - [`PartitionStats`] — totals plus per-uid, per-pid and per-tag tables
//! - [`Statistics`] — the eight partition tables and their queries
//!
//! All mutation happens under the store lock, so the counters stay
//! consistent with the live record set. Increments are O(1); the
//! worst-offender query scans the per-uid table of one partition, which
//! only runs while that partition is being pruned.

use std::collections::HashMap;

use serde::Serialize;

use timber_proto::{Partition, Record};

/// Counters for one source (a uid, a pid, or an event tag).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    /// Resident payload bytes plus per-record overhead.
    pub bytes: usize,
    /// Resident records.
    pub records: usize,
    /// Records evicted by pruning.
    pub drops: usize,
}

impl SourceStats {
    fn add(&mut self, size: usize) {
        self.bytes += size;
        self.records += 1;
    }

    fn sub(&mut self, size: usize, dropped: bool) {
        self.bytes = self.bytes.saturating_sub(size);
        self.records = self.records.saturating_sub(1);
        if dropped {
            self.drops += 1;
        }
    }
}

/// Accounting for one partition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PartitionStats {
    /// Partition totals.
    pub total: SourceStats,
    /// Per-uid breakdown.
    pub by_uid: HashMap<u32, SourceStats>,
    /// Per-pid breakdown.
    pub by_pid: HashMap<u32, SourceStats>,
    /// Per-tag breakdown; populated only for binary partitions.
    pub by_tag: HashMap<u32, SourceStats>,
}

/// The store's accounting, one table per partition.
#[derive(Debug, Default, Serialize)]
pub struct Statistics {
    partitions: [PartitionStats; Partition::COUNT],
}

impl Statistics {
    /// Creates empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The table for `partition`.
    #[must_use]
    pub fn partition(&self, partition: Partition) -> &PartitionStats {
        &self.partitions[partition.id() as usize]
    }

    /// Accounts an inserted record.
    pub fn observe_insert(&mut self, record: &Record) {
        let size = record.wire_size();
        let tag = record.event_tag();
        let stats = &mut self.partitions[record.partition.id() as usize];
        stats.total.add(size);
        stats.by_uid.entry(record.uid).or_default().add(size);
        stats.by_pid.entry(record.pid).or_default().add(size);
        if let Some(tag) = tag {
            stats.by_tag.entry(tag).or_default().add(size);
        }
    }

    /// Accounts a pruned record: resident counters go down, drop
    /// counters go up.
    pub fn observe_evict(&mut self, record: &Record) {
        self.remove(record, true);
    }

    /// Accounts an explicitly cleared record: resident counters go down,
    /// drop counters stay.
    pub fn observe_clear(&mut self, record: &Record) {
        self.remove(record, false);
    }

    fn remove(&mut self, record: &Record, dropped: bool) {
        let size = record.wire_size();
        let tag = record.event_tag();
        let stats = &mut self.partitions[record.partition.id() as usize];
        stats.total.sub(size, dropped);
        if let Some(entry) = stats.by_uid.get_mut(&record.uid) {
            entry.sub(size, dropped);
        }
        if let Some(entry) = stats.by_pid.get_mut(&record.pid) {
            entry.sub(size, dropped);
        }
        if let Some(tag) = tag {
            if let Some(entry) = stats.by_tag.get_mut(&tag) {
                entry.sub(size, dropped);
            }
        }
    }

    /// The uid holding the most resident bytes in `partition`, skipping
    /// uids for which `exempt` returns true. Returns the worst uid, its
    /// bytes, and the runner-up's bytes (zero when there is none).
    #[must_use]
    pub fn worst_uid(
        &self,
        partition: Partition,
        exempt: &dyn Fn(u32) -> bool,
    ) -> Option<(u32, usize, usize)> {
        let mut worst: Option<(u32, usize)> = None;
        let mut runner_up = 0usize;
        for (&uid, stats) in &self.partition(partition).by_uid {
            if stats.bytes == 0 || exempt(uid) {
                continue;
            }
            match worst {
                Some((_, bytes)) if stats.bytes <= bytes => {
                    runner_up = runner_up.max(stats.bytes);
                }
                Some((_, bytes)) => {
                    runner_up = runner_up.max(bytes);
                    worst = Some((uid, stats.bytes));
                }
                None => worst = Some((uid, stats.bytes)),
            }
        }
        worst.map(|(uid, bytes)| (uid, bytes, runner_up))
    }

    /// Renders the text table served by `getStatistics`.
    #[must_use]
    pub fn dump(&self, partitions: &[Partition], quotas: &[usize; Partition::COUNT]) -> String {
        use std::fmt::Write as _;

        let selected: Vec<Partition> = if partitions.is_empty() {
            Partition::ALL.to_vec()
        } else {
            partitions.to_vec()
        };

        let mut out = String::new();
        for partition in selected {
            let stats = self.partition(partition);
            let _ = writeln!(
                out,
                "{partition}: quota={} used={} records={} drops={}",
                quotas[partition.id() as usize],
                stats.total.bytes,
                stats.total.records,
                stats.total.drops,
            );
            for (label, table) in [("uid", &stats.by_uid), ("pid", &stats.by_pid)] {
                let mut rows: Vec<(&u32, &SourceStats)> = table.iter().collect();
                rows.sort_by(|a, b| b.1.bytes.cmp(&a.1.bytes).then(a.0.cmp(b.0)));
                for (id, row) in rows {
                    if row.bytes == 0 && row.drops == 0 {
                        continue;
                    }
                    let _ = writeln!(
                        out,
                        "  {label} {id}: bytes={} records={} drops={}",
                        row.bytes, row.records, row.drops
                    );
                }
            }
            if partition.is_binary() {
                let mut rows: Vec<(&u32, &SourceStats)> = stats.by_tag.iter().collect();
                rows.sort_by(|a, b| b.1.bytes.cmp(&a.1.bytes).then(a.0.cmp(b.0)));
                for (tag, row) in rows {
                    if row.bytes == 0 && row.drops == 0 {
                        continue;
                    }
                    let _ = writeln!(
                        out,
                        "  tag {tag}: bytes={} records={} drops={}",
                        row.bytes, row.records, row.drops
                    );
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use timber_proto::{event_payload, text_payload, Priority, Timestamp};

    fn text_record(uid: u32, message: &str) -> Arc<Record> {
        Arc::new(Record {
            sequence: 1,
            partition: Partition::Main,
            realtime: Timestamp::new(1, 0),
            uid,
            pid: uid * 2,
            tid: uid * 2,
            payload: text_payload(Priority::Info, "t", message),
        })
    }

    fn event_record(uid: u32, tag: u32) -> Arc<Record> {
        Arc::new(Record {
            sequence: 1,
            partition: Partition::Events,
            realtime: Timestamp::new(1, 0),
            uid,
            pid: uid,
            tid: uid,
            payload: event_payload(tag, &[0; 4]),
        })
    }

    #[test]
    fn insert_then_evict_balances() {
        let mut stats = Statistics::new();
        let record = text_record(1000, "hello");

        stats.observe_insert(&record);
        let table = stats.partition(Partition::Main);
        assert_eq!(table.total.bytes, record.wire_size());
        assert_eq!(table.total.records, 1);
        assert_eq!(table.by_uid[&1000].records, 1);

        stats.observe_evict(&record);
        let table = stats.partition(Partition::Main);
        assert_eq!(table.total.bytes, 0);
        assert_eq!(table.total.records, 0);
        assert_eq!(table.total.drops, 1);
        assert_eq!(table.by_uid[&1000].drops, 1);
    }

    #[test]
    fn clear_does_not_count_drops() {
        let mut stats = Statistics::new();
        let record = text_record(1000, "hello");
        stats.observe_insert(&record);
        stats.observe_clear(&record);
        assert_eq!(stats.partition(Partition::Main).total.drops, 0);
        assert_eq!(stats.partition(Partition::Main).total.bytes, 0);
    }

    #[test]
    fn tags_tracked_for_binary_partitions() {
        let mut stats = Statistics::new();
        stats.observe_insert(&event_record(0, 42));
        stats.observe_insert(&event_record(0, 42));
        stats.observe_insert(&event_record(0, 43));
        let table = stats.partition(Partition::Events);
        assert_eq!(table.by_tag[&42].records, 2);
        assert_eq!(table.by_tag[&43].records, 1);
    }

    #[test]
    fn worst_uid_orders_and_exempts() {
        let mut stats = Statistics::new();
        for _ in 0..5 {
            stats.observe_insert(&text_record(1000, "aaaaaaaaaa"));
        }
        for _ in 0..2 {
            stats.observe_insert(&text_record(2000, "aaaaaaaaaa"));
        }

        let (uid, bytes, runner_up) = stats
            .worst_uid(Partition::Main, &|_| false)
            .expect("some uid");
        assert_eq!(uid, 1000);
        assert!(bytes > runner_up);
        assert!(runner_up > 0);

        // Exempting the worst promotes the runner-up.
        let (uid, _, runner_up) = stats
            .worst_uid(Partition::Main, &|uid| uid == 1000)
            .expect("some uid");
        assert_eq!(uid, 2000);
        assert_eq!(runner_up, 0);

        assert!(stats.worst_uid(Partition::Radio, &|_| false).is_none());
    }

    #[test]
    fn dump_lists_sources_worst_first() {
        let mut stats = Statistics::new();
        stats.observe_insert(&text_record(2000, "a"));
        for _ in 0..3 {
            stats.observe_insert(&text_record(1000, "aaaaaaaaaaaaaaaaaaaa"));
        }

        let quotas = [256 * 1024; Partition::COUNT];
        let dump = stats.dump(&[Partition::Main], &quotas);
        let uid_1000 = dump.find("uid 1000").expect("uid 1000 listed");
        let uid_2000 = dump.find("uid 2000").expect("uid 2000 listed");
        assert!(uid_1000 < uid_2000);
        assert!(dump.starts_with("main: quota=262144"));
    }
}
