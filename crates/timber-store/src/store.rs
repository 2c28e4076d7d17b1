//! The central log store.
//!
//! This module provides:
//! - [`LogStore`] — Eight bounded partitions, one write-exclusive lock,
//!   synchronous pruning, watch-channel tail publication
//! - [`StoreConfig`] — Quotas, backend, caps and the security uid set
//! - [`Snapshot`] — A lazy range read that re-locks per batch
//!
//! One write is: assign the next sequence, append, account, prune the
//! partition back under quota, publish the tail. Readers take the lock
//! in bounded batches and never hold it across a yield, so a slow
//! subscriber can never stall a writer.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use timber_proto::{
    Partition, PartitionMask, ReadMode, ReadRequest, Record, Timestamp, MAX_PAYLOAD,
};

use crate::buffer::{BufferBackend, PartitionBuffer};
use crate::error::StoreError;
use crate::prune::PruneList;
use crate::readers::{Batch, ReaderRegistry, SubscriptionHandle};
use crate::stats::{PartitionStats, Statistics};
use crate::Result;

/// Smallest accepted partition quota.
pub const MIN_QUOTA: usize = 64 * 1024;

/// Largest accepted partition quota.
pub const MAX_QUOTA: usize = 256 * 1024 * 1024;

/// Default quota for every partition.
pub const DEFAULT_QUOTA: usize = 256 * 1024;

/// Records served per lock acquisition on the read side.
pub(crate) const READ_BATCH: usize = 128;

/// Store construction parameters.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Which partition storage backend to use.
    pub backend: BufferBackend,
    /// Byte quota per partition, indexed by partition id. Values are
    /// clamped into `[MIN_QUOTA, MAX_QUOTA]` at construction.
    pub quotas: [usize; Partition::COUNT],
    /// Uids allowed to write the security partition.
    pub security_uids: Vec<u32>,
    /// Cap on concurrently registered subscriptions.
    pub max_subscriptions: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BufferBackend::default(),
            quotas: [DEFAULT_QUOTA; Partition::COUNT],
            security_uids: vec![0, 1000],
            max_subscriptions: 1024,
        }
    }
}

/// Outcome of an accepted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Written {
    /// Payload bytes accepted.
    pub bytes: usize,
    /// Records evicted to bring the partition back under quota.
    pub evicted: usize,
}

struct Inner {
    buffers: Vec<Box<dyn PartitionBuffer>>,
    quotas: [usize; Partition::COUNT],
    stats: Statistics,
    next_sequence: u64,
}

impl Inner {
    fn buffer(&self, partition: Partition) -> &dyn PartitionBuffer {
        self.buffers[partition.id() as usize].as_ref()
    }

    fn buffer_mut(&mut self, partition: Partition) -> &mut Box<dyn PartitionBuffer> {
        &mut self.buffers[partition.id() as usize]
    }
}

/// The in-memory log store.
///
/// Lock order, where multiple are taken: the store lock first, then the
/// prune list, then the reader registry.
pub struct LogStore {
    inner: RwLock<Inner>,
    prune: RwLock<PruneList>,
    readers: ReaderRegistry,
    tail_tx: watch::Sender<u64>,
    security_uids: Vec<u32>,
}

impl LogStore {
    /// Creates a store from `config`.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        let buffers = Partition::ALL
            .into_iter()
            .map(|p| config.backend.make(p))
            .collect();
        let mut quotas = config.quotas;
        for quota in &mut quotas {
            *quota = (*quota).clamp(MIN_QUOTA, MAX_QUOTA);
        }
        let (tail_tx, _) = watch::channel(0);
        info!(
            backend = ?config.backend,
            max_subscriptions = config.max_subscriptions,
            "log store ready"
        );
        Self {
            inner: RwLock::new(Inner {
                buffers,
                quotas,
                stats: Statistics::new(),
                next_sequence: 1,
            }),
            prune: RwLock::new(PruneList::new()),
            readers: ReaderRegistry::new(config.max_subscriptions),
            tail_tx,
            security_uids: config.security_uids,
        }
    }

    // =====================================================================
    // Write path
    // =====================================================================

    /// Accepts one record.
    ///
    /// Validates, assigns the next sequence under the write lock,
    /// appends, accounts, prunes the partition back under quota, then
    /// publishes the new tail. Never blocks on readers.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidArgument`] for an empty or oversized payload;
    /// [`StoreError::PermissionDenied`] for a security-partition write
    /// from an unapproved uid.
    pub fn log(
        &self,
        partition: Partition,
        realtime: Timestamp,
        uid: u32,
        pid: u32,
        tid: u32,
        payload: Vec<u8>,
    ) -> Result<Written> {
        if payload.is_empty() || payload.len() > MAX_PAYLOAD {
            return Err(StoreError::InvalidArgument(format!(
                "payload length {} out of range",
                payload.len()
            )));
        }
        if partition == Partition::Security && !self.security_uids.contains(&uid) {
            return Err(StoreError::PermissionDenied(uid));
        }
        let realtime = if realtime.is_zero() {
            Timestamp::now()
        } else {
            realtime
        };
        let bytes = payload.len();

        let (sequence, evicted) = {
            let mut inner = self.inner.write();
            let sequence = inner.next_sequence;
            inner.next_sequence += 1;
            let record = Arc::new(Record {
                sequence,
                partition,
                realtime,
                uid,
                pid,
                tid,
                payload,
            });
            inner.buffer_mut(partition).append(Arc::clone(&record));
            inner.stats.observe_insert(&record);
            let evicted = self.prune_locked(&mut inner, partition);
            (sequence, evicted)
        };

        self.tail_tx.send_replace(sequence);
        Ok(Written { bytes, evicted })
    }

    /// Runs the eviction sweeps on `partition` until it is back under
    /// quota or nothing is left to evict. Caller holds the write lock.
    fn prune_locked(&self, inner: &mut Inner, partition: Partition) -> usize {
        let quota = inner.quotas[partition.id() as usize];
        if inner.buffer(partition).byte_usage() <= quota {
            return 0;
        }
        let prune = self.prune.read();
        let mut evicted = 0usize;

        // Sweep 1: sacrifice deny-listed sources first.
        while inner.buffer(partition).byte_usage() > quota {
            let victim = inner
                .buffer_mut(partition)
                .evict_oldest_matching(&|r| prune.is_denied(partition, r.uid, r.pid));
            match victim {
                Some(victim) => evicted += self.account_eviction(inner, &victim),
                None => break,
            }
        }

        // Sweep 2: shrink the worst-offending uid down to the runner-up's
        // share or the floor, whichever comes first.
        let floor = quota / 10;
        while inner.buffer(partition).byte_usage() > quota {
            let worst = inner
                .stats
                .worst_uid(partition, &|uid| prune.is_uid_allowed(partition, uid));
            let Some((uid, share, runner_up)) = worst else {
                break;
            };
            let stop_at = runner_up.max(floor);
            let mut share = share;
            let mut progressed = false;
            while inner.buffer(partition).byte_usage() > quota && share > stop_at {
                let Some(victim) = inner
                    .buffer_mut(partition)
                    .evict_oldest_matching(&|r| r.uid == uid)
                else {
                    break;
                };
                share = share.saturating_sub(victim.wire_size());
                evicted += self.account_eviction(inner, &victim);
                progressed = true;
            }
            if !progressed {
                break;
            }
        }

        // Sweep 3: oldest-first, sparing allow-listed sources.
        while inner.buffer(partition).byte_usage() > quota {
            let victim = inner
                .buffer_mut(partition)
                .evict_oldest_matching(&|r| !prune.is_allowed(partition, r.uid, r.pid));
            match victim {
                Some(victim) => evicted += self.account_eviction(inner, &victim),
                None => break,
            }
        }

        // Sweep 4: the allow list is advisory, never hard.
        while inner.buffer(partition).byte_usage() > quota {
            match inner.buffer_mut(partition).evict_oldest() {
                Some(victim) => evicted += self.account_eviction(inner, &victim),
                None => break,
            }
        }

        if evicted > 0 {
            debug!(partition = %partition, evicted, "pruned over-quota partition");
        }
        evicted
    }

    fn account_eviction(&self, inner: &mut Inner, victim: &Record) -> usize {
        inner.stats.observe_evict(victim);
        self.readers.note_evicted(victim);
        1
    }

    // =====================================================================
    // Read path
    // =====================================================================

    /// A lazy range read over the partitions in `mask`.
    ///
    /// Yields records with sequence in `[start_seq, stop_seq]` in
    /// strictly increasing order, re-acquiring a short read lock per
    /// batch.
    #[must_use]
    pub fn snapshot(&self, mask: PartitionMask, start_seq: u64, stop_seq: u64) -> Snapshot<'_> {
        Snapshot {
            store: self,
            mask,
            cursor: start_seq,
            stop: stop_seq,
            buffered: Vec::new(),
            buffered_at: 0,
            done: false,
        }
    }

    /// Collects one merged batch across `mask`, at most `limit` records,
    /// ascending by sequence. Returns the batch and whether it exhausted
    /// everything resident in the range.
    pub(crate) fn collect_batch(
        &self,
        mask: PartitionMask,
        start: u64,
        stop: u64,
        limit: usize,
    ) -> (Vec<Arc<Record>>, bool) {
        let inner = self.inner.read();
        let mut merged: Vec<Arc<Record>> = Vec::new();
        for partition in mask.iter() {
            merged.extend(inner.buffer(partition).collect_range(start, stop, limit));
        }
        merged.sort_by_key(|r| r.sequence);
        // Fewer than `limit` from every partition means the range is
        // fully drained; exactly `limit` is inconclusive.
        let exhausted = merged.len() < limit;
        merged.truncate(limit);
        (merged, exhausted)
    }

    /// The sequence the next write will receive.
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.inner.read().next_sequence
    }

    /// A receiver of the latest assigned sequence, for tail waiting.
    #[must_use]
    pub fn tail_receiver(&self) -> watch::Receiver<u64> {
        self.tail_tx.subscribe()
    }

    // =====================================================================
    // Subscriptions
    // =====================================================================

    /// Registers a subscription for `request`.
    ///
    /// # Errors
    ///
    /// [`StoreError::TooManySubscriptions`] at the configured cap.
    pub fn subscribe(&self, request: &ReadRequest, chatty: bool) -> Result<SubscriptionHandle> {
        let inner = self.inner.read();
        let next_sequence = inner.next_sequence;

        let stop_sequence = match request.mode {
            ReadMode::Dump => next_sequence - 1,
            ReadMode::Stream => u64::MAX,
        };

        let start_cursor = match request.tail {
            None => 1,
            Some(0) => next_sequence,
            Some(n) => {
                // Find the n-th-from-last resident record the filter
                // matches; everything older is not seeded.
                let mut matching: Vec<u64> = Vec::new();
                for partition in request.mask.iter() {
                    for record in inner.buffer(partition).collect_range(1, u64::MAX, usize::MAX) {
                        if ReaderRegistry::request_matches(request, &record) {
                            matching.push(record.sequence);
                        }
                    }
                }
                matching.sort_unstable();
                match matching.len().checked_sub(n) {
                    Some(skip) => matching.get(skip).copied().unwrap_or(next_sequence),
                    None if matching.is_empty() => 1,
                    None => matching[0],
                }
            }
        };

        // Registered before the read lock drops so no eviction can slip
        // between the cursor decision and the registry insert.
        let handle = self
            .readers
            .register(request, start_cursor, stop_sequence, chatty);
        drop(inner);
        handle
    }

    /// Serves the next batch for `handle`, advancing its cursor.
    ///
    /// Returns the matching records, any drops accumulated since the
    /// last call, and whether the subscription is finished.
    #[must_use]
    pub fn fetch_batch(&self, handle: &SubscriptionHandle) -> Batch {
        if handle.is_cancelled() {
            return Batch::finished();
        }

        let inner = self.inner.read();
        let next_sequence = inner.next_sequence;
        let state = handle.state();
        let cursor = state.cursor();
        let stop = state.stop_sequence();

        if cursor > stop || cursor >= next_sequence {
            drop(inner);
            return Batch {
                records: Vec::new(),
                dropped: state.take_drops(),
                finished: state.is_dump() && cursor > stop,
                caught_up: true,
            };
        }

        let mut merged: Vec<Arc<Record>> = Vec::new();
        for partition in state.mask().iter() {
            merged.extend(inner.buffer(partition).collect_range(cursor, stop, READ_BATCH));
        }
        merged.sort_by_key(|r| r.sequence);
        let exhausted = merged.len() < READ_BATCH;
        merged.truncate(READ_BATCH);

        let new_cursor = if exhausted {
            // Nothing else resident in range: skip the hole.
            stop.saturating_add(1).min(next_sequence.max(cursor))
        } else {
            merged.last().map_or(cursor, |r| r.sequence + 1)
        };
        // The cursor moves under the read lock so it cannot race the
        // eviction accounting, which runs under the write lock.
        state.advance_cursor(new_cursor);
        drop(inner);

        let records: Vec<Arc<Record>> = merged
            .into_iter()
            .filter(|r| state.matches(r))
            .collect();

        Batch {
            records,
            dropped: state.take_drops(),
            finished: state.is_dump() && new_cursor > stop,
            caught_up: exhausted,
        }
    }

    /// Cancels and removes a subscription. Unknown handles are ignored;
    /// cancellation must be idempotent.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        handle.cancel();
        self.readers.remove(handle.id());
    }

    /// Live subscription count.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.readers.len()
    }

    /// Cancels every live subscription, for shutdown.
    pub fn cancel_all_subscriptions(&self) {
        self.readers.cancel_all();
    }

    /// The uids allowed to write (and administratively read) the
    /// security partition.
    #[must_use]
    pub fn security_uids(&self) -> &[u32] {
        &self.security_uids
    }

    // =====================================================================
    // Administration
    // =====================================================================

    /// Removes every record in `partition` matching the optional uid
    /// filter. Live subscriptions observe a gap and continue.
    pub fn clear(&self, partition: Partition, uid: Option<u32>) -> usize {
        let mut inner = self.inner.write();
        let victims = inner
            .buffer_mut(partition)
            .evict_all_matching(&|r| uid.is_none_or(|u| r.uid == u));
        for victim in &victims {
            inner.stats.observe_clear(victim);
            self.readers.note_evicted(victim);
        }
        if !victims.is_empty() {
            info!(partition = %partition, removed = victims.len(), "cleared");
        }
        victims.len()
    }

    /// The quota of `partition` in bytes.
    #[must_use]
    pub fn quota(&self, partition: Partition) -> usize {
        self.inner.read().quotas[partition.id() as usize]
    }

    /// Sets the quota of `partition`, then prunes it down to the new
    /// quota immediately.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidArgument`] outside `[MIN_QUOTA, MAX_QUOTA]`.
    pub fn set_quota(&self, partition: Partition, bytes: usize) -> Result<()> {
        if !(MIN_QUOTA..=MAX_QUOTA).contains(&bytes) {
            return Err(StoreError::InvalidArgument(format!(
                "quota {bytes} outside [{MIN_QUOTA}, {MAX_QUOTA}]"
            )));
        }
        let mut inner = self.inner.write();
        inner.quotas[partition.id() as usize] = bytes;
        let evicted = self.prune_locked(&mut inner, partition);
        if evicted > 0 {
            warn!(partition = %partition, bytes, evicted, "quota shrink evicted records");
        }
        Ok(())
    }

    /// Resident bytes in `partition`.
    #[must_use]
    pub fn used_bytes(&self, partition: Partition) -> usize {
        self.inner.read().buffer(partition).byte_usage()
    }

    /// Resident records in `partition`.
    #[must_use]
    pub fn record_count(&self, partition: Partition) -> usize {
        self.inner.read().buffer(partition).record_count()
    }

    /// A copy of the accounting for `partition`.
    #[must_use]
    pub fn partition_stats(&self, partition: Partition) -> PartitionStats {
        self.inner.read().stats.partition(partition).clone()
    }

    /// The `getStatistics` text table.
    #[must_use]
    pub fn statistics_dump(&self, partitions: &[Partition]) -> String {
        let inner = self.inner.read();
        inner.stats.dump(partitions, &inner.quotas)
    }

    /// The prune configuration in canonical administrative form.
    #[must_use]
    pub fn prune_list_string(&self) -> String {
        self.prune.read().to_string()
    }

    /// Replaces the prune configuration.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidArgument`] for a malformed spec.
    pub fn set_prune_list(&self, spec: &str) -> Result<()> {
        let parsed: PruneList = spec.parse()?;
        *self.prune.write() = parsed;
        Ok(())
    }
}

/// A lazy, finite range read. See [`LogStore::snapshot`].
pub struct Snapshot<'a> {
    store: &'a LogStore,
    mask: PartitionMask,
    cursor: u64,
    stop: u64,
    buffered: Vec<Arc<Record>>,
    buffered_at: usize,
    done: bool,
}

impl Iterator for Snapshot<'_> {
    type Item = Arc<Record>;

    fn next(&mut self) -> Option<Arc<Record>> {
        if self.buffered_at >= self.buffered.len() {
            if self.done {
                return None;
            }
            let (batch, exhausted) =
                self.store
                    .collect_batch(self.mask, self.cursor, self.stop, READ_BATCH);
            if exhausted {
                self.done = true;
            }
            if let Some(last) = batch.last() {
                self.cursor = last.sequence + 1;
            }
            self.buffered = batch;
            self.buffered_at = 0;
            if self.buffered.is_empty() {
                return None;
            }
        }
        let record = Arc::clone(&self.buffered[self.buffered_at]);
        self.buffered_at += 1;
        Some(record)
    }
}
