//! Reader subscriptions and their registry.
//!
//! This module provides:
//! - [`ReaderRegistry`] — The set of live subscriptions, keyed by
//!   numeric handle
//! - [`SubscriptionHandle`] — What an egress worker holds: cursor,
//!   filters, drop counter, cancel flag
//! - [`Batch`] — One served batch with its drop report
//!
//! A subscription never holds a reference into the store; it remembers
//! the next sequence it wants and re-reads under a short lock. When the
//! store evicts a record a subscription has not yet passed, the
//! eviction path bumps that subscription's drop counter — that is what
//! makes drop accounting exact rather than inferred from sequence gaps.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use timber_proto::{
    text_payload, Partition, PartitionMask, Priority, ReadMode, ReadRequest, Record, Timestamp,
};

use crate::error::StoreError;
use crate::Result;

/// Identifies one live subscription.
pub type SubscriptionId = u64;

/// One served batch.
#[derive(Debug, Default)]
pub struct Batch {
    /// Filter-matching records, ascending by sequence.
    pub records: Vec<Arc<Record>>,
    /// Records this subscription lost to eviction since the last batch.
    pub dropped: u64,
    /// True when the subscription has nothing further to serve.
    pub finished: bool,
    /// True when nothing else is resident right now: the caller may
    /// block for new records. False means "fetch again immediately" —
    /// the batch may be empty merely because a scan window matched
    /// nothing.
    pub caught_up: bool,
}

impl Batch {
    /// A terminal, empty batch.
    #[must_use]
    pub fn finished() -> Self {
        Self {
            finished: true,
            caught_up: true,
            ..Self::default()
        }
    }
}

/// Shared per-subscription state.
///
/// The cursor and drop counter are atomics because the eviction path
/// reads them under the store's write lock while the serving path
/// updates them under the read lock; the lock exclusion makes each
/// update race-free, the atomics make the sharing safe.
#[derive(Debug)]
pub struct SubscriptionState {
    mask: PartitionMask,
    uid: Option<u32>,
    pid: Option<u32>,
    min_priority: Option<Priority>,
    start: Option<Timestamp>,
    stop_sequence: u64,
    mode: ReadMode,
    chatty: bool,
    idle_timeout: Option<std::time::Duration>,
    cursor: AtomicU64,
    drops: AtomicU64,
    cancelled: AtomicBool,
    wake: Notify,
}

impl SubscriptionState {
    /// The partitions this subscription covers.
    #[must_use]
    pub fn mask(&self) -> PartitionMask {
        self.mask
    }

    /// The next sequence this subscription has not yet considered.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// The last sequence this subscription will serve.
    #[must_use]
    pub fn stop_sequence(&self) -> u64 {
        self.stop_sequence
    }

    /// True for dump-mode subscriptions.
    #[must_use]
    pub fn is_dump(&self) -> bool {
        self.mode == ReadMode::Dump
    }

    /// True when the subscription wants a synthetic record summarizing
    /// its drops.
    #[must_use]
    pub fn wants_chatty(&self) -> bool {
        self.chatty
    }

    /// How long a streaming read may sit idle before it ends, when the
    /// request asked for a deadline.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<std::time::Duration> {
        self.idle_timeout
    }

    /// Moves the cursor forward. Never moves it back.
    pub fn advance_cursor(&self, to: u64) {
        let current = self.cursor.load(Ordering::Acquire);
        if to > current {
            self.cursor.store(to, Ordering::Release);
        }
    }

    /// Drains the accumulated drop count.
    #[must_use]
    pub fn take_drops(&self) -> u64 {
        self.drops.swap(0, Ordering::AcqRel)
    }

    /// True once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Waits until the subscription is woken by a cancel.
    pub async fn cancelled_wait(&self) {
        self.wake.notified().await;
    }

    /// Does `record` pass this subscription's filters?
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        filter_matches(
            self.mask,
            self.uid,
            self.pid,
            self.min_priority,
            self.start,
            record,
        )
    }
}

fn filter_matches(
    mask: PartitionMask,
    uid: Option<u32>,
    pid: Option<u32>,
    min_priority: Option<Priority>,
    start: Option<Timestamp>,
    record: &Record,
) -> bool {
    if !mask.contains(record.partition) {
        return false;
    }
    if uid.is_some_and(|u| u != record.uid) {
        return false;
    }
    if pid.is_some_and(|p| p != record.pid) {
        return false;
    }
    if start.is_some_and(|s| record.realtime < s) {
        return false;
    }
    if let Some(floor) = min_priority {
        // Binary partitions carry no priority and always pass.
        if !record.partition.is_binary() {
            match record.priority() {
                Some(priority) => {
                    if !priority.is_at_least(floor) {
                        return false;
                    }
                }
                None => return false,
            }
        }
    }
    true
}

/// What an egress worker holds for one subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    state: Arc<SubscriptionState>,
}

impl SubscriptionHandle {
    /// The registry key of this subscription.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The shared state.
    #[must_use]
    pub fn state(&self) -> &SubscriptionState {
        &self.state
    }

    /// Flags the subscription cancelled and wakes its worker. Prompt:
    /// the worker observes it at the next batch boundary or wake.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.wake.notify_one();
    }

    /// True once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }
}

/// The set of live subscriptions.
pub struct ReaderRegistry {
    subscriptions: Mutex<HashMap<SubscriptionId, Arc<SubscriptionState>>>,
    next_id: AtomicU64,
    limit: usize,
}

impl ReaderRegistry {
    /// Creates an empty registry capped at `limit` subscriptions.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            limit,
        }
    }

    /// Registers a subscription.
    ///
    /// # Errors
    ///
    /// [`StoreError::TooManySubscriptions`] at the cap.
    pub fn register(
        &self,
        request: &ReadRequest,
        start_cursor: u64,
        stop_sequence: u64,
        chatty: bool,
    ) -> Result<SubscriptionHandle> {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.len() >= self.limit {
            return Err(StoreError::TooManySubscriptions(self.limit));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(SubscriptionState {
            mask: request.mask,
            uid: request.uid,
            pid: request.pid,
            min_priority: request.min_priority,
            start: request.start,
            stop_sequence,
            mode: request.mode,
            chatty,
            idle_timeout: request.timeout_secs.map(std::time::Duration::from_secs),
            cursor: AtomicU64::new(start_cursor),
            drops: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            wake: Notify::new(),
        });
        subscriptions.insert(id, Arc::clone(&state));
        trace!(id, start_cursor, stop_sequence, "subscription registered");
        Ok(SubscriptionHandle { id, state })
    }

    /// Removes a subscription. Unknown ids are ignored.
    pub fn remove(&self, id: SubscriptionId) {
        self.subscriptions.lock().remove(&id);
    }

    /// Live subscription count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// True when no subscription is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.lock().is_empty()
    }

    /// Called by the store, under its write lock, for every record it
    /// evicts or clears: any live subscription that had not yet passed
    /// the record and whose filters match it loses it.
    pub fn note_evicted(&self, record: &Record) {
        let subscriptions = self.subscriptions.lock();
        for state in subscriptions.values() {
            if state.is_cancelled() {
                continue;
            }
            if record.sequence >= state.cursor.load(Ordering::Acquire) && state.matches(record) {
                state.drops.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    /// Does `record` pass the filters of an as-yet-unregistered
    /// `request`? Used to seed `tail=` cursors.
    #[must_use]
    pub fn request_matches(request: &ReadRequest, record: &Record) -> bool {
        filter_matches(
            request.mask,
            request.uid,
            request.pid,
            request.min_priority,
            request.start,
            record,
        )
    }

    /// Cancels every live subscription, for shutdown.
    pub fn cancel_all(&self) {
        let subscriptions = self.subscriptions.lock();
        for state in subscriptions.values() {
            state.cancelled.store(true, Ordering::Release);
            state.wake.notify_one();
        }
    }
}

/// Builds the synthetic record reporting `dropped` lost records on a
/// subscription, attributed to the daemon itself.
#[must_use]
pub fn chatty_record(partition: Partition, dropped: u64) -> Record {
    Record {
        sequence: 0,
        partition,
        realtime: Timestamp::now(),
        uid: 0,
        pid: 0,
        tid: 0,
        payload: text_payload(
            Priority::Info,
            "chatty",
            &format!("dropped {dropped} records"),
        ),
    }
}
