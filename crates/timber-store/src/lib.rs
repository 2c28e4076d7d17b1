//! # timber-store
//!
//! The bounded in-memory log store and its concurrent reader/writer
//! protocol.
//!
//! This crate provides:
//!
//! - [`LogStore`] — Eight bounded partitions behind one write lock
//! - [`PartitionBuffer`] — The storage capability, with a linked
//!   ([`SimpleBuffer`]) and a compacted ([`SerializedBuffer`]) backend
//! - [`PruneList`] — Allow/deny eviction policy parsed from the
//!   administrative string
//! - [`Statistics`] — Per-partition, per-source accounting that feeds
//!   eviction decisions
//! - [`ReaderRegistry`] / [`SubscriptionHandle`] — Resumable reader
//!   cursors with exact drop accounting
//!
//! Writers never block on readers: a write takes the store lock, appends,
//! prunes its partition back under quota, and publishes the new tail
//! sequence on a watch channel that tail subscriptions wait on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod error;
pub mod prune;
pub mod readers;
pub mod stats;
pub mod store;

pub use buffer::{BufferBackend, PartitionBuffer, SerializedBuffer, SimpleBuffer};
pub use error::StoreError;
pub use prune::{PruneAction, PruneEntry, PruneList};
pub use readers::{chatty_record, Batch, ReaderRegistry, SubscriptionHandle, SubscriptionId};
pub use stats::{PartitionStats, SourceStats, Statistics};
pub use store::{LogStore, StoreConfig, Written, MAX_QUOTA, MIN_QUOTA};

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
