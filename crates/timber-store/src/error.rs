//! Error types for the store.

use thiserror::Error;

/// Errors surfaced by store operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Unknown partition, malformed policy string, out-of-range value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A write to the security partition from an unapproved uid.
    #[error("uid {0} may not write the security partition")]
    PermissionDenied(u32),

    /// The subscription cap is reached.
    #[error("too many subscriptions (limit {0})")]
    TooManySubscriptions(usize),

    /// The handle does not name a live subscription.
    #[error("unknown subscription {0}")]
    UnknownSubscription(u64),
}
