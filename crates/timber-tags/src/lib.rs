//! # timber-tags
//!
//! The event-tag dictionary: numeric tag ↔ `(name, format)` bindings for
//! binary event records.
//!
//! This crate provides:
//!
//! - [`TagRegistry`] — Copy-on-write lookups, serialized mutation,
//!   idempotent registration with conflict rejection
//! - [`TagEntry`] — One binding
//! - File persistence in the `id name "format"` line format, with
//!   rotation on `reinit`
//!
//! Readers clone an `Arc` snapshot of the whole table and never contend
//! with writers beyond the pointer swap.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod file;
pub mod registry;

pub use error::TagError;
pub use file::{format_tag_file, parse_tag_file};
pub use registry::{TagEntry, TagRegistry, TagSnapshot};

/// Result alias for tag operations.
pub type Result<T> = std::result::Result<T, TagError>;
