//! # timberd
//!
//! The timber logging daemon: accepts records from on-device producers
//! over a datagram socket, retains them in bounded in-memory partitions,
//! streams them to subscribers over a stream socket, and exposes an
//! administrative control socket.
//!
//! This crate provides:
//!
//! - [`config::DaemonConfig`] — Daemon configuration
//! - [`ingest::IngestEndpoint`] — The producer datagram socket
//! - [`egress::EgressEndpoint`] — The reader stream socket
//! - [`control::ControlEndpoint`] — The administrative socket
//! - [`collectors`] — Kernel-ring and audit line reformatters

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod collectors;
pub mod config;
pub mod control;
pub mod egress;
pub mod error;
pub mod ingest;

pub use config::DaemonConfig;
pub use error::ServerError;

/// Result alias for daemon operations.
pub type Result<T> = std::result::Result<T, ServerError>;
