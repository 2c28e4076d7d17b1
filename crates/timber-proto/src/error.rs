//! Error types for wire parsing.

use thiserror::Error;

/// Errors produced while parsing or encoding wire data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// The buffer is shorter than the fixed header it should contain.
    #[error("truncated input: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes required by the fixed layout.
        need: usize,
        /// Bytes actually available.
        have: usize,
    },

    /// The partition id is not one of the eight known partitions.
    #[error("unknown partition id {0}")]
    UnknownPartition(u8),

    /// The payload is empty or exceeds the per-record cap.
    #[error("bad payload length {0}")]
    BadPayloadLength(usize),

    /// A frame header field does not match the fixed layout.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// A request line contains an unknown key or an unparsable value.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A control line is not a recognized command.
    #[error("invalid command")]
    InvalidCommand,
}
