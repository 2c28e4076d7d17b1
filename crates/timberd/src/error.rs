//! Error types for the daemon.

use thiserror::Error;

/// Errors surfaced by endpoints and startup.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket or file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A wire-format parse failed.
    #[error(transparent)]
    Wire(#[from] timber_proto::WireError),

    /// The store rejected an operation.
    #[error(transparent)]
    Store(#[from] timber_store::StoreError),

    /// The tag dictionary failed.
    #[error(transparent)]
    Tags(#[from] timber_tags::TagError),

    /// The configuration is unusable.
    #[error("config error: {0}")]
    Config(String),

    /// The peer disconnected mid-exchange.
    #[error("peer disconnected")]
    PeerGone,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_component_errors() {
        let err: ServerError = timber_store::StoreError::PermissionDenied(7).into();
        assert!(err.to_string().contains("security"));

        let err: ServerError = timber_proto::WireError::InvalidCommand.into();
        assert_eq!(err.to_string(), "invalid command");
    }
}
