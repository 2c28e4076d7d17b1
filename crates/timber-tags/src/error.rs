//! Error types for the tag dictionary.

use thiserror::Error;

/// Errors surfaced by the tag dictionary.
#[derive(Debug, Error)]
pub enum TagError {
    /// Re-registration of a known name or id with different attributes.
    #[error("tag conflict: {0}")]
    Conflict(String),

    /// A malformed line in a tag-map file.
    #[error("bad tag line {line}: {reason}")]
    BadLine {
        /// One-based line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// The dynamic id range is exhausted.
    #[error("no free tag ids")]
    Exhausted,

    /// An I/O error against a tag-map file.
    #[error("tag file I/O: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = TagError::Conflict("boot".to_string());
        assert_eq!(err.to_string(), "tag conflict: boot");

        let err = TagError::BadLine {
            line: 3,
            reason: "missing name".to_string(),
        };
        assert_eq!(err.to_string(), "bad tag line 3: missing name");
    }
}
