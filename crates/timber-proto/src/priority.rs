//! Severity levels for text records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a text record, carried as the first payload byte.
///
/// The discriminants are the on-wire values. Binary partitions carry no
/// priority; filters treat their records as always matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Priority {
    /// Most verbose.
    Verbose = 2,
    /// Debugging information.
    Debug = 3,
    /// General information.
    Info = 4,
    /// Warning conditions.
    Warn = 5,
    /// Error conditions.
    Error = 6,
    /// The process is about to die.
    Fatal = 7,
}

impl Priority {
    /// Looks up a priority by its wire value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            2 => Some(Self::Verbose),
            3 => Some(Self::Debug),
            4 => Some(Self::Info),
            5 => Some(Self::Warn),
            6 => Some(Self::Error),
            7 => Some(Self::Fatal),
            _ => None,
        }
    }

    /// Returns the string representation of this priority.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Verbose => "verbose",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }

    /// True if this priority is at least as severe as `floor`.
    #[must_use]
    pub fn is_at_least(self, floor: Self) -> bool {
        self >= floor
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
