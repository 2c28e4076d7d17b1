//! Log partitions and the bitmask used to select them.
//!
//! This module provides:
//! - [`Partition`] — One of the eight named record sequences
//! - [`PartitionMask`] — A `u8` bitmask selecting a set of partitions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// One of the eight log partitions.
///
/// The discriminants are the on-wire partition ids and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Partition {
    /// Application log messages.
    Main = 0,
    /// Radio and telephony messages.
    Radio = 1,
    /// Binary events keyed by the tag dictionary.
    Events = 2,
    /// System-server messages.
    System = 3,
    /// Crash dumps.
    Crash = 4,
    /// Binary statistics events.
    Stats = 5,
    /// Security events from the auditing subsystem.
    Security = 6,
    /// Records reformatted from the kernel ring buffer.
    Kernel = 7,
}

impl Partition {
    /// All partitions in id order.
    pub const ALL: [Self; 8] = [
        Self::Main,
        Self::Radio,
        Self::Events,
        Self::System,
        Self::Crash,
        Self::Stats,
        Self::Security,
        Self::Kernel,
    ];

    /// Number of partitions.
    pub const COUNT: usize = 8;

    /// Looks up a partition by its wire id.
    #[must_use]
    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Main),
            1 => Some(Self::Radio),
            2 => Some(Self::Events),
            3 => Some(Self::System),
            4 => Some(Self::Crash),
            5 => Some(Self::Stats),
            6 => Some(Self::Security),
            7 => Some(Self::Kernel),
            _ => None,
        }
    }

    /// Returns the wire id of this partition.
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Returns the partition name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Radio => "radio",
            Self::Events => "events",
            Self::System => "system",
            Self::Crash => "crash",
            Self::Stats => "stats",
            Self::Security => "security",
            Self::Kernel => "kernel",
        }
    }

    /// True for partitions whose payloads are binary events rather than
    /// priority-prefixed text. The priority filter does not apply to them.
    #[must_use]
    pub const fn is_binary(self) -> bool {
        matches!(self, Self::Events | Self::Stats | Self::Security)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(Self::Main),
            "radio" => Ok(Self::Radio),
            "events" => Ok(Self::Events),
            "system" => Ok(Self::System),
            "crash" => Ok(Self::Crash),
            "stats" => Ok(Self::Stats),
            "security" => Ok(Self::Security),
            "kernel" => Ok(Self::Kernel),
            other => Err(WireError::InvalidRequest(format!(
                "unknown partition '{other}'"
            ))),
        }
    }
}

/// A set of partitions encoded as one bit per partition id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMask(pub u8);

impl PartitionMask {
    /// The mask selecting every partition.
    pub const ALL: Self = Self(0xff);

    /// An empty mask.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// The mask selecting a single partition.
    #[must_use]
    pub const fn single(partition: Partition) -> Self {
        Self(1 << partition.id())
    }

    /// True if the mask selects no partition.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if the mask selects `partition`.
    #[must_use]
    pub const fn contains(self, partition: Partition) -> bool {
        self.0 & (1 << partition.id()) != 0
    }

    /// Adds `partition` to the mask.
    #[must_use]
    pub const fn with(self, partition: Partition) -> Self {
        Self(self.0 | (1 << partition.id()))
    }

    /// Iterates over the selected partitions in id order.
    pub fn iter(self) -> impl Iterator<Item = Partition> {
        Partition::ALL.into_iter().filter(move |p| self.contains(*p))
    }
}

impl fmt::Display for PartitionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PartitionMask {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bits: u8 = s
            .parse()
            .map_err(|_| WireError::InvalidRequest(format!("bad partition mask '{s}'")))?;
        Ok(Self(bits))
    }
}

impl From<Partition> for PartitionMask {
    fn from(partition: Partition) -> Self {
        Self::single(partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_ids_round_trip() {
        for p in Partition::ALL {
            assert_eq!(Partition::from_id(p.id()), Some(p));
        }
        assert_eq!(Partition::from_id(8), None);
        assert_eq!(Partition::from_id(255), None);
    }

    #[test]
    fn partition_names_round_trip() {
        for p in Partition::ALL {
            assert_eq!(p.as_str().parse::<Partition>(), Ok(p));
        }
        assert!("bogus".parse::<Partition>().is_err());
    }

    #[test]
    fn binary_partitions() {
        assert!(Partition::Events.is_binary());
        assert!(Partition::Stats.is_binary());
        assert!(Partition::Security.is_binary());
        assert!(!Partition::Main.is_binary());
        assert!(!Partition::Kernel.is_binary());
    }

    #[test]
    fn mask_contains_and_iter() {
        let mask = PartitionMask::single(Partition::Main).with(Partition::Radio);
        assert!(mask.contains(Partition::Main));
        assert!(mask.contains(Partition::Radio));
        assert!(!mask.contains(Partition::Events));

        let selected: Vec<_> = mask.iter().collect();
        assert_eq!(selected, vec![Partition::Main, Partition::Radio]);
    }

    #[test]
    fn mask_parse_display() {
        let mask: PartitionMask = "5".parse().expect("parse mask");
        assert!(mask.contains(Partition::Main));
        assert!(mask.contains(Partition::Events));
        assert_eq!(mask.to_string(), "5");
        assert!("x".parse::<PartitionMask>().is_err());
    }

    #[test]
    fn empty_mask() {
        assert!(PartitionMask::empty().is_empty());
        assert!(!PartitionMask::ALL.is_empty());
        assert_eq!(PartitionMask::ALL.iter().count(), 8);
    }
}
