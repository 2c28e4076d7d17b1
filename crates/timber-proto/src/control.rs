//! The administrative protocol.
//!
//! The control socket accepts one newline-terminated command per
//! connection and answers with newline-terminated text. Replies are
//! `success`, `Invalid`, or command-specific text documented on each
//! variant.

use std::fmt;
use std::str::FromStr;

use crate::error::WireError;
use crate::partition::Partition;

/// A parsed administrative command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// `getStatistics [id…]` — dump statistics for the named partitions,
    /// or for all of them when none are named.
    GetStatistics(Vec<Partition>),
    /// `clear <id> [uid]` — drop matching records from a partition.
    Clear {
        /// Partition to clear.
        partition: Partition,
        /// Restrict the clear to one uid.
        uid: Option<u32>,
    },
    /// `getLogSize <id>` — the partition's quota in bytes.
    GetLogSize(Partition),
    /// `setLogSize <id> <bytes>` — set the partition's quota.
    SetLogSize(Partition, usize),
    /// `getLogSizeUsed <id>` — resident bytes in the partition.
    GetLogSizeUsed(Partition),
    /// `getPruneList` — the current prune configuration.
    GetPruneList,
    /// `setPruneList <spec>` — replace the prune configuration.
    SetPruneList(String),
    /// `getEventTag name=<s> format=<s>` — look up or allocate a tag.
    GetEventTag {
        /// Tag name.
        name: String,
        /// Tag format descriptor.
        format: String,
    },
    /// `reinit` — rotate and reload the tag dictionary.
    Reinit,
    /// `exit` — close the connection.
    Exit,
}

fn parse_partition(token: &str) -> Result<Partition, WireError> {
    // Accept both the numeric id and the name.
    if let Ok(id) = token.parse::<u8>() {
        return Partition::from_id(id).ok_or(WireError::InvalidCommand);
    }
    token.parse().map_err(|_| WireError::InvalidCommand)
}

impl FromStr for ControlCommand {
    type Err = WireError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(WireError::InvalidCommand)?;
        let rest: Vec<&str> = words.collect();

        match (verb, rest.as_slice()) {
            ("getStatistics", parts) => {
                let partitions = parts
                    .iter()
                    .map(|p| parse_partition(p))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::GetStatistics(partitions))
            }
            ("clear", [partition]) => Ok(Self::Clear {
                partition: parse_partition(partition)?,
                uid: None,
            }),
            ("clear", [partition, uid]) => Ok(Self::Clear {
                partition: parse_partition(partition)?,
                uid: Some(uid.parse().map_err(|_| WireError::InvalidCommand)?),
            }),
            ("getLogSize", [partition]) => Ok(Self::GetLogSize(parse_partition(partition)?)),
            ("setLogSize", [partition, bytes]) => Ok(Self::SetLogSize(
                parse_partition(partition)?,
                bytes.parse().map_err(|_| WireError::InvalidCommand)?,
            )),
            ("getLogSizeUsed", [partition]) => {
                Ok(Self::GetLogSizeUsed(parse_partition(partition)?))
            }
            ("getPruneList", []) => Ok(Self::GetPruneList),
            ("setPruneList", spec) if !spec.is_empty() => {
                Ok(Self::SetPruneList(spec.join(" ")))
            }
            ("getEventTag", args) if !args.is_empty() => {
                let mut name = None;
                let mut format = None;
                for arg in args {
                    match arg.split_once('=') {
                        Some(("name", v)) => name = Some(v.to_string()),
                        Some(("format", v)) => format = Some(v.to_string()),
                        _ => return Err(WireError::InvalidCommand),
                    }
                }
                Ok(Self::GetEventTag {
                    name: name.ok_or(WireError::InvalidCommand)?,
                    format: format.ok_or(WireError::InvalidCommand)?,
                })
            }
            ("reinit", []) => Ok(Self::Reinit),
            ("exit", []) => Ok(Self::Exit),
            _ => Err(WireError::InvalidCommand),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetStatistics(partitions) => {
                write!(f, "getStatistics")?;
                for p in partitions {
                    write!(f, " {}", p.id())?;
                }
                Ok(())
            }
            Self::Clear { partition, uid } => {
                write!(f, "clear {}", partition.id())?;
                if let Some(uid) = uid {
                    write!(f, " {uid}")?;
                }
                Ok(())
            }
            Self::GetLogSize(p) => write!(f, "getLogSize {}", p.id()),
            Self::SetLogSize(p, bytes) => write!(f, "setLogSize {} {bytes}", p.id()),
            Self::GetLogSizeUsed(p) => write!(f, "getLogSizeUsed {}", p.id()),
            Self::GetPruneList => write!(f, "getPruneList"),
            Self::SetPruneList(spec) => write!(f, "setPruneList {spec}"),
            Self::GetEventTag { name, format } => {
                write!(f, "getEventTag name={name} format={format}")
            }
            Self::Reinit => write!(f, "reinit"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_statistics_variants() {
        assert_eq!(
            "getStatistics".parse::<ControlCommand>(),
            Ok(ControlCommand::GetStatistics(vec![]))
        );
        assert_eq!(
            "getStatistics 0 1".parse::<ControlCommand>(),
            Ok(ControlCommand::GetStatistics(vec![
                Partition::Main,
                Partition::Radio
            ]))
        );
        assert_eq!(
            "getStatistics main events".parse::<ControlCommand>(),
            Ok(ControlCommand::GetStatistics(vec![
                Partition::Main,
                Partition::Events
            ]))
        );
    }

    #[test]
    fn parses_clear() {
        assert_eq!(
            "clear 3".parse::<ControlCommand>(),
            Ok(ControlCommand::Clear {
                partition: Partition::System,
                uid: None
            })
        );
        assert_eq!(
            "clear main 1000".parse::<ControlCommand>(),
            Ok(ControlCommand::Clear {
                partition: Partition::Main,
                uid: Some(1000)
            })
        );
        assert!("clear 12".parse::<ControlCommand>().is_err());
    }

    #[test]
    fn parses_sizes() {
        assert_eq!(
            "setLogSize 0 65536".parse::<ControlCommand>(),
            Ok(ControlCommand::SetLogSize(Partition::Main, 65536))
        );
        assert_eq!(
            "getLogSizeUsed kernel".parse::<ControlCommand>(),
            Ok(ControlCommand::GetLogSizeUsed(Partition::Kernel))
        );
    }

    #[test]
    fn parses_prune_list() {
        assert_eq!(
            "setPruneList 0: !1000 2000".parse::<ControlCommand>(),
            Ok(ControlCommand::SetPruneList("0: !1000 2000".to_string()))
        );
        assert!("setPruneList".parse::<ControlCommand>().is_err());
    }

    #[test]
    fn parses_event_tag() {
        assert_eq!(
            "getEventTag name=boot format=(status|3)".parse::<ControlCommand>(),
            Ok(ControlCommand::GetEventTag {
                name: "boot".to_string(),
                format: "(status|3)".to_string()
            })
        );
        assert!("getEventTag name=only".parse::<ControlCommand>().is_err());
    }

    #[test]
    fn rejects_unknown_verbs() {
        assert_eq!(
            "selfdestruct".parse::<ControlCommand>(),
            Err(WireError::InvalidCommand)
        );
        assert_eq!("".parse::<ControlCommand>(), Err(WireError::InvalidCommand));
    }

    #[test]
    fn display_round_trips() {
        for line in [
            "getStatistics 0 6",
            "clear 2 1000",
            "setLogSize 1 131072",
            "getPruneList",
            "setPruneList 0: !1000 ~2000",
            "getEventTag name=watchdog format=(uptime|1)",
            "reinit",
            "exit",
        ] {
            let command: ControlCommand = line.parse().expect(line);
            let reparsed: ControlCommand = command.to_string().parse().expect("reparse");
            assert_eq!(command, reparsed);
        }
    }
}
