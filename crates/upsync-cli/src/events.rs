//! Registrar event line protocol
//!
//! One event per line:
//!
//! ```text
//! add 10.0.0.1:9000 5
//! weight 10.0.0.1:9000 10
//! remove 10.0.0.1:9000
//! refresh
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use upsync_core::{RefreshOutcome, SyncError, UpstreamSync};

/// A service-discovery event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrarEvent {
    /// Register or overwrite an instance
    Add {
        /// `host[:port]`
        address: String,
        /// Relative traffic share
        weight: u32,
    },
    /// Drop an instance
    Remove {
        /// `host[:port]`
        address: String,
    },
    /// Change an instance's weight
    UpdateWeight {
        /// `host[:port]`
        address: String,
        /// New traffic share
        weight: u32,
    },
    /// Push the current registry
    Refresh,
}

impl fmt::Display for RegistrarEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add { address, weight } => write!(f, "add {address} {weight}"),
            Self::Remove { address } => write!(f, "remove {address}"),
            Self::UpdateWeight { address, weight } => write!(f, "weight {address} {weight}"),
            Self::Refresh => f.write_str("refresh"),
        }
    }
}

/// Malformed event or instance argument
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventParseError {
    /// First word is not a known command
    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    /// Wrong number of arguments
    #[error("`{command}` expects {expected}")]
    Arity {
        /// Command word
        command: &'static str,
        /// Expected arguments
        expected: &'static str,
    },

    /// Weight is not a positive integer
    #[error("invalid weight `{0}`")]
    InvalidWeight(String),

    /// `ADDR=WEIGHT` argument without `=`
    #[error("expected ADDR=WEIGHT, got `{0}`")]
    InstanceSpec(String),
}

fn parse_weight(text: &str) -> Result<u32, EventParseError> {
    match text.parse::<u32>() {
        Ok(weight) if weight > 0 => Ok(weight),
        _ => Err(EventParseError::InvalidWeight(text.to_string())),
    }
}

impl RegistrarEvent {
    /// Parse one line; `Ok(None)` for blank lines and comments
    ///
    /// # Errors
    /// Unknown commands, wrong arity, bad weights
    pub fn parse_line(line: &str) -> Result<Option<Self>, EventParseError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        let event = match words.as_slice() {
            ["add", address, weight] => Self::Add {
                address: (*address).to_string(),
                weight: parse_weight(weight)?,
            },
            ["add", ..] => {
                return Err(EventParseError::Arity {
                    command: "add",
                    expected: "<address> <weight>",
                })
            }
            ["remove", address] => Self::Remove {
                address: (*address).to_string(),
            },
            ["remove", ..] => {
                return Err(EventParseError::Arity {
                    command: "remove",
                    expected: "<address>",
                })
            }
            ["weight", address, weight] => Self::UpdateWeight {
                address: (*address).to_string(),
                weight: parse_weight(weight)?,
            },
            ["weight", ..] => {
                return Err(EventParseError::Arity {
                    command: "weight",
                    expected: "<address> <weight>",
                })
            }
            ["refresh"] => Self::Refresh,
            ["refresh", ..] => {
                return Err(EventParseError::Arity {
                    command: "refresh",
                    expected: "no arguments",
                })
            }
            [other, ..] => return Err(EventParseError::UnknownCommand((*other).to_string())),
            [] => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Apply to the service
    ///
    /// # Errors
    /// Whatever the corresponding service call returns
    pub async fn apply(&self, sync: &UpstreamSync) -> Result<RefreshOutcome, SyncError> {
        match self {
            Self::Add { address, weight } => sync.add_instance(address, *weight).await,
            Self::Remove { address } => sync.remove_instance(address).await,
            Self::UpdateWeight { address, weight } => sync.update_weight(address, *weight).await,
            Self::Refresh => sync.refresh().await,
        }
    }
}

impl FromStr for RegistrarEvent {
    type Err = EventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_line(s)?.ok_or(EventParseError::Arity {
            command: "event",
            expected: "a command",
        })
    }
}

/// `ADDR=WEIGHT` command line argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    /// `host[:port]`
    pub address: String,
    /// Relative traffic share
    pub weight: u32,
}

impl FromStr for InstanceSpec {
    type Err = EventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, weight) = s
            .rsplit_once('=')
            .ok_or_else(|| EventParseError::InstanceSpec(s.to_string()))?;
        if address.trim().is_empty() {
            return Err(EventParseError::InstanceSpec(s.to_string()));
        }
        Ok(Self {
            address: address.trim().to_string(),
            weight: parse_weight(weight.trim())?,
        })
    }
}

/// Counts from one pass over an event stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventSummary {
    /// Lines that parsed into an event
    pub events: usize,
    /// Lines that failed to parse
    pub malformed: usize,
    /// Events whose refresh pushed a document
    pub pushed: usize,
    /// Events whose refresh was dropped or deferred
    pub contended: usize,
    /// Events that did not change the registry
    pub unchanged: usize,
    /// Events that returned an error
    pub failed: usize,
}

/// Read events until end of input, applying each in order
///
/// Failed events are logged and counted; processing continues.
///
/// # Errors
/// Only I/O errors reading the input
pub async fn run_events<R>(sync: &UpstreamSync, reader: R) -> std::io::Result<EventSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = EventSummary::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let event = match RegistrarEvent::parse_line(&line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                summary.malformed += 1;
                tracing::warn!(line = line_no, error = %e, "skipping malformed event");
                continue;
            }
        };
        summary.events += 1;

        match event.apply(sync).await {
            Ok(RefreshOutcome::Applied(_)) => summary.pushed += 1,
            Ok(RefreshOutcome::Skipped | RefreshOutcome::Deferred) => summary.contended += 1,
            Ok(RefreshOutcome::Unchanged) => summary.unchanged += 1,
            Err(e) => {
                summary.failed += 1;
                tracing::error!(line = line_no, event = %event, error = %e, "event failed");
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_command() {
        assert_eq!(
            RegistrarEvent::parse_line("add 10.0.0.1:9000 5").unwrap(),
            Some(RegistrarEvent::Add {
                address: "10.0.0.1:9000".to_string(),
                weight: 5
            })
        );
        assert_eq!(
            RegistrarEvent::parse_line("  remove 10.0.0.1  ").unwrap(),
            Some(RegistrarEvent::Remove {
                address: "10.0.0.1".to_string()
            })
        );
        assert_eq!(
            RegistrarEvent::parse_line("weight a:1 7").unwrap(),
            Some(RegistrarEvent::UpdateWeight {
                address: "a:1".to_string(),
                weight: 7
            })
        );
        assert_eq!(
            RegistrarEvent::parse_line("refresh").unwrap(),
            Some(RegistrarEvent::Refresh)
        );
    }

    #[test]
    fn blank_and_comment_lines_skipped() {
        assert_eq!(RegistrarEvent::parse_line("").unwrap(), None);
        assert_eq!(RegistrarEvent::parse_line("   ").unwrap(), None);
        assert_eq!(RegistrarEvent::parse_line("# add a 1").unwrap(), None);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(
            RegistrarEvent::parse_line("drain a:1"),
            Err(EventParseError::UnknownCommand("drain".to_string()))
        );
        assert!(matches!(
            RegistrarEvent::parse_line("add a:1"),
            Err(EventParseError::Arity { command: "add", .. })
        ));
        assert_eq!(
            RegistrarEvent::parse_line("weight a:1 0"),
            Err(EventParseError::InvalidWeight("0".to_string()))
        );
        assert_eq!(
            RegistrarEvent::parse_line("add a:1 -3"),
            Err(EventParseError::InvalidWeight("-3".to_string()))
        );
    }

    #[test]
    fn display_round_trips_through_parse() {
        let event = RegistrarEvent::UpdateWeight {
            address: "10.0.0.2:9000".to_string(),
            weight: 4,
        };
        assert_eq!(event.to_string().parse::<RegistrarEvent>().unwrap(), event);
    }

    #[test]
    fn instance_spec_parses() {
        let spec: InstanceSpec = "10.0.0.1:9000=5".parse().unwrap();
        assert_eq!(spec.address, "10.0.0.1:9000");
        assert_eq!(spec.weight, 5);

        assert!("10.0.0.1:9000".parse::<InstanceSpec>().is_err());
        assert!("=5".parse::<InstanceSpec>().is_err());
        assert!("a=x".parse::<InstanceSpec>().is_err());
    }
}
