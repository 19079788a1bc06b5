//! upsync command line front-end
//!
//! `upsync render` previews the document, `upsync check` validates a
//! configuration file, `upsync push` runs one cycle and `upsync run` applies
//! registrar events from stdin.

pub mod cli;
pub mod commands;
pub mod events;

pub use cli::build_cli;
pub use events::{run_events, EventParseError, EventSummary, InstanceSpec, RegistrarEvent};
