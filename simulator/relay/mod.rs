//! Relay simulator module
//!
//! Builds a random network of relay nodes from a scenario config, runs it in virtual
//! time and summarizes:
//! - Propagation coverage and latency
//! - Announcement redundancy and bytes per transaction
//! - Reconciliation rounds and set difference estimates
//! - What spies learn about transaction origins

pub mod config;
pub mod event_sink;
pub mod runner;
pub mod stats;

pub use config::{LinkConfig, RelaySimConfig, RoleConfig};
pub use event_sink::LoggingEventSink;
pub use runner::RelaySimRunner;
pub use stats::{print_row_header, SimResult};
