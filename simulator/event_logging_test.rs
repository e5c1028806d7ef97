//! Test event logging in simulator
//!
//! Run with: cargo run --example event_logging_test --release
//!
//! A small Dandelion network with a spy, so stem hops, fluffs and request timeouts
//! are easy to follow one event at a time.

use log::info;
use simple_logger::SimpleLogger;

mod relay;
use relay::{RelaySimConfig, RelaySimRunner, RoleConfig};
use tx_relay::{ProtocolSettings, ProtocolType};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    SimpleLogger::new().init()?;

    info!("Running small simulation with event logging enabled...");

    let config = RelaySimConfig {
        num_nodes: 12,
        out_degree: 3,
        time_to_run_seconds: 30.0,
        drain_seconds: 60.0,
        seed: Some([42u8; 32]),
        tx_interval_seconds: Some(20.0),
        settings: ProtocolSettings {
            protocol: ProtocolType::DandelionMapping,
            ..Default::default()
        },
        roles: RoleConfig {
            spies: 1,
            ..Default::default()
        },
        enable_event_logging: true,
        ..Default::default()
    };
    config.validate()?;

    let result = RelaySimRunner::new(config).run();

    info!("Simulation complete!");
    info!("Transactions: {}", result.totals.tx_created);
    info!("Messages delivered: {}", result.messages_delivered);
    Ok(())
}
