//! # tx-relay - Transaction Relay Protocol Simulator
//!
//! A discrete-event simulation of how unconfirmed transactions propagate through a
//! peer-to-peer network. Every node runs the same relay engine and picks one of several
//! interchangeable announcement strategies, so strategies can be compared on bandwidth,
//! redundancy, latency and origin privacy.
//!
//! ## Core Components
//!
//! - **RelayNode**: per-node state machine handling messages, timers and connections
//! - **AnnouncementStrategy**: flooding, preferred destinations, filters, Dandelion stem/fluff
//!   routing and set reconciliation, one implementation per protocol
//! - **FilterManager / PeerPreferenceRanker / ReconciliationEngine / DandelionRouter**:
//!   the per-peer state the strategies consult
//! - **TransactionGenerator**: Poisson transaction creation and the emitter rate schedule
//!
//! ## Usage with a Network Layer
//!
//! Nodes never touch a clock or a socket. Everything goes through the [`RelayContext`]
//! trait: implement it on top of your scheduler and channels, then call
//! `peer_connected`, `handle_message`, `handle_timer` and `peer_closed` as events arrive.
//!
//! ```no_run
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use tx_relay::{NodeConfig, NodeStatistics, RelayNode, SimNetwork};
//!
//! let mut network = SimNetwork::new(50);
//! for id in 1..=3u64 {
//!     let out_peers = if id == 1 { vec![2, 3] } else { vec![] };
//!     let stats = Rc::new(RefCell::new(NodeStatistics::new(id)));
//!     let node = RelayNode::new(id, NodeConfig::default(), out_peers, Default::default(), stats);
//!     network.add_node(node);
//! }
//! network.start();
//! network.inject_transaction(1, 0xfeed);
//! network.run_until(60_000);
//! ```
//!
//! ## Testing and Simulation
//!
//! `tx_network::SimNetwork` is an in-memory harness with a deterministic virtual-time
//! queue. The `simulator/` directory builds random topologies from YAML scenarios and
//! prints comparison summaries.

// Shared types and configuration
pub mod tx_config;
pub mod tx_interface;

// Relay components
pub mod tx_announce;
pub mod tx_dandelion;
pub mod tx_filters;
pub mod tx_generator;
pub mod tx_node;
pub mod tx_peers;
pub mod tx_ranking;
pub mod tx_reconciliation;
pub mod tx_stats;

// Simulation harness
pub mod tx_network;
pub mod tx_scheduler;

// Re-export commonly used types
pub use tx_announce::{strategy_for, AnnounceContext, AnnounceDecision, AnnouncementStrategy};
pub use tx_config::{ConfigError, FluffPolicy, NodeConfig, ProtocolSettings, ProtocolType, ReconciliationMode};
pub use tx_interface::{
    Event, EventSink, InvItem, LinkSpeeds, Message, NoOpSink, NodeTimer, PeerId, RelayContext,
    RelayMode, SimTime, Transaction, TxHash,
};
pub use tx_network::{random_topology, SimNetwork};
pub use tx_node::{RelayNode, TxPhase, TxRecord};
pub use tx_stats::{NodeStatistics, ReconciliationItem, TxRecvTime};
