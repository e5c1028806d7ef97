//! Configuration for the relay simulator

use rand::rngs::StdRng;
use rand::SeedableRng;
use tx_relay::{ConfigError, NodeConfig, ProtocolSettings};

/// Configuration for one relay simulation run
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct RelaySimConfig {
    /// Number of nodes in the network
    pub num_nodes: usize,

    /// Outbound connections each node opens (default: 8)
    pub out_degree: usize,

    /// One-way link latency in milliseconds (default: 50)
    pub latency_ms: u64,

    /// Transactions are generated until this point (default: 600)
    pub time_to_run_seconds: f64,

    /// Extra time after generation stops for relaying to settle (default: 120)
    pub drain_seconds: f64,

    /// Random seed (None = generate random)
    #[serde(skip)]
    pub seed: Option<[u8; 32]>,

    /// Protocol settings every node runs with
    pub settings: ProtocolSettings,

    /// Mean time between transactions of one regular node; None = only emitters generate
    pub tx_interval_seconds: Option<f64>,

    pub roles: RoleConfig,

    pub links: LinkConfig,

    /// Random links closed during the run
    pub churn_links: usize,

    /// Print every node event to the console
    pub enable_event_logging: bool,
}

impl Default for RelaySimConfig {
    fn default() -> Self {
        Self {
            num_nodes: 100,
            out_degree: 8,
            latency_ms: 50,
            time_to_run_seconds: 600.0,
            drain_seconds: 120.0,
            seed: None,
            settings: ProtocolSettings::default(),
            tx_interval_seconds: Some(60.0),
            roles: RoleConfig::default(),
            links: LinkConfig::default(),
            churn_links: 0,
            enable_event_logging: false,
        }
    }
}

impl RelaySimConfig {
    /// Get or generate seed
    pub fn resolve_seed(&self) -> [u8; 32] {
        self.seed.unwrap_or_else(|| {
            let mut temp_rng = StdRng::from_entropy();
            let mut seed = [0u8; 32];
            use rand::RngCore;
            temp_rng.fill_bytes(&mut seed);
            seed
        })
    }

    /// Check the settings every node will be built with
    pub fn validate(&self) -> Result<(), ConfigError> {
        NodeConfig {
            settings: self.settings.clone(),
            tx_interval_seconds: self.tx_interval_seconds,
            ..Default::default()
        }
        .validate()
    }
}

/// How many nodes play each special role; the rest are regular
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct RoleConfig {
    pub emitters: usize,
    pub black_holes: usize,
    pub spies: usize,
}

/// Link speeds, with an optional share of slow uplinks
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub download_mbps: f64,
    pub upload_mbps: f64,

    /// Fraction of nodes with `slow_upload_mbps` instead (default: 0.0)
    pub slow_fraction: f64,
    pub slow_upload_mbps: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            download_mbps: 50.0,
            upload_mbps: 10.0,
            slow_fraction: 0.0,
            slow_upload_mbps: 1.0,
        }
    }
}
