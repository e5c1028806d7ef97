//! Relay simulation runner

use super::config::RelaySimConfig;
use super::event_sink::LoggingEventSink;
use super::stats::SimResult;
use hashbrown::HashMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::rc::Rc;
use tx_relay::{
    random_topology, strategy_for, LinkSpeeds, NodeConfig, NodeStatistics, PeerId, RelayMode,
    RelayNode, SimNetwork, SimTime,
};

/// Relay simulation runner
pub struct RelaySimRunner {
    config: RelaySimConfig,
    rng: StdRng,
    seed: [u8; 32],
    network: SimNetwork,
    edges: Vec<(PeerId, PeerId)>,
}

impl RelaySimRunner {
    pub fn new(config: RelaySimConfig) -> Self {
        let seed = config.resolve_seed();
        let rng = StdRng::from_seed(seed);
        let network = SimNetwork::new(config.latency_ms);

        let mut runner = Self {
            config,
            rng,
            seed,
            network,
            edges: Vec::new(),
        };
        runner.initialize_network();
        runner
    }

    fn initialize_network(&mut self) {
        let ids: Vec<PeerId> = (1..=self.config.num_nodes as PeerId).collect();
        self.edges = random_topology(&ids, self.config.out_degree, &mut self.rng);
        let modes = self.assign_roles(&ids);
        let speeds = self.assign_speeds(&ids);
        let emitters = self.config.roles.emitters.max(1) as u32;

        for &id in &ids {
            let out_peers: Vec<PeerId> = self
                .edges
                .iter()
                .filter(|(dialer, _)| *dialer == id)
                .map(|(_, target)| *target)
                .collect();
            let node_config = NodeConfig {
                settings: self.config.settings.clone(),
                mode: modes.get(&id).copied().unwrap_or_default(),
                time_to_run_seconds: self.config.time_to_run_seconds,
                tx_interval_seconds: self.config.tx_interval_seconds,
                tx_emitters: emitters,
                link: speeds.get(&id).copied().unwrap_or_default(),
                seed: self.rng.gen(),
            };
            let stats = Rc::new(RefCell::new(NodeStatistics::new(id)));
            let sink = Box::new(LoggingEventSink::new(self.config.enable_event_logging));
            self.network
                .add_node(RelayNode::new_with_sink(id, node_config, out_peers, speeds.clone(), stats, sink));
        }
    }

    /// Emitters, black holes and spies drawn without overlap; everyone else is regular
    fn assign_roles(&mut self, ids: &[PeerId]) -> HashMap<PeerId, RelayMode> {
        let mut shuffled = ids.to_vec();
        shuffled.shuffle(&mut self.rng);
        let roles = &self.config.roles;

        let mut modes = HashMap::new();
        let mut picks = shuffled.into_iter();
        for (mode, count) in [
            (RelayMode::TxEmitter, roles.emitters),
            (RelayMode::BlackHole, roles.black_holes),
            (RelayMode::Spy, roles.spies),
        ] {
            for id in picks.by_ref().take(count) {
                modes.insert(id, mode);
            }
        }
        modes
    }

    fn assign_speeds(&mut self, ids: &[PeerId]) -> HashMap<PeerId, LinkSpeeds> {
        let links = &self.config.links;
        let slow_fraction = links.slow_fraction.clamp(0.0, 1.0);
        ids.iter()
            .map(|&id| {
                let upload_mbps = if self.rng.gen_bool(slow_fraction) {
                    links.slow_upload_mbps
                } else {
                    links.upload_mbps
                };
                (
                    id,
                    LinkSpeeds {
                        download_mbps: links.download_mbps,
                        upload_mbps,
                    },
                )
            })
            .collect()
    }

    /// Close `churn_links` random links at random points of the generation window
    fn schedule_churn(&mut self, time_to_run: SimTime) {
        let mut edges = self.edges.clone();
        edges.shuffle(&mut self.rng);
        for &(a, b) in edges.iter().take(self.config.churn_links) {
            let at = self.rng.gen_range(1..=time_to_run.max(1));
            self.network.schedule_close(at, a, b);
        }
    }

    pub fn run(mut self) -> SimResult {
        let time_to_run = (self.config.time_to_run_seconds * 1000.0) as SimTime;
        let drain = (self.config.drain_seconds * 1000.0) as SimTime;
        let strategy = strategy_for(&self.config.settings).name();

        log::info!(
            "running {} nodes ({} links) with {} for {}s",
            self.config.num_nodes,
            self.edges.len(),
            strategy,
            self.config.time_to_run_seconds
        );

        self.schedule_churn(time_to_run);
        self.network.start();
        self.network.run_until(time_to_run + drain);
        let num_links = self.network.num_links();
        self.network.stop();

        SimResult::from_network(self.seed, strategy, num_links, &self.network)
    }
}
