// In-memory network harness
//
// Owns every node, the virtual-time queue and the set of open links. Each directed
// link serializes its messages: a message starts transmitting when the previous
// one is done, then arrives after the link latency. Delivery order per link is
// therefore FIFO.

use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::tx_interface::{Message, NodeTimer, PeerId, RelayContext, SimTime, TimerHandle, Transaction, TxHash};
use crate::tx_node::RelayNode;
use crate::tx_scheduler::EventQueue;
use crate::tx_stats::NodeStatistics;

#[derive(Debug, Clone)]
pub enum NetworkEvent {
    Deliver {
        from: PeerId,
        to: PeerId,
        message: Message,
    },
    Timer {
        node: PeerId,
        timer: NodeTimer,
    },
    /// `dialer` opens an outbound connection to `target`
    Connect {
        dialer: PeerId,
        target: PeerId,
    },
    Close {
        a: PeerId,
        b: PeerId,
    },
}

fn link_key(a: PeerId, b: PeerId) -> (PeerId, PeerId) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// The `RelayContext` one node sees while it handles an event
struct NodeContext<'a> {
    node: PeerId,
    queue: &'a mut EventQueue<NetworkEvent>,
    links: &'a HashSet<(PeerId, PeerId)>,
    busy_until: &'a mut HashMap<(PeerId, PeerId), SimTime>,
    latency: SimTime,
}

impl RelayContext for NodeContext<'_> {
    fn now(&self) -> SimTime {
        self.queue.now()
    }

    fn schedule(&mut self, delay: SimTime, timer: NodeTimer) -> TimerHandle {
        self.queue.schedule(
            delay,
            NetworkEvent::Timer {
                node: self.node,
                timer,
            },
        )
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.queue.cancel(handle);
    }

    fn send(&mut self, to: PeerId, message: Message, transmit_delay: SimTime) {
        if !self.links.contains(&link_key(self.node, to)) {
            debug!("{} -> {}: {} dropped, no link", self.node, to, message.kind());
            return;
        }
        let now = self.queue.now();
        let busy = self.busy_until.entry((self.node, to)).or_insert(0);
        let done = (*busy).max(now) + transmit_delay;
        *busy = done;
        self.queue.schedule_at(
            done + self.latency,
            NetworkEvent::Deliver {
                from: self.node,
                to,
                message,
            },
        );
    }
}

pub struct SimNetwork {
    nodes: BTreeMap<PeerId, RelayNode>,
    queue: EventQueue<NetworkEvent>,
    links: HashSet<(PeerId, PeerId)>,
    busy_until: HashMap<(PeerId, PeerId), SimTime>,
    /// One-way propagation delay of every link, in milliseconds
    latency: SimTime,
    delivered: u64,
    dropped: u64,
}

impl SimNetwork {
    pub fn new(latency: SimTime) -> Self {
        Self {
            nodes: BTreeMap::new(),
            queue: EventQueue::new(),
            links: HashSet::new(),
            busy_until: HashMap::new(),
            latency,
            delivered: 0,
            dropped: 0,
        }
    }

    pub fn add_node(&mut self, node: RelayNode) {
        self.nodes.insert(node.id(), node);
    }

    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    pub fn node(&self, id: PeerId) -> Option<&RelayNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: PeerId) -> Option<&mut RelayNode> {
        self.nodes.get_mut(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &RelayNode> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> Vec<PeerId> {
        self.nodes.keys().copied().collect()
    }

    pub fn is_connected(&self, a: PeerId, b: PeerId) -> bool {
        self.links.contains(&link_key(a, b))
    }

    pub fn num_links(&self) -> usize {
        self.links.len()
    }

    pub fn messages_delivered(&self) -> u64 {
        self.delivered
    }

    pub fn messages_dropped(&self) -> u64 {
        self.dropped
    }

    /// Start every node, then dial each node's outbound addresses at the current time
    pub fn start(&mut self) {
        for id in self.node_ids() {
            self.with_node(id, |node, ctx| node.start(ctx));
        }
        let dials: Vec<(PeerId, PeerId)> = self
            .nodes
            .values()
            .flat_map(|node| node.out_peers().iter().map(move |&peer| (node.id(), peer)))
            .collect();
        for (dialer, target) in dials {
            self.queue.schedule(0, NetworkEvent::Connect { dialer, target });
        }
    }

    /// Open a connection right away
    pub fn connect(&mut self, dialer: PeerId, target: PeerId) {
        if dialer == target
            || !self.nodes.contains_key(&dialer)
            || !self.nodes.contains_key(&target)
            || !self.links.insert(link_key(dialer, target))
        {
            debug!("connect {} -> {} refused", dialer, target);
            return;
        }
        self.with_node(dialer, |node, ctx| node.peer_connected(target, true, ctx));
        self.with_node(target, |node, ctx| node.peer_connected(dialer, false, ctx));
    }

    pub fn disconnect(&mut self, a: PeerId, b: PeerId) {
        if !self.links.remove(&link_key(a, b)) {
            return;
        }
        self.busy_until.remove(&(a, b));
        self.busy_until.remove(&(b, a));
        self.with_node(a, |node, ctx| node.peer_closed(b, ctx));
        self.with_node(b, |node, ctx| node.peer_closed(a, ctx));
    }

    /// Schedule a connection close at `delay` from now
    pub fn schedule_close(&mut self, delay: SimTime, a: PeerId, b: PeerId) {
        self.queue.schedule(delay, NetworkEvent::Close { a, b });
    }

    /// Have `node` create a transaction with a chosen hash
    pub fn inject_transaction(&mut self, node: PeerId, hash: TxHash) {
        let now = self.now();
        self.with_node(node, |n, ctx| {
            n.inject_transaction(
                Transaction {
                    hash,
                    created_at: now,
                    origin: node,
                },
                ctx,
            )
        });
    }

    /// Process events up to and including `until`
    pub fn run_until(&mut self, until: SimTime) {
        while let Some(at) = self.queue.peek_time() {
            if at > until {
                break;
            }
            self.step();
        }
    }

    /// Process the next event. Returns false when the queue is empty.
    pub fn step(&mut self) -> bool {
        let Some((_, event)) = self.queue.pop() else {
            return false;
        };
        match event {
            NetworkEvent::Deliver { from, to, message } => {
                if !self.links.contains(&link_key(from, to)) {
                    self.dropped += 1;
                    return true;
                }
                self.delivered += 1;
                self.with_node(to, |node, ctx| node.handle_message(from, message, ctx));
            }
            NetworkEvent::Timer { node, timer } => {
                self.with_node(node, |n, ctx| n.handle_timer(timer, ctx));
            }
            NetworkEvent::Connect { dialer, target } => self.connect(dialer, target),
            NetworkEvent::Close { a, b } => self.disconnect(a, b),
        }
        true
    }

    /// Close every connection on every node
    pub fn stop(&mut self) {
        for id in self.node_ids() {
            self.with_node(id, |node, ctx| node.stop(ctx));
        }
        self.links.clear();
        info!(
            "network stopped at {} ms: {} messages delivered, {} dropped",
            self.now(),
            self.delivered,
            self.dropped
        );
    }

    /// Network-wide totals
    pub fn total_statistics(&self) -> NodeStatistics {
        let mut total = NodeStatistics::default();
        for node in self.nodes.values() {
            total.absorb(&node.statistics().borrow());
        }
        total
    }

    fn with_node<R>(&mut self, id: PeerId, f: impl FnOnce(&mut RelayNode, &mut dyn RelayContext) -> R) -> Option<R> {
        let node = self.nodes.get_mut(&id)?;
        let mut ctx = NodeContext {
            node: id,
            queue: &mut self.queue,
            links: &self.links,
            busy_until: &mut self.busy_until,
            latency: self.latency,
        };
        Some(f(node, &mut ctx))
    }
}

/// Random connection graph: every node dials `out_degree` distinct peers it is not
/// yet linked with. Returns `(dialer, target)` pairs.
pub fn random_topology(ids: &[PeerId], out_degree: usize, rng: &mut StdRng) -> Vec<(PeerId, PeerId)> {
    let mut linked: HashSet<(PeerId, PeerId)> = HashSet::new();
    let mut edges = Vec::new();

    for &dialer in ids {
        let mut targets: Vec<PeerId> = ids.iter().copied().filter(|&t| t != dialer).collect();
        targets.shuffle(rng);
        let mut dialed = 0;
        for target in targets {
            if dialed == out_degree {
                break;
            }
            if linked.insert(link_key(dialer, target)) {
                edges.push((dialer, target));
                dialed += 1;
            }
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx_config::{FluffPolicy, NodeConfig, ProtocolSettings, ProtocolType, ReconciliationMode};
    use crate::tx_interface::RelayMode;
    use crate::tx_node::TxPhase;
    use rand::SeedableRng;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn add(network: &mut SimNetwork, id: PeerId, settings: &ProtocolSettings, mode: RelayMode, out_peers: Vec<PeerId>) {
        let config = NodeConfig {
            settings: settings.clone(),
            mode,
            seed: 42 ^ id,
            ..Default::default()
        };
        network.add_node(RelayNode::new(
            id,
            config,
            out_peers,
            HashMap::new(),
            Rc::new(RefCell::new(NodeStatistics::new(id))),
        ));
    }

    #[test]
    fn test_flood_scenario() {
        let settings = ProtocolSettings::default();
        let mut network = SimNetwork::new(50);
        add(&mut network, 1, &settings, RelayMode::Regular, vec![2, 3, 4]);
        for id in [2, 3, 4] {
            add(&mut network, id, &settings, RelayMode::Regular, vec![]);
        }
        network.start();
        network.run_until(0);
        assert_eq!(network.num_links(), 3);

        network.inject_transaction(1, 100);
        network.run_until(60_000);

        for id in [2, 3, 4] {
            let node = network.node(id).unwrap();
            let record = node.record(100).unwrap();
            assert_eq!(record.hop, 1);
            assert_eq!(record.first_from, Some(1));
            assert!(node.has_payload(100));
            assert_eq!(node.statistics().borrow().inv_items_sent, 0);
        }

        let origin = network.node(1).unwrap().statistics();
        assert_eq!(origin.borrow().inv_items_sent, 3);
        assert_eq!(origin.borrow().inv_received, 0);
    }

    #[test]
    fn test_flood_reaches_whole_random_network() {
        let settings = ProtocolSettings::default();
        let ids: Vec<PeerId> = (1..=30).collect();
        let mut rng = StdRng::seed_from_u64(42);
        let edges = random_topology(&ids, 4, &mut rng);

        let mut network = SimNetwork::new(20);
        for &id in &ids {
            let out: Vec<PeerId> = edges.iter().filter(|(d, _)| *d == id).map(|(_, t)| *t).collect();
            add(&mut network, id, &settings, RelayMode::Regular, out);
        }
        network.start();
        network.run_until(0);
        network.inject_transaction(1, 7);
        network.run_until(300_000);

        for node in network.nodes() {
            assert!(node.has_payload(7), "node {} missed the transaction", node.id());
        }
        let total = network.total_statistics();
        assert_eq!(total.tx_received, 29);
        assert!(total.useless_inv_received > 0);
    }

    #[test]
    fn test_reconciliation_scenario() {
        let settings = ProtocolSettings {
            reconciliation_mode: ReconciliationMode::TimeBased,
            loop_accommodation: 0,
            ..Default::default()
        };
        let mut network = SimNetwork::new(50);
        add(&mut network, 1, &settings, RelayMode::Regular, vec![2]);
        add(&mut network, 2, &settings, RelayMode::Regular, vec![]);
        network.start();
        network.run_until(0);

        for hash in [1, 2, 3] {
            network.inject_transaction(1, hash);
        }
        for hash in [3, 4] {
            network.inject_transaction(2, hash);
        }
        assert_eq!(network.node(1).unwrap().reconciliation().set_size(2), 3);
        assert_eq!(network.node(2).unwrap().reconciliation().set_size(1), 2);

        network.run_until(3_000);

        let responder = network.node(2).unwrap().statistics();
        let first = responder.borrow().reconciliation_data[0];
        assert_eq!(first.actual_diff, 3);
        assert_eq!(first.local_set_size, 2);
        assert_eq!(first.peer_set_size, 3);

        for id in [1, 2] {
            let node = network.node(id).unwrap();
            assert_eq!(node.known_transactions(), vec![1, 2, 3, 4]);
            assert!([1, 2, 3, 4].iter().all(|&h| node.has_payload(h)));
        }
        assert_eq!(network.node(1).unwrap().reconciliation().set_size(2), 0);
        assert_eq!(network.node(2).unwrap().reconciliation().set_size(1), 0);

        // later rounds find nothing to exchange
        network.run_until(10_000);
        let stats = responder.borrow();
        assert!(stats.reconciliations > 1);
        assert_eq!(stats.void_reconciliations, stats.reconciliations - 1);
    }

    #[test]
    fn test_dandelion_scenario() {
        let settings = ProtocolSettings {
            protocol: ProtocolType::DandelionMapping,
            fluff_policy: FluffPolicy::Probabilistic { probability: 0.0 },
            ..Default::default()
        };
        // Y=1 has a single outbound peer, the black hole Z=2; W=3 and V=4 dial Y
        let mut network = SimNetwork::new(50);
        add(&mut network, 1, &settings, RelayMode::Regular, vec![2]);
        add(&mut network, 2, &settings, RelayMode::BlackHole, vec![]);
        add(&mut network, 3, &settings, RelayMode::Regular, vec![1]);
        add(&mut network, 4, &settings, RelayMode::Regular, vec![1]);
        network.start();
        network.run_until(0);
        assert_eq!(network.node(1).unwrap().router().local_destination(), Some(2));

        network.inject_transaction(1, 55);
        network.run_until(20_000);

        assert!(network.node(2).unwrap().has_payload(55));
        assert_eq!(network.node(1).unwrap().record(55).unwrap().phase, TxPhase::Stem);
        for id in [3, 4] {
            assert!(network.node(id).unwrap().record(55).is_none());
        }

        network.run_until(120_000);
        assert_eq!(network.node(1).unwrap().record(55).unwrap().phase, TxPhase::Fluff);
        for id in [3, 4] {
            let node = network.node(id).unwrap();
            assert!(node.has_payload(55));
            assert_eq!(node.record(55).unwrap().first_from, Some(1));
        }
        // the black hole never hears it twice
        assert_eq!(network.node(2).unwrap().statistics().borrow().inv_received, 1);
    }

    #[test]
    fn test_close_stops_delivery() {
        let settings = ProtocolSettings::default();
        let mut network = SimNetwork::new(50);
        add(&mut network, 1, &settings, RelayMode::Regular, vec![2]);
        add(&mut network, 2, &settings, RelayMode::Regular, vec![]);
        network.start();
        network.run_until(0);

        network.schedule_close(1_000, 1, 2);
        network.run_until(1_000);
        assert!(!network.is_connected(1, 2));
        assert_eq!(network.node(1).unwrap().num_peers(), 0);
        assert_eq!(network.node(2).unwrap().num_peers(), 0);

        network.inject_transaction(1, 9);
        network.run_until(60_000);
        assert!(network.node(2).unwrap().record(9).is_none());
    }

    #[test]
    fn test_runs_are_deterministic() {
        let run = || {
            let settings = ProtocolSettings::default();
            let ids: Vec<PeerId> = (1..=12).collect();
            let mut rng = StdRng::seed_from_u64(7);
            let edges = random_topology(&ids, 3, &mut rng);
            let mut network = SimNetwork::new(30);
            for &id in &ids {
                let out: Vec<PeerId> = edges.iter().filter(|(d, _)| *d == id).map(|(_, t)| *t).collect();
                let config = NodeConfig {
                    settings: settings.clone(),
                    tx_interval_seconds: Some(5.0),
                    time_to_run_seconds: 60.0,
                    seed: 7 ^ id,
                    ..Default::default()
                };
                network.add_node(RelayNode::new(
                    id,
                    config,
                    out,
                    HashMap::new(),
                    Rc::new(RefCell::new(NodeStatistics::new(id))),
                ));
            }
            network.start();
            network.run_until(120_000);
            let total = network.total_statistics();
            (total.tx_created, total.tx_received, total.bytes_sent, network.messages_delivered())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_random_topology_has_no_duplicate_links() {
        let ids: Vec<PeerId> = (1..=20).collect();
        let mut rng = StdRng::seed_from_u64(42);
        let edges = random_topology(&ids, 4, &mut rng);

        let mut seen = HashSet::new();
        for &(a, b) in &edges {
            assert_ne!(a, b);
            assert!(seen.insert(link_key(a, b)));
        }
        for &id in &ids {
            assert!(edges.iter().filter(|(d, _)| *d == id).count() <= 4);
        }
    }
}
