//! Relay simulator statistics

use std::collections::BTreeMap;

use tx_relay::{NodeStatistics, RelayMode, SimNetwork, SimTime, TxHash};

/// Complete simulation result
#[derive(Debug, Clone)]
pub struct SimResult {
    pub seed_used: [u8; 32],
    /// Announcement strategy the nodes ran
    pub strategy: String,
    pub num_nodes: usize,
    pub num_links: usize,
    pub duration_ms: SimTime,
    pub messages_delivered: u64,
    pub messages_dropped: u64,

    /// Network-wide sums of every node's counters
    pub totals: NodeStatistics,

    /// Node count per mode
    pub modes: BTreeMap<String, usize>,

    pub coverage: CoverageStats,
    pub latency: LatencyStats,
    pub reconciliation: ReconciliationStats,
}

/// How far transactions spread
#[derive(Debug, Clone, Default)]
pub struct CoverageStats {
    pub transactions: usize,
    /// Mean share of other nodes that received each transaction (0.0 to 1.0)
    pub mean_coverage: f64,
    /// Transactions that reached every other node
    pub fully_propagated: usize,
}

#[derive(Debug, Clone, Default)]
pub struct LatencyStats {
    pub samples: usize,
    pub mean_ms: f64,
    pub p50_ms: SimTime,
    pub p90_ms: SimTime,
    pub max_ms: SimTime,
    pub mean_hop: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ReconciliationStats {
    pub rounds: u64,
    pub void_rounds: u64,
    pub mean_actual_diff: f64,
    pub mean_estimated_diff: f64,
}

impl SimResult {
    /// Summarize a finished run. `num_links` is counted before the network stops.
    pub fn from_network(seed_used: [u8; 32], strategy: &str, num_links: usize, network: &SimNetwork) -> Self {
        let mut totals = NodeStatistics::default();
        let mut modes: BTreeMap<String, usize> = BTreeMap::new();
        for node in network.nodes() {
            let shared = node.statistics();
            let stats = shared.borrow();
            totals.absorb(&stats);
            *modes.entry(mode_name(stats.mode).to_string()).or_default() += 1;
        }
        let num_nodes = network.node_ids().len();

        Self {
            seed_used,
            strategy: strategy.to_string(),
            num_nodes,
            num_links,
            duration_ms: network.now(),
            messages_delivered: network.messages_delivered(),
            messages_dropped: network.messages_dropped(),
            coverage: coverage(&totals, num_nodes),
            latency: latency(&totals),
            reconciliation: reconciliation(&totals),
            modes,
            totals,
        }
    }

    /// INV items received per delivered transaction
    pub fn redundancy(&self) -> f64 {
        let received = self.totals.tx_received.max(1) as f64;
        (self.totals.inv_received + self.totals.recon_inv_received) as f64 / received
    }

    pub fn bytes_per_transaction(&self) -> f64 {
        let created = self.totals.tx_created.max(1) as f64;
        self.totals.bytes_sent as f64 / created
    }

    /// Share of transactions received by spies that the origin announced first
    pub fn spy_precision(&self) -> Option<f64> {
        let spies = self.modes.get(mode_name(RelayMode::Spy)).copied().unwrap_or(0);
        if spies == 0 || self.totals.tx_received == 0 {
            return None;
        }
        let spy_receipts = self.totals.tx_received as f64 * spies as f64 / self.num_nodes.max(1) as f64;
        Some(self.totals.first_spy_success as f64 / spy_receipts.max(1.0))
    }

    pub fn print_summary(&self) {
        println!("\n╔════════════════════════════════════════════════════════╗");
        println!("║        Transaction Relay Simulation Results            ║");
        println!("╚════════════════════════════════════════════════════════╝\n");

        println!("Configuration:");
        println!("  Seed: {}", seed_hex(&self.seed_used));
        println!("  Strategy: {}", self.strategy);
        println!("  Nodes: {} ({} links)", self.num_nodes, self.num_links);
        for (mode, count) in &self.modes {
            println!("    {}: {}", mode, count);
        }
        println!("  Duration: {:.1}s\n", self.duration_ms as f64 / 1000.0);

        println!("Propagation:");
        println!("  Transactions created: {}", self.totals.tx_created);
        println!("  Payloads received: {}", self.totals.tx_received);
        println!(
            "  Coverage: {:.1}% mean, {}/{} fully propagated",
            self.coverage.mean_coverage * 100.0,
            self.coverage.fully_propagated,
            self.coverage.transactions
        );
        println!(
            "  Latency: mean={:.0}ms p50={}ms p90={}ms max={}ms",
            self.latency.mean_ms, self.latency.p50_ms, self.latency.p90_ms, self.latency.max_ms
        );
        println!("  Mean hop: {:.2}\n", self.latency.mean_hop);

        println!("Bandwidth:");
        println!("  Messages delivered: {} ({} dropped)", self.messages_delivered, self.messages_dropped);
        println!("  Bytes sent: {} ({:.0} per transaction)", self.totals.bytes_sent, self.bytes_per_transaction());
        println!(
            "  INV received: {} ({} useless), recon INV: {} ({} useless)",
            self.totals.inv_received,
            self.totals.useless_inv_received,
            self.totals.recon_inv_received,
            self.totals.recon_useless_inv_received
        );
        println!("  Redundancy: {:.2} INV per delivered transaction", self.redundancy());
        println!(
            "  GET_DATA sent: {}, timeouts: {}, on-the-fly collisions: {}",
            self.totals.get_data_sent, self.totals.request_timeouts, self.totals.on_the_fly_collisions
        );
        if self.totals.loops_heard > 0 {
            println!("  Own transactions heard back: {}", self.totals.loops_heard);
        }
        if self.totals.ignored_filters > 0 {
            println!("  Ignored by filters: {}", self.totals.ignored_filters);
        }
        println!();

        if self.reconciliation.rounds > 0 {
            println!("Reconciliation:");
            println!(
                "  Rounds: {} ({} void)",
                self.reconciliation.rounds, self.reconciliation.void_rounds
            );
            println!(
                "  Difference: actual={:.1} estimated={:.1}\n",
                self.reconciliation.mean_actual_diff, self.reconciliation.mean_estimated_diff
            );
        }

        if let Some(precision) = self.spy_precision() {
            println!("Privacy:");
            println!("  Spy first-announcer hits: {} ({:.1}%)", self.totals.first_spy_success, precision * 100.0);
            if !self.totals.first_spy_delays.is_empty() {
                let mean = self.totals.first_spy_delays.iter().sum::<SimTime>() as f64
                    / self.totals.first_spy_delays.len() as f64;
                println!("  Mean delay until a spy hears of a transaction: {:.0}ms", mean);
            }
            println!();
        }

        if self.totals.black_holes_detected > 0 {
            println!("Black holes detected: {}\n", self.totals.black_holes_detected);
        }
    }

    /// One line for comparison tables
    pub fn print_row(&self, label: &str) {
        println!(
            "{:<26} {:>7.1}% {:>8.0} {:>8} {:>8.2} {:>10.0}",
            label,
            self.coverage.mean_coverage * 100.0,
            self.latency.mean_ms,
            self.latency.p90_ms,
            self.redundancy(),
            self.bytes_per_transaction()
        );
    }
}

pub fn print_row_header() {
    println!(
        "{:<26} {:>8} {:>8} {:>8} {:>8} {:>10}",
        "protocol", "coverage", "mean ms", "p90 ms", "inv/tx", "bytes/tx"
    );
    println!("{}", "─".repeat(74));
}

pub fn mode_name(mode: RelayMode) -> &'static str {
    match mode {
        RelayMode::Regular => "regular",
        RelayMode::TxEmitter => "emitter",
        RelayMode::BlackHole => "black_hole",
        RelayMode::Spy => "spy",
    }
}

pub fn seed_hex(seed: &[u8; 32]) -> String {
    let mut out = String::from("0x");
    for byte in seed {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

fn coverage(totals: &NodeStatistics, num_nodes: usize) -> CoverageStats {
    let mut receivers: BTreeMap<TxHash, usize> = BTreeMap::new();
    for record in &totals.tx_received_times {
        *receivers.entry(record.tx).or_default() += 1;
    }
    let created = totals.tx_created as usize;
    let others = num_nodes.saturating_sub(1).max(1);
    if created == 0 {
        return CoverageStats::default();
    }

    let reached: usize = receivers.values().sum();
    CoverageStats {
        transactions: created,
        mean_coverage: reached as f64 / (created * others) as f64,
        fully_propagated: receivers.values().filter(|&&n| n >= others).count(),
    }
}

fn latency(totals: &NodeStatistics) -> LatencyStats {
    let mut latencies: Vec<SimTime> = totals.tx_received_times.iter().map(|r| r.latency).collect();
    if latencies.is_empty() {
        return LatencyStats::default();
    }
    latencies.sort_unstable();
    let n = latencies.len();
    let hops: u64 = totals.tx_received_times.iter().map(|r| r.hop as u64).sum();

    LatencyStats {
        samples: n,
        mean_ms: totals.mean_latency().unwrap_or(0.0),
        p50_ms: latencies[n / 2],
        p90_ms: latencies[(n * 9 / 10).min(n - 1)],
        max_ms: latencies[n - 1],
        mean_hop: hops as f64 / n as f64,
    }
}

fn reconciliation(totals: &NodeStatistics) -> ReconciliationStats {
    let items = &totals.reconciliation_data;
    if items.is_empty() {
        return ReconciliationStats::default();
    }
    let n = items.len() as f64;
    ReconciliationStats {
        rounds: totals.reconciliations,
        void_rounds: totals.void_reconciliations,
        mean_actual_diff: items.iter().map(|i| i.actual_diff as f64).sum::<f64>() / n,
        mean_estimated_diff: items.iter().map(|i| i.estimated_diff as f64).sum::<f64>() / n,
    }
}
