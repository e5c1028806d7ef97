// Node statistics shared with the installer
//
// The installer hands each node an `Rc<RefCell<NodeStatistics>>` and reads it back
// after the run; nodes only ever append or increment.

use crate::tx_interface::{PeerId, RelayMode, SimTime, TxHash};

/// Latency of one transaction payload arriving at a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxRecvTime {
    pub node: PeerId,
    pub tx: TxHash,
    /// Time since creation at the origin
    pub latency: SimTime,
    pub hop: u32,
}

/// One completed reconciliation round, recorded by the responding side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconciliationItem {
    pub peer: PeerId,
    pub local_set_size: usize,
    pub peer_set_size: usize,
    pub actual_diff: usize,
    pub estimated_diff: usize,
}

/// Counters of a closed connection, flushed into the node aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSummary {
    pub peer: PeerId,
    pub outbound: bool,
    pub mode: RelayMode,
    pub useful_inv_received: u64,
    pub useless_inv_received: u64,
    pub inv_items_sent: u64,
    pub connection_length: SimTime,
}

#[derive(Debug, Clone, Default)]
pub struct NodeStatistics {
    pub node_id: PeerId,
    pub mode: RelayMode,

    // ===== Announcements =====
    pub inv_received: u64,
    pub useless_inv_received: u64,
    pub recon_inv_received: u64,
    pub recon_useless_inv_received: u64,
    pub inv_items_sent: u64,
    pub ignored_filters: u64,

    // ===== Transactions =====
    pub tx_created: u64,
    pub tx_received: u64,
    pub tx_received_times: Vec<TxRecvTime>,
    /// A second announcement arrived while the first request was still in flight
    pub on_the_fly_collisions: u64,
    pub get_data_sent: u64,
    pub get_data_received: u64,
    pub request_timeouts: u64,
    /// Own transactions announced back to their creator
    pub loops_heard: u64,

    // ===== Privacy =====
    /// Spy only: the first announcer of a transaction was its origin
    pub first_spy_success: u64,
    /// Own transactions: delay until first announced to a declared spy
    pub first_spy_delays: Vec<SimTime>,

    // ===== Reconciliation =====
    pub reconciliations: u64,
    pub void_reconciliations: u64,
    pub reconciliation_data: Vec<ReconciliationItem>,

    // ===== Bandwidth =====
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,

    // ===== Connections =====
    pub connections: u64,
    pub total_connection_time: SimTime,
    pub black_holes_detected: u64,
    pub peer_summaries: Vec<PeerSummary>,
}

impl NodeStatistics {
    pub fn new(node_id: PeerId) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }

    pub fn record_reconciliation(&mut self, item: ReconciliationItem) {
        self.reconciliations += 1;
        if item.actual_diff == 0 {
            self.void_reconciliations += 1;
        }
        self.reconciliation_data.push(item);
    }

    pub fn mean_latency(&self) -> Option<f64> {
        if self.tx_received_times.is_empty() {
            return None;
        }
        let total: SimTime = self.tx_received_times.iter().map(|r| r.latency).sum();
        Some(total as f64 / self.tx_received_times.len() as f64)
    }

    /// Fold another node's counters into this one (for network-wide totals)
    pub fn absorb(&mut self, other: &NodeStatistics) {
        self.inv_received += other.inv_received;
        self.useless_inv_received += other.useless_inv_received;
        self.recon_inv_received += other.recon_inv_received;
        self.recon_useless_inv_received += other.recon_useless_inv_received;
        self.inv_items_sent += other.inv_items_sent;
        self.ignored_filters += other.ignored_filters;
        self.tx_created += other.tx_created;
        self.tx_received += other.tx_received;
        self.tx_received_times.extend_from_slice(&other.tx_received_times);
        self.on_the_fly_collisions += other.on_the_fly_collisions;
        self.get_data_sent += other.get_data_sent;
        self.get_data_received += other.get_data_received;
        self.request_timeouts += other.request_timeouts;
        self.loops_heard += other.loops_heard;
        self.first_spy_success += other.first_spy_success;
        self.first_spy_delays.extend_from_slice(&other.first_spy_delays);
        self.reconciliations += other.reconciliations;
        self.void_reconciliations += other.void_reconciliations;
        self.reconciliation_data.extend_from_slice(&other.reconciliation_data);
        self.messages_sent += other.messages_sent;
        self.bytes_sent += other.bytes_sent;
        self.bytes_received += other.bytes_received;
        self.connections += other.connections;
        self.total_connection_time += other.total_connection_time;
        self.black_holes_detected += other.black_holes_detected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(actual_diff: usize) -> ReconciliationItem {
        ReconciliationItem {
            peer: 1,
            local_set_size: 2,
            peer_set_size: 2,
            actual_diff,
            estimated_diff: 3,
        }
    }

    #[test]
    fn test_void_reconciliations_counted() {
        let mut stats = NodeStatistics::new(1);
        stats.record_reconciliation(item(0));
        stats.record_reconciliation(item(2));

        assert_eq!(stats.reconciliations, 2);
        assert_eq!(stats.void_reconciliations, 1);
        assert_eq!(stats.reconciliation_data.len(), 2);
    }

    #[test]
    fn test_mean_latency() {
        let mut stats = NodeStatistics::new(1);
        assert_eq!(stats.mean_latency(), None);

        for latency in [100, 300] {
            stats.tx_received_times.push(TxRecvTime {
                node: 1,
                tx: latency,
                latency,
                hop: 1,
            });
        }
        assert_eq!(stats.mean_latency(), Some(200.0));
    }

    #[test]
    fn test_absorb_sums_counters() {
        let mut total = NodeStatistics::default();
        let mut a = NodeStatistics::new(1);
        a.inv_received = 3;
        a.bytes_sent = 100;
        a.loops_heard = 2;
        let mut b = NodeStatistics::new(2);
        b.inv_received = 4;
        b.loops_heard = 1;
        b.record_reconciliation(item(1));

        total.absorb(&a);
        total.absorb(&b);
        assert_eq!(total.inv_received, 7);
        assert_eq!(total.bytes_sent, 100);
        assert_eq!(total.loops_heard, 3);
        assert_eq!(total.reconciliations, 1);
    }
}
