// Periodic set reconciliation
//
// Each node keeps, per peer, the transactions it has seen and believes that peer
// has not reconciled yet. Only the outbound side of a link initiates; the sketch
// exchange is simulated by carrying the set itself while bandwidth is charged by
// the estimated difference.

use std::collections::VecDeque;

use hashbrown::HashMap;

use crate::tx_config::ReconciliationMode;
use crate::tx_interface::{
    InvItem, PeerId, ReconcileRequest, ReconcileResponse, TxHash, A_ESTIMATOR, RECON_MAX_SET_SIZE,
};
use crate::tx_stats::ReconciliationItem;

/// Estimated size of the symmetric difference of two sets of sizes `a` and `b`
pub fn estimate_difference(a: usize, b: usize, multiplier: f64) -> usize {
    let q = A_ESTIMATOR * multiplier;
    let diff = a.abs_diff(b) as f64;
    (diff + q * a.min(b) as f64).ceil() as usize + 1
}

/// Result of answering a reconciliation request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub response: ReconcileResponse,
    /// Transactions the initiator had and we did not
    pub learned: Vec<InvItem>,
    pub item: ReconciliationItem,
}

#[derive(Debug, Default)]
struct PeerSet {
    initiator: bool,
    pending: HashMap<TxHash, u32>,
}

impl PeerSet {
    fn take_sorted(&mut self) -> Vec<InvItem> {
        let mut items: Vec<InvItem> = self
            .pending
            .drain()
            .map(|(hash, hop)| InvItem { hash, hop })
            .collect();
        items.sort_by_key(|item| item.hash);
        items
    }
}

pub struct ReconciliationEngine {
    mode: ReconciliationMode,
    set_threshold: usize,
    q_multiplier: f64,
    sets: HashMap<PeerId, PeerSet>,
    // outbound peers, next to reconcile at the front
    queue: VecDeque<PeerId>,
}

impl ReconciliationEngine {
    pub fn new(mode: ReconciliationMode, set_threshold: usize, q_multiplier: f64) -> Self {
        Self {
            mode,
            set_threshold,
            q_multiplier,
            sets: HashMap::new(),
            queue: VecDeque::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.mode != ReconciliationMode::Off
    }

    /// Start tracking a peer. `initiator` is true when we opened the connection.
    pub fn register_peer(&mut self, peer: PeerId, initiator: bool) {
        self.sets.insert(
            peer,
            PeerSet {
                initiator,
                pending: HashMap::new(),
            },
        );
        if initiator && !self.queue.contains(&peer) {
            self.queue.push_back(peer);
        }
    }

    /// Discard the peer's set and drop it from the schedule
    pub fn remove_peer(&mut self, peer: PeerId) {
        self.sets.remove(&peer);
        self.queue.retain(|&p| p != peer);
    }

    pub fn is_tracked(&self, peer: PeerId) -> bool {
        self.sets.contains_key(&peer)
    }

    /// Queue `hash` for the next round with `peer`.
    ///
    /// Returns true when the set just reached `RECON_MAX_SET_SIZE` and we are the
    /// initiator, meaning a round should start right away.
    pub fn add(&mut self, peer: PeerId, hash: TxHash, hop: u32) -> bool {
        let Some(set) = self.sets.get_mut(&peer) else {
            return false;
        };
        set.pending.entry(hash).or_insert(hop);
        set.initiator && set.pending.len() >= RECON_MAX_SET_SIZE
    }

    /// The peer already has it
    pub fn remove(&mut self, peer: PeerId, hash: TxHash) {
        if let Some(set) = self.sets.get_mut(&peer) {
            set.pending.remove(&hash);
        }
    }

    pub fn set_size(&self, peer: PeerId) -> usize {
        self.sets.get(&peer).map(|s| s.pending.len()).unwrap_or(0)
    }

    pub fn contains(&self, peer: PeerId, hash: TxHash) -> bool {
        self.sets
            .get(&peer)
            .map(|s| s.pending.contains_key(&hash))
            .unwrap_or(false)
    }

    /// Move `peer` to the back of the round-robin queue
    pub fn schedule_next(&mut self, peer: PeerId) {
        if let Some(pos) = self.queue.iter().position(|&p| p == peer) {
            self.queue.remove(pos);
            self.queue.push_back(peer);
        }
    }

    /// Peers to reconcile with on this tick
    pub fn on_reconciliation_due(&mut self) -> Vec<PeerId> {
        match self.mode {
            ReconciliationMode::Off => Vec::new(),
            ReconciliationMode::TimeBased => match self.queue.front().copied() {
                Some(peer) => {
                    self.schedule_next(peer);
                    vec![peer]
                }
                None => Vec::new(),
            },
            ReconciliationMode::SetSizeBased => self
                .queue
                .iter()
                .copied()
                .filter(|&peer| self.set_size(peer) >= self.set_threshold)
                .collect(),
        }
    }

    /// Take our set for `peer` and turn it into a request
    pub fn build_request(&mut self, peer: PeerId) -> ReconcileRequest {
        let items = self
            .sets
            .get_mut(&peer)
            .map(|set| set.take_sorted())
            .unwrap_or_default();
        ReconcileRequest {
            set_size: items.len(),
            items,
        }
    }

    /// Responder side. Returns None for peers we do not track.
    pub fn on_request(&mut self, peer: PeerId, request: &ReconcileRequest) -> Option<RequestOutcome> {
        let set = self.sets.get_mut(&peer)?;
        let local = set.take_sorted();

        let remote: HashMap<TxHash, u32> =
            request.items.iter().map(|item| (item.hash, item.hop)).collect();
        let local_hashes: HashMap<TxHash, u32> =
            local.iter().map(|item| (item.hash, item.hop)).collect();

        let missing: Vec<InvItem> = local
            .iter()
            .filter(|item| !remote.contains_key(&item.hash))
            .copied()
            .collect();
        let learned: Vec<InvItem> = request
            .items
            .iter()
            .filter(|item| !local_hashes.contains_key(&item.hash))
            .copied()
            .collect();

        let actual_diff = missing.len() + learned.len();
        let estimated_diff = estimate_difference(local.len(), request.set_size, self.q_multiplier);

        Some(RequestOutcome {
            response: ReconcileResponse {
                missing,
                actual_diff,
                estimated_diff,
            },
            learned,
            item: ReconciliationItem {
                peer,
                local_set_size: local.len(),
                peer_set_size: request.set_size,
                actual_diff,
                estimated_diff,
            },
        })
    }

    /// Initiator side: what the responder had and we did not.
    /// Responses from peers no longer tracked are ignored.
    pub fn on_response(&mut self, peer: PeerId, response: &ReconcileResponse) -> Vec<InvItem> {
        if !self.sets.contains_key(&peer) {
            return Vec::new();
        }
        response.missing.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(mode: ReconciliationMode) -> ReconciliationEngine {
        ReconciliationEngine::new(mode, 2, 1.0)
    }

    #[test]
    fn test_estimate_is_deterministic() {
        assert_eq!(estimate_difference(0, 0, 1.0), 1);
        assert_eq!(estimate_difference(3, 2, 1.0), 2 + 1);
        // |100 - 50| + 0.04 * 50 = 52
        assert_eq!(estimate_difference(100, 50, 1.0), 53);
        assert_eq!(estimate_difference(100, 50, 0.0), 51);
        assert_eq!(estimate_difference(50, 100, 1.0), estimate_difference(100, 50, 1.0));
    }

    #[test]
    fn test_round_exchanges_symmetric_difference() {
        // A initiates towards B
        let mut a = engine(ReconciliationMode::TimeBased);
        let mut b = engine(ReconciliationMode::TimeBased);
        a.register_peer(2, true);
        b.register_peer(1, false);
        for hash in [1, 2, 3] {
            a.add(2, hash, 1);
        }
        for hash in [3, 4] {
            b.add(1, hash, 1);
        }

        assert_eq!(a.on_reconciliation_due(), vec![2]);
        let request = a.build_request(2);
        assert_eq!(request.set_size, 3);

        let outcome = b.on_request(1, &request).unwrap();
        assert_eq!(outcome.response.actual_diff, 3);
        let learned: Vec<TxHash> = outcome.learned.iter().map(|i| i.hash).collect();
        assert_eq!(learned, vec![1, 2]);
        assert_eq!(outcome.item.local_set_size, 2);
        assert_eq!(outcome.item.peer_set_size, 3);
        assert_eq!(outcome.item.estimated_diff, estimate_difference(2, 3, 1.0));

        let from_b: Vec<TxHash> = a
            .on_response(2, &outcome.response)
            .iter()
            .map(|i| i.hash)
            .collect();
        assert_eq!(from_b, vec![4]);

        assert_eq!(a.set_size(2), 0);
        assert_eq!(b.set_size(1), 0);
    }

    #[test]
    fn test_empty_round_still_answers() {
        let mut b = engine(ReconciliationMode::TimeBased);
        b.register_peer(1, false);
        let outcome = b
            .on_request(1, &ReconcileRequest { set_size: 0, items: vec![] })
            .unwrap();
        assert_eq!(outcome.item.actual_diff, 0);
        assert!(outcome.learned.is_empty());
    }

    #[test]
    fn test_time_based_round_robin() {
        let mut e = engine(ReconciliationMode::TimeBased);
        e.register_peer(1, true);
        e.register_peer(2, true);
        e.register_peer(3, false);

        assert_eq!(e.on_reconciliation_due(), vec![1]);
        assert_eq!(e.on_reconciliation_due(), vec![2]);
        assert_eq!(e.on_reconciliation_due(), vec![1]);
    }

    #[test]
    fn test_set_size_based_threshold() {
        let mut e = engine(ReconciliationMode::SetSizeBased);
        e.register_peer(1, true);
        e.register_peer(2, true);
        e.add(1, 10, 1);
        e.add(1, 11, 1);
        e.add(2, 10, 1);

        assert_eq!(e.on_reconciliation_due(), vec![1]);
    }

    #[test]
    fn test_off_never_due() {
        let mut e = engine(ReconciliationMode::Off);
        e.register_peer(1, true);
        assert!(e.on_reconciliation_due().is_empty());
    }

    #[test]
    fn test_full_set_triggers_round_for_initiator_only() {
        let mut e = engine(ReconciliationMode::TimeBased);
        e.register_peer(1, true);
        e.register_peer(2, false);

        let mut triggered = false;
        for hash in 0..RECON_MAX_SET_SIZE as u64 {
            triggered = e.add(1, hash, 1);
            assert!(!e.add(2, hash, 1));
        }
        assert!(triggered);
    }

    #[test]
    fn test_removed_peer_is_ignored() {
        let mut e = engine(ReconciliationMode::TimeBased);
        e.register_peer(1, true);
        e.add(1, 5, 1);
        e.remove_peer(1);

        assert!(e.on_reconciliation_due().is_empty());
        assert!(!e.add(1, 6, 1));
        let response = ReconcileResponse {
            missing: vec![InvItem { hash: 9, hop: 1 }],
            actual_diff: 1,
            estimated_diff: 2,
        };
        assert!(e.on_response(1, &response).is_empty());
        assert!(e
            .on_request(1, &ReconcileRequest { set_size: 0, items: vec![] })
            .is_none());
    }
}
