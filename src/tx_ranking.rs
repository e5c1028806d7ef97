use indexmap::IndexMap;

use crate::tx_interface::PeerId;

/// Announcement history of one peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerOutcomes {
    /// INVs from this peer that announced something new
    pub useful: u64,
    pub useless: u64,
    /// INV items we sent to this peer
    pub sent: u64,
}

impl PeerOutcomes {
    pub fn received(&self) -> u64 {
        self.useful + self.useless
    }

    pub fn useful_ratio(&self) -> f64 {
        let total = self.received();
        if total == 0 {
            0.0
        } else {
            self.useful as f64 / total as f64
        }
    }
}

/// Ranks peers by how often their announcements were new to us
#[derive(Debug, Default)]
pub struct PeerPreferenceRanker {
    outcomes: IndexMap<PeerId, PeerOutcomes>,
}

impl PeerPreferenceRanker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_peer(&mut self, peer: PeerId) {
        self.outcomes.entry(peer).or_default();
    }

    pub fn remove(&mut self, peer: PeerId) {
        self.outcomes.shift_remove(&peer);
    }

    pub fn record_outcome(&mut self, peer: PeerId, was_useful: bool) {
        let outcomes = self.outcomes.entry(peer).or_default();
        if was_useful {
            outcomes.useful += 1;
        } else {
            outcomes.useless += 1;
        }
    }

    pub fn record_sent(&mut self, peer: PeerId, items: u64) {
        self.outcomes.entry(peer).or_default().sent += items;
    }

    pub fn outcomes(&self, peer: PeerId) -> Option<&PeerOutcomes> {
        self.outcomes.get(&peer)
    }

    /// All known peers, best first
    pub fn ranked_peers(&self) -> Vec<PeerId> {
        let peers: Vec<PeerId> = self.outcomes.keys().copied().collect();
        self.ranked_among(&peers)
    }

    /// Rank a subset of peers. Unknown peers rank as 0/0.
    ///
    /// Order: descending useful ratio, then fewer items already sent, then peer id.
    pub fn ranked_among(&self, candidates: &[PeerId]) -> Vec<PeerId> {
        let mut ranked: Vec<(PeerId, f64, u64)> = candidates
            .iter()
            .map(|&peer| {
                let outcomes = self.outcomes.get(&peer).copied().unwrap_or_default();
                (peer, outcomes.useful_ratio(), outcomes.sent)
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.cmp(&b.2))
                .then(a.0.cmp(&b.0))
        });
        ranked.into_iter().map(|(peer, _, _)| peer).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranking_is_stable_without_changes() {
        let mut ranker = PeerPreferenceRanker::new();
        for peer in [5, 3, 9] {
            ranker.add_peer(peer);
        }
        ranker.record_outcome(9, true);
        ranker.record_outcome(3, false);

        let first = ranker.ranked_peers();
        assert_eq!(first, ranker.ranked_peers());
        assert_eq!(first, vec![9, 3, 5]);
    }

    #[test]
    fn test_useful_outcome_never_lowers_rank() {
        let mut ranker = PeerPreferenceRanker::new();
        for peer in 1..=4 {
            ranker.add_peer(peer);
        }
        ranker.record_outcome(1, true);
        ranker.record_outcome(2, false);

        let before = ranker.ranked_peers().iter().position(|&p| p == 4).unwrap();
        ranker.record_outcome(4, true);
        let after = ranker.ranked_peers().iter().position(|&p| p == 4).unwrap();
        assert!(after <= before);
    }

    #[test]
    fn test_ties_prefer_fewer_sent() {
        let mut ranker = PeerPreferenceRanker::new();
        ranker.record_outcome(1, true);
        ranker.record_outcome(2, true);
        ranker.record_sent(1, 10);

        assert_eq!(ranker.ranked_peers(), vec![2, 1]);
    }

    #[test]
    fn test_ratio_over_lifetime() {
        let mut ranker = PeerPreferenceRanker::new();
        ranker.record_outcome(1, true);
        ranker.record_outcome(1, false);
        ranker.record_outcome(1, false);
        ranker.record_outcome(1, true);

        let outcomes = ranker.outcomes(1).unwrap();
        assert_eq!(outcomes.received(), 4);
        assert!((outcomes.useful_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_ranked_among_subset_and_remove() {
        let mut ranker = PeerPreferenceRanker::new();
        ranker.record_outcome(1, true);
        ranker.record_outcome(2, true);
        ranker.record_outcome(3, false);

        assert_eq!(ranker.ranked_among(&[3, 2, 42]), vec![2, 3, 42]);

        ranker.remove(2);
        assert_eq!(ranker.ranked_peers(), vec![1, 3]);
    }
}
