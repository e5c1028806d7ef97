use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::tx_interface::PeerId;

/// Stem routing table
///
/// Every outbound peer maps to one stem destination drawn uniformly from the
/// outbound set; a separate local destination serves transactions created here
/// or heard from inbound peers. Self-loops are allowed and left to the caller.
#[derive(Debug, Default)]
pub struct DandelionRouter {
    outbound: Vec<PeerId>,
    destinations: IndexMap<PeerId, PeerId>,
    local: Option<PeerId>,
}

impl DandelionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an outbound peer. The whole table is redrawn so every mapping stays
    /// uniform over the grown set.
    pub fn add_outbound(&mut self, peer: PeerId, rng: &mut StdRng) {
        if self.outbound.contains(&peer) {
            return;
        }
        self.outbound.push(peer);
        self.rotate(rng);
    }

    /// Forget `peer`, redrawing every mapping that pointed at it
    pub fn remove(&mut self, peer: PeerId, rng: &mut StdRng) {
        self.outbound.retain(|&p| p != peer);
        self.destinations.shift_remove(&peer);

        let stale: Vec<PeerId> = self
            .destinations
            .iter()
            .filter(|(_, &dest)| dest == peer)
            .map(|(&source, _)| source)
            .collect();
        for source in stale {
            match self.draw(rng) {
                Some(dest) => {
                    self.destinations.insert(source, dest);
                }
                None => {
                    self.destinations.shift_remove(&source);
                }
            }
        }
        if self.local == Some(peer) {
            self.local = self.draw(rng);
        }
    }

    /// Redraw every mapping independently of the previous assignment
    pub fn rotate(&mut self, rng: &mut StdRng) {
        let sources = self.outbound.clone();
        for source in sources {
            if let Some(dest) = self.draw(rng) {
                self.destinations.insert(source, dest);
            }
        }
        self.local = self.draw(rng);
    }

    pub fn current_destination(&self, peer: PeerId) -> Option<PeerId> {
        self.destinations.get(&peer).copied()
    }

    pub fn local_destination(&self) -> Option<PeerId> {
        self.local
    }

    /// Stem destination for a transaction heard from `source` (None = created here)
    pub fn destination_for(&self, source: Option<PeerId>) -> Option<PeerId> {
        match source {
            Some(peer) if self.outbound.contains(&peer) => self.current_destination(peer),
            _ => self.local,
        }
    }

    pub fn outbound(&self) -> &[PeerId] {
        &self.outbound
    }

    fn draw(&self, rng: &mut StdRng) -> Option<PeerId> {
        self.outbound.choose(rng).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn router(peers: &[PeerId], rng: &mut StdRng) -> DandelionRouter {
        let mut router = DandelionRouter::new();
        for &peer in peers {
            router.add_outbound(peer, rng);
        }
        router
    }

    #[test]
    fn test_every_outbound_peer_has_destination() {
        let mut rng = StdRng::seed_from_u64(42);
        let router = router(&[1, 2, 3], &mut rng);

        for peer in [1, 2, 3] {
            let dest = router.current_destination(peer).unwrap();
            assert!([1, 2, 3].contains(&dest));
        }
        assert!(router.local_destination().is_some());
        assert_eq!(router.current_destination(9), None);
    }

    #[test]
    fn test_inbound_source_uses_local_destination() {
        let mut rng = StdRng::seed_from_u64(42);
        let router = router(&[1, 2], &mut rng);

        assert_eq!(router.destination_for(Some(77)), router.local_destination());
        assert_eq!(router.destination_for(None), router.local_destination());
        assert_eq!(router.destination_for(Some(1)), router.current_destination(1));
    }

    #[test]
    fn test_remove_redraws_mappings() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut router = router(&[1, 2, 3], &mut rng);

        router.remove(2, &mut rng);
        assert_eq!(router.current_destination(2), None);
        for peer in [1, 3] {
            let dest = router.current_destination(peer).unwrap();
            assert_ne!(dest, 2);
        }
        assert_ne!(router.local_destination(), Some(2));

        router.remove(1, &mut rng);
        router.remove(3, &mut rng);
        assert_eq!(router.local_destination(), None);
    }

    #[test]
    fn test_initial_mapping_is_spread_across_peers() {
        let peers = [2, 3, 4, 5];
        let seeds = 400;
        let mut local_counts = [0usize; 4];
        let mut first_self_loops = 0;

        for seed in 0..seeds {
            let mut rng = StdRng::seed_from_u64(seed);
            let router = router(&peers, &mut rng);
            let local = router.local_destination().unwrap();
            local_counts[(local - 2) as usize] += 1;
            if router.current_destination(2) == Some(2) {
                first_self_loops += 1;
            }
        }

        let expected = seeds as f64 / peers.len() as f64;
        for count in local_counts {
            assert!(
                (count as f64 - expected).abs() < expected * 0.35,
                "local destination count {} too far from {}",
                count,
                expected
            );
        }
        assert!(first_self_loops < seeds as usize / 2);
    }

    #[test]
    fn test_rotation_frequency_converges() {
        let mut rng = StdRng::seed_from_u64(42);
        let peers = [1, 2, 3, 4];
        let mut router = router(&peers, &mut rng);

        let rounds = 4000;
        let mut counts = [0usize; 4];
        for _ in 0..rounds {
            router.rotate(&mut rng);
            let dest = router.current_destination(1).unwrap();
            counts[(dest - 1) as usize] += 1;
        }

        let expected = rounds as f64 / peers.len() as f64;
        for count in counts {
            assert!(
                (count as f64 - expected).abs() < expected * 0.15,
                "count {} too far from {}",
                count,
                expected
            );
        }
    }
}
