// Announcement strategies
//
// One strategy per protocol, picked once when the node is built. A strategy only
// chooses destinations; queueing, trickling and bookkeeping stay in the node.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::tx_config::{FluffPolicy, ProtocolSettings, ProtocolType};
use crate::tx_dandelion::DandelionRouter;
use crate::tx_filters::{filter_value, FilterManager};
use crate::tx_interface::{PeerId, TxHash};
use crate::tx_ranking::PeerPreferenceRanker;

/// A peer eligible to hear about the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub peer: PeerId,
    pub outbound: bool,
}

pub struct AnnounceContext<'a> {
    pub tx: TxHash,
    /// Hop count recorded at this node (0 for local transactions)
    pub hop: u32,
    /// Peer the transaction came from, None when created here
    pub from: Option<PeerId>,
    /// The transaction arrived in (or was created for) the stem phase
    pub stem: bool,
    /// Connected peers minus the source, peers known to have it and suspected black holes
    pub candidates: &'a [Candidate],
    pub ranker: &'a PeerPreferenceRanker,
    pub filters: &'a FilterManager,
    pub router: &'a DandelionRouter,
    pub rng: &'a mut StdRng,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnounceDecision {
    /// Peers that get an INV
    pub direct: Vec<PeerId>,
    /// Direct INVs are stem-phase and bypass the trickle
    pub stem: bool,
    /// Peers whose reconciliation set gets the transaction
    pub reconcile: Vec<PeerId>,
    /// Peers skipped because their filter rejected the transaction
    pub filtered: usize,
}

impl AnnounceDecision {
    pub fn fluff(direct: Vec<PeerId>) -> Self {
        Self {
            direct,
            ..Default::default()
        }
    }
}

pub trait AnnouncementStrategy {
    fn name(&self) -> &'static str;

    fn decide(&self, ctx: &mut AnnounceContext<'_>) -> AnnounceDecision;
}

/// Pick the strategy for a settings bundle. Reconciliation overrides the protocol.
pub fn strategy_for(settings: &ProtocolSettings) -> Box<dyn AnnouncementStrategy> {
    if settings.reconciliation_enabled() {
        return Box::new(Reconciliation {
            loop_accommodation: settings.loop_accommodation,
            lowfanout_out: settings.lowfanout_order_out as usize,
            lowfanout_in_percent: settings.lowfanout_order_in_percent,
        });
    }
    match settings.protocol {
        ProtocolType::Standard => Box::new(Flood),
        ProtocolType::FiltersOnIncomingLinks | ProtocolType::OutgoingFilters => Box::new(Filtered),
        ProtocolType::PreferredOutDestinations => Box::new(Preferred {
            outbound_only: true,
            fanout: settings.preferred_fanout,
        }),
        ProtocolType::PreferredAllDestinations => Box::new(Preferred {
            outbound_only: false,
            fanout: settings.preferred_fanout,
        }),
        ProtocolType::DandelionMapping => Box::new(Dandelion {
            policy: settings.fluff_policy,
        }),
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Every candidate, at the next trickle
pub struct Flood;

impl AnnouncementStrategy for Flood {
    fn name(&self) -> &'static str {
        "flood"
    }

    fn decide(&self, ctx: &mut AnnounceContext<'_>) -> AnnounceDecision {
        AnnounceDecision::fluff(ctx.candidates.iter().map(|c| c.peer).collect())
    }
}

/// Top-K peers by useful announcement ratio
pub struct Preferred {
    pub outbound_only: bool,
    pub fanout: usize,
}

impl AnnouncementStrategy for Preferred {
    fn name(&self) -> &'static str {
        if self.outbound_only {
            "preferred_out"
        } else {
            "preferred_all"
        }
    }

    fn decide(&self, ctx: &mut AnnounceContext<'_>) -> AnnounceDecision {
        let pool: Vec<PeerId> = ctx
            .candidates
            .iter()
            .filter(|c| c.outbound || !self.outbound_only)
            .map(|c| c.peer)
            .collect();
        let mut ranked = ctx.ranker.ranked_among(&pool);
        ranked.truncate(self.fanout);
        AnnounceDecision::fluff(ranked)
    }
}

/// Flood, minus peers whose filter window rejects the transaction
pub struct Filtered;

impl AnnouncementStrategy for Filtered {
    fn name(&self) -> &'static str {
        "filters"
    }

    fn decide(&self, ctx: &mut AnnounceContext<'_>) -> AnnounceDecision {
        let value = filter_value(ctx.tx);
        let (accepted, rejected): (Vec<&Candidate>, Vec<&Candidate>) = ctx
            .candidates
            .iter()
            .partition(|c| ctx.filters.validate(c.peer, value));
        AnnounceDecision {
            direct: accepted.into_iter().map(|c| c.peer).collect(),
            filtered: rejected.len(),
            ..Default::default()
        }
    }
}

/// Stem along the router's mapping until the fluff policy fires
pub struct Dandelion {
    pub policy: FluffPolicy,
}

impl Dandelion {
    fn should_fluff(&self, ctx: &mut AnnounceContext<'_>) -> bool {
        if !ctx.stem {
            return true;
        }
        // the originator always stems
        if ctx.from.is_none() {
            return false;
        }
        match self.policy {
            FluffPolicy::Probabilistic { probability } => ctx.rng.gen_bool(probability),
            FluffPolicy::HopCount { max_stem_hops } => ctx.hop >= max_stem_hops,
        }
    }
}

impl AnnouncementStrategy for Dandelion {
    fn name(&self) -> &'static str {
        "dandelion"
    }

    fn decide(&self, ctx: &mut AnnounceContext<'_>) -> AnnounceDecision {
        if !self.should_fluff(ctx) {
            let destination = ctx
                .router
                .destination_for(ctx.from)
                .filter(|dest| ctx.candidates.iter().any(|c| c.peer == *dest));
            if let Some(dest) = destination {
                return AnnounceDecision {
                    direct: vec![dest],
                    stem: true,
                    ..Default::default()
                };
            }
        }
        Flood.decide(ctx)
    }
}

/// Low-fanout flooding for young transactions, set reconciliation for the rest
pub struct Reconciliation {
    pub loop_accommodation: u32,
    pub lowfanout_out: usize,
    pub lowfanout_in_percent: u32,
}

impl AnnouncementStrategy for Reconciliation {
    fn name(&self) -> &'static str {
        "reconciliation"
    }

    fn decide(&self, ctx: &mut AnnounceContext<'_>) -> AnnounceDecision {
        let mut direct = Vec::new();

        if ctx.hop < self.loop_accommodation {
            let mut outbound: Vec<PeerId> = ctx
                .candidates
                .iter()
                .filter(|c| c.outbound)
                .map(|c| c.peer)
                .collect();
            let mut inbound: Vec<PeerId> = ctx
                .candidates
                .iter()
                .filter(|c| !c.outbound)
                .map(|c| c.peer)
                .collect();

            outbound.shuffle(&mut *ctx.rng);
            outbound.truncate(self.lowfanout_out);

            let in_count = (inbound.len() * self.lowfanout_in_percent as usize + 99) / 100;
            inbound.shuffle(&mut *ctx.rng);
            inbound.truncate(in_count);

            direct.extend(outbound);
            direct.extend(inbound);
        }

        let reconcile = ctx
            .candidates
            .iter()
            .map(|c| c.peer)
            .filter(|peer| !direct.contains(peer))
            .collect();

        AnnounceDecision {
            direct,
            reconcile,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx_config::ReconciliationMode;
    use rand::SeedableRng;

    struct Fixture {
        candidates: Vec<Candidate>,
        ranker: PeerPreferenceRanker,
        filters: FilterManager,
        router: DandelionRouter,
        rng: StdRng,
    }

    impl Fixture {
        // peers 1..=3 outbound, 4..=6 inbound
        fn new() -> Self {
            let mut rng = StdRng::seed_from_u64(42);
            let mut router = DandelionRouter::new();
            for peer in 1..=3 {
                router.add_outbound(peer, &mut rng);
            }
            Self {
                candidates: (1..=6)
                    .map(|peer| Candidate {
                        peer,
                        outbound: peer <= 3,
                    })
                    .collect(),
                ranker: PeerPreferenceRanker::new(),
                filters: FilterManager::new(),
                router,
                rng,
            }
        }

        fn decide(
            &mut self,
            strategy: &dyn AnnouncementStrategy,
            tx: TxHash,
            hop: u32,
            from: Option<PeerId>,
            stem: bool,
        ) -> AnnounceDecision {
            let mut ctx = AnnounceContext {
                tx,
                hop,
                from,
                stem,
                candidates: &self.candidates,
                ranker: &self.ranker,
                filters: &self.filters,
                router: &self.router,
                rng: &mut self.rng,
            };
            strategy.decide(&mut ctx)
        }
    }

    #[test]
    fn test_flood_reaches_every_candidate() {
        let mut f = Fixture::new();
        let decision = f.decide(&Flood, 7, 0, None, false);
        assert_eq!(decision.direct, vec![1, 2, 3, 4, 5, 6]);
        assert!(!decision.stem);
        assert!(decision.reconcile.is_empty());
    }

    #[test]
    fn test_preferred_takes_top_ranked() {
        let mut f = Fixture::new();
        f.ranker.record_outcome(3, true);
        f.ranker.record_outcome(5, true);
        f.ranker.record_outcome(1, false);

        let out_only = Preferred {
            outbound_only: true,
            fanout: 2,
        };
        assert_eq!(f.decide(&out_only, 7, 1, Some(9), false).direct, vec![3, 1]);

        let all = Preferred {
            outbound_only: false,
            fanout: 2,
        };
        assert_eq!(f.decide(&all, 7, 1, Some(9), false).direct, vec![3, 5]);
    }

    #[test]
    fn test_filters_skip_and_count() {
        let mut f = Fixture::new();
        // tx 1250 has filter value 250
        f.filters.set_window(1, 0, 100);
        f.filters.set_window(2, 200, 300);
        f.filters.set_window(4, 0, 0);

        let decision = f.decide(&Filtered, 1250, 0, None, false);
        assert_eq!(decision.direct, vec![2, 3, 5, 6]);
        assert_eq!(decision.filtered, 2);
    }

    #[test]
    fn test_dandelion_originator_stems_to_local_destination() {
        let mut f = Fixture::new();
        let dandelion = Dandelion {
            policy: FluffPolicy::Probabilistic { probability: 1.0 },
        };
        let decision = f.decide(&dandelion, 7, 0, None, true);
        assert!(decision.stem);
        assert_eq!(decision.direct, vec![f.router.local_destination().unwrap()]);
    }

    #[test]
    fn test_dandelion_fluff_policies() {
        let mut f = Fixture::new();
        let always = Dandelion {
            policy: FluffPolicy::Probabilistic { probability: 1.0 },
        };
        let decision = f.decide(&always, 7, 2, Some(4), true);
        assert!(!decision.stem);
        assert_eq!(decision.direct.len(), 6);

        let hops = Dandelion {
            policy: FluffPolicy::HopCount { max_stem_hops: 3 },
        };
        assert!(f.decide(&hops, 7, 2, Some(4), true).stem);
        assert!(!f.decide(&hops, 7, 3, Some(4), true).stem);

        // a fluff-phase transaction is flooded regardless
        assert!(!f.decide(&hops, 7, 1, Some(4), false).stem);
    }

    #[test]
    fn test_dandelion_fluffs_when_destination_ineligible() {
        let mut f = Fixture::new();
        let dest = f.router.local_destination().unwrap();
        f.candidates.retain(|c| c.peer != dest);

        let never = Dandelion {
            policy: FluffPolicy::Probabilistic { probability: 0.0 },
        };
        let decision = f.decide(&never, 7, 0, None, true);
        assert!(!decision.stem);
        assert_eq!(decision.direct.len(), 5);
    }

    #[test]
    fn test_reconciliation_low_fanout_then_sets() {
        let mut f = Fixture::new();
        let recon = Reconciliation {
            loop_accommodation: 2,
            lowfanout_out: 1,
            lowfanout_in_percent: 10,
        };

        let young = f.decide(&recon, 7, 1, Some(9), false);
        // one outbound plus ceil(10% of 3) inbound
        assert_eq!(young.direct.len(), 2);
        assert!(young.direct[0] <= 3);
        assert!(young.direct[1] >= 4);
        assert_eq!(young.reconcile.len(), 4);
        for peer in &young.direct {
            assert!(!young.reconcile.contains(peer));
        }

        let old = f.decide(&recon, 7, 2, Some(9), false);
        assert!(old.direct.is_empty());
        assert_eq!(old.reconcile, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_strategy_selection() {
        let mut settings = ProtocolSettings {
            protocol: ProtocolType::OutgoingFilters,
            ..Default::default()
        };
        assert_eq!(strategy_for(&settings).name(), "filters");

        settings.protocol = ProtocolType::DandelionMapping;
        assert_eq!(strategy_for(&settings).name(), "dandelion");

        settings.reconciliation_mode = ReconciliationMode::SetSizeBased;
        assert_eq!(strategy_for(&settings).name(), "reconciliation");
    }
}
