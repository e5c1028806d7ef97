use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::{HashMap, HashSet};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::tx_announce::{
    strategy_for, AnnounceContext, AnnounceDecision, AnnouncementStrategy, Candidate, Flood,
};
use crate::tx_config::{NodeConfig, ProtocolType};
use crate::tx_dandelion::DandelionRouter;
use crate::tx_filters::{FilterManager, FilterWindow};
use crate::tx_generator::{poisson_delay, TransactionGenerator};
use crate::tx_interface::{
    transmit_millis, Event, EventSink, InvItem, LinkSpeeds, Message, NodeTimer, NoOpSink, PeerId,
    ReconcileRequest, ReconcileResponse, RelayContext, RelayMode, SimTime, TimerHandle,
    Transaction, TxHash, BH_DETECTION_MIN_LOST,
};
use crate::tx_peers::{PeerEntry, PeerTable};
use crate::tx_ranking::PeerPreferenceRanker;
use crate::tx_reconciliation::ReconciliationEngine;
use crate::tx_stats::{NodeStatistics, TxRecvTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    Stem,
    Fluff,
}

/// What a node knows about one transaction
#[derive(Debug, Clone)]
pub struct TxRecord {
    /// Hop count at first sighting, 0 for local transactions
    pub hop: u32,
    /// None for transactions created here
    pub first_from: Option<PeerId>,
    pub first_seen: SimTime,
    pub phase: TxPhase,
    pub payload: Option<Transaction>,
}

struct PendingRequest {
    peer: PeerId,
    handle: TimerHandle,
    tried: Vec<PeerId>,
}

pub struct RelayNode {
    id: PeerId,
    config: NodeConfig,
    strategy: Box<dyn AnnouncementStrategy>,
    running: bool,

    // ===== Peers =====
    peers: PeerTable,
    /// Addresses this node dials when the network starts
    out_peers: Vec<PeerId>,
    peer_speeds: HashMap<PeerId, LinkSpeeds>,
    filters: FilterManager,
    /// Windows we asked each peer to apply to announcements towards us
    requested_filters: HashMap<PeerId, FilterWindow>,
    ranker: PeerPreferenceRanker,
    reconciliation: ReconciliationEngine,
    router: DandelionRouter,

    // ===== Transactions =====
    generator: TransactionGenerator,
    known: HashMap<TxHash, TxRecord>,
    peers_know_tx: HashMap<TxHash, Vec<PeerId>>,
    requests: HashMap<TxHash, PendingRequest>,
    embargo: HashMap<TxHash, TimerHandle>,
    /// Stem hop each embargoed transaction was handed to
    stemmed_to: HashMap<TxHash, PeerId>,
    reached_spy: HashSet<TxHash>,
    tx_counter: u64,

    // ===== Timers =====
    inbound_trickle: Option<TimerHandle>,
    generate_timer: Option<TimerHandle>,
    reconcile_timer: Option<TimerHandle>,
    rotate_timer: Option<TimerHandle>,

    stats: Rc<RefCell<NodeStatistics>>,
    event_sink: Box<dyn EventSink>,
    rng: StdRng,
}

impl RelayNode {
    /// Create a new node with default NoOpSink (zero overhead)
    pub fn new(
        id: PeerId,
        config: NodeConfig,
        out_peers: Vec<PeerId>,
        peer_speeds: HashMap<PeerId, LinkSpeeds>,
        stats: Rc<RefCell<NodeStatistics>>,
    ) -> Self {
        Self::new_with_sink(id, config, out_peers, peer_speeds, stats, Box::new(NoOpSink))
    }

    /// Create a new node with a custom event sink for debugging/analysis
    pub fn new_with_sink(
        id: PeerId,
        config: NodeConfig,
        out_peers: Vec<PeerId>,
        peer_speeds: HashMap<PeerId, LinkSpeeds>,
        stats: Rc<RefCell<NodeStatistics>>,
        event_sink: Box<dyn EventSink>,
    ) -> Self {
        let settings = &config.settings;
        Self {
            id,
            strategy: strategy_for(settings),
            running: false,
            peers: PeerTable::new(),
            out_peers,
            peer_speeds,
            filters: FilterManager::new(),
            requested_filters: HashMap::new(),
            ranker: PeerPreferenceRanker::new(),
            reconciliation: ReconciliationEngine::new(
                settings.reconciliation_mode,
                settings.reconciliation_set_threshold,
                settings.q_estimation_multiplier,
            ),
            router: DandelionRouter::new(),
            generator: TransactionGenerator::from_config(&config),
            known: HashMap::new(),
            peers_know_tx: HashMap::new(),
            requests: HashMap::new(),
            embargo: HashMap::new(),
            stemmed_to: HashMap::new(),
            reached_spy: HashSet::new(),
            tx_counter: 0,
            inbound_trickle: None,
            generate_timer: None,
            reconcile_timer: None,
            rotate_timer: None,
            stats,
            event_sink,
            rng: StdRng::seed_from_u64(config.seed),
            config,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn mode(&self) -> RelayMode {
        self.config.mode
    }

    pub fn out_peers(&self) -> &[PeerId] {
        &self.out_peers
    }

    pub fn statistics(&self) -> Rc<RefCell<NodeStatistics>> {
        Rc::clone(&self.stats)
    }

    pub fn num_peers(&self) -> usize {
        self.peers.len()
    }

    pub fn peer(&self, peer: PeerId) -> Option<&PeerEntry> {
        self.peers.get(peer)
    }

    pub fn record(&self, hash: TxHash) -> Option<&TxRecord> {
        self.known.get(&hash)
    }

    pub fn has_payload(&self, hash: TxHash) -> bool {
        self.known
            .get(&hash)
            .map(|r| r.payload.is_some())
            .unwrap_or(false)
    }

    pub fn known_transactions(&self) -> Vec<TxHash> {
        let mut hashes: Vec<TxHash> = self.known.keys().copied().collect();
        hashes.sort_unstable();
        hashes
    }

    pub fn peers_knowing(&self, hash: TxHash) -> &[PeerId] {
        self.peers_know_tx
            .get(&hash)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn filters(&self) -> &FilterManager {
        &self.filters
    }

    pub fn reconciliation(&self) -> &ReconciliationEngine {
        &self.reconciliation
    }

    pub fn router(&self) -> &DandelionRouter {
        &self.router
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn start(&mut self, ctx: &mut dyn RelayContext) {
        self.running = true;
        {
            let mut stats = self.stats.borrow_mut();
            stats.node_id = self.id;
            stats.mode = self.config.mode;
        }

        self.schedule_generation(ctx);

        let settings = &self.config.settings;
        if settings.reconciliation_enabled() {
            let interval = settings.reconciliation_interval();
            self.reconcile_timer = Some(ctx.schedule(interval, NodeTimer::Reconcile));
        }
        if settings.protocol == ProtocolType::DandelionMapping {
            let interval = settings.stem_rotation();
            self.rotate_timer = Some(ctx.schedule(interval, NodeTimer::RotateStems));
        }

        debug!(
            "node {} started: mode {:?}, strategy {}",
            self.id,
            self.config.mode,
            self.strategy.name()
        );
    }

    /// Close every connection and stop all periodic processes
    pub fn stop(&mut self, ctx: &mut dyn RelayContext) {
        self.running = false;
        for handle in [
            self.generate_timer.take(),
            self.reconcile_timer.take(),
            self.rotate_timer.take(),
            self.inbound_trickle.take(),
        ]
        .into_iter()
        .flatten()
        {
            ctx.cancel(handle);
        }
        for (_, handle) in self.embargo.drain() {
            ctx.cancel(handle);
        }
        self.stemmed_to.clear();

        for peer in self.peers.ids() {
            self.peer_closed(peer, ctx);
        }

        let stats = self.stats.borrow();
        info!(
            "node {} stopped: created {}, received {}, inv sent {}, useless inv {}",
            self.id,
            stats.tx_created,
            stats.tx_received,
            stats.inv_items_sent,
            stats.useless_inv_received
        );
    }

    pub fn peer_connected(&mut self, peer: PeerId, outbound: bool, ctx: &mut dyn RelayContext) {
        if self.peers.contains(peer) {
            debug!("node {}: peer {} already connected", self.id, peer);
            return;
        }
        let speeds = self.peer_speeds.get(&peer).copied().unwrap_or_default();
        self.peers.insert(PeerEntry::new(
            peer,
            outbound,
            speeds.download_mbps,
            speeds.upload_mbps,
            ctx.now(),
        ));
        self.stats.borrow_mut().connections += 1;
        self.event_sink
            .log(ctx.now(), self.id, Event::PeerConnected { peer, outbound });

        if self.config.mode != RelayMode::Regular {
            self.send(
                peer,
                Message::Mode {
                    mode: self.config.mode,
                },
                ctx,
            );
        }

        self.ranker.add_peer(peer);
        if self.reconciliation.is_enabled() {
            self.reconciliation.register_peer(peer, outbound);
        }
        if outbound && self.config.settings.protocol == ProtocolType::DandelionMapping {
            self.router.add_outbound(peer, &mut self.rng);
        }
        if self.config.settings.protocol.uses_filters() {
            self.validate_node_filters(ctx);
        }
    }

    /// Connection closed or failed
    pub fn peer_closed(&mut self, peer: PeerId, ctx: &mut dyn RelayContext) {
        let Some(mut entry) = self.peers.remove(peer) else {
            return;
        };
        if let Some(handle) = entry.trickle_timer.take() {
            ctx.cancel(handle);
        }

        let summary = entry.close(ctx.now());
        {
            let mut stats = self.stats.borrow_mut();
            stats.total_connection_time += summary.connection_length;
            stats.peer_summaries.push(summary);
        }
        self.event_sink.log(
            ctx.now(),
            self.id,
            Event::PeerClosed {
                peer,
                duration: summary.connection_length,
            },
        );

        // in-flight requests to this peer are dropped, not retried
        let mut dropped: Vec<TxHash> = self
            .requests
            .iter()
            .filter(|(_, request)| request.peer == peer)
            .map(|(&hash, _)| hash)
            .collect();
        dropped.sort_unstable();
        for hash in dropped {
            if let Some(request) = self.requests.remove(&hash) {
                ctx.cancel(request.handle);
            }
            self.forget_if_missing(hash);
        }

        for knowing in self.peers_know_tx.values_mut() {
            knowing.retain(|&p| p != peer);
        }

        self.reconciliation.remove_peer(peer);
        self.ranker.remove(peer);
        self.router.remove(peer, &mut self.rng);
        self.filters.remove(peer);
        self.requested_filters.remove(&peer);

        if self.config.settings.protocol.uses_filters() {
            self.validate_node_filters(ctx);
        }
    }

    // ========================================================================
    // Inbound messages
    // ========================================================================

    pub fn handle_message(&mut self, from: PeerId, message: Message, ctx: &mut dyn RelayContext) {
        self.stats.borrow_mut().bytes_received += message.wire_size() as u64;

        if !self.peers.contains(from) {
            warn!(
                "node {}: {} from unknown peer {} ignored",
                self.id,
                message.kind(),
                from
            );
            return;
        }

        match message {
            Message::Inv { items, stem } => self.on_inv(from, items, stem, false, ctx),
            Message::GetData { hashes } => self.on_get_data(from, hashes, ctx),
            Message::Tx { tx } => self.on_tx(from, tx, ctx),
            Message::FilterRequest { begin, end } => self.filters.set_window(from, begin, end),
            Message::UpdateFilterBegin { value } => self.filters.update_begin(from, value),
            Message::UpdateFilterEnd { value } => self.filters.update_end(from, value),
            Message::Mode { mode } => {
                if let Some(entry) = self.peers.get_mut(from) {
                    entry.mode = mode;
                }
            }
            Message::ReconcileRequest(request) => self.on_reconcile_request(from, request, ctx),
            Message::ReconcileResponse(response) => self.on_reconcile_response(from, response, ctx),
        }
    }

    fn on_inv(
        &mut self,
        from: PeerId,
        items: Vec<InvItem>,
        stem: bool,
        reconciled: bool,
        ctx: &mut dyn RelayContext,
    ) {
        let now = ctx.now();
        let mut wanted = Vec::new();
        let mut to_fluff = Vec::new();

        for item in items {
            self.mark_known_by(item.hash, from);
            self.reconciliation.remove(from, item.hash);
            if let Some(entry) = self.peers.get_mut(from) {
                entry.pending_inv.retain(|i| i.hash != item.hash);
            }

            let useful = !self.known.contains_key(&item.hash);
            {
                let mut stats = self.stats.borrow_mut();
                match (reconciled, useful) {
                    (false, true) => stats.inv_received += 1,
                    (false, false) => {
                        stats.inv_received += 1;
                        stats.useless_inv_received += 1;
                    }
                    (true, true) => stats.recon_inv_received += 1,
                    (true, false) => {
                        stats.recon_inv_received += 1;
                        stats.recon_useless_inv_received += 1;
                    }
                }
            }
            if let Some(entry) = self.peers.get_mut(from) {
                if useful {
                    entry.stats.useful_inv_received += 1;
                } else {
                    entry.stats.useless_inv_received += 1;
                }
            }
            self.ranker.record_outcome(from, useful);

            if useful {
                self.known.insert(
                    item.hash,
                    TxRecord {
                        hop: item.hop,
                        first_from: Some(from),
                        first_seen: now,
                        phase: if stem { TxPhase::Stem } else { TxPhase::Fluff },
                        payload: None,
                    },
                );
                self.event_sink.log(
                    now,
                    self.id,
                    Event::TxAnnounced {
                        tx: item.hash,
                        from,
                        hop: item.hop,
                        reconciled,
                    },
                );
                wanted.push(item.hash);
                continue;
            }

            self.event_sink.log(
                now,
                self.id,
                Event::DuplicateAnnouncement {
                    tx: item.hash,
                    from,
                },
            );
            if self.requests.contains_key(&item.hash) {
                self.stats.borrow_mut().on_the_fly_collisions += 1;
            }
            let (own, stem_phase) = self
                .known
                .get(&item.hash)
                .map(|r| (r.first_from.is_none(), r.phase == TxPhase::Stem))
                .unwrap_or((false, false));
            if own {
                // our own transaction came back around
                self.stats.borrow_mut().loops_heard += 1;
            }
            if !stem && stem_phase {
                to_fluff.push(item.hash);
            }
        }

        if !wanted.is_empty() {
            self.request(from, wanted, ctx);
        }
        for hash in to_fluff {
            debug!("node {}: heard {} fluffed while in stem", self.id, hash);
            self.fluff(hash, ctx);
        }
    }

    fn on_get_data(&mut self, from: PeerId, hashes: Vec<TxHash>, ctx: &mut dyn RelayContext) {
        self.stats.borrow_mut().get_data_received += 1;
        if let Some(entry) = self.peers.get_mut(from) {
            entry.stats.get_data_received += 1;
        }
        for hash in hashes {
            let Some(tx) = self.known.get(&hash).and_then(|r| r.payload) else {
                debug!("node {}: get_data for unknown {} from {}", self.id, hash, from);
                continue;
            };
            self.mark_known_by(hash, from);
            self.send(from, Message::Tx { tx }, ctx);
        }
    }

    fn on_tx(&mut self, from: PeerId, tx: Transaction, ctx: &mut dyn RelayContext) {
        let now = ctx.now();
        if let Some(request) = self.requests.remove(&tx.hash) {
            ctx.cancel(request.handle);
        }

        let Some(record) = self.known.get_mut(&tx.hash) else {
            debug!("node {}: unsolicited tx {} from {}", self.id, tx.hash, from);
            return;
        };
        if record.payload.is_some() {
            return;
        }
        record.payload = Some(tx);
        let hop = record.hop;
        let first_from = record.first_from;

        let latency = now.saturating_sub(tx.created_at);
        {
            let mut stats = self.stats.borrow_mut();
            stats.tx_received += 1;
            stats.tx_received_times.push(TxRecvTime {
                node: self.id,
                tx: tx.hash,
                latency,
                hop,
            });
            if self.config.mode == RelayMode::Spy && first_from == Some(tx.origin) {
                stats.first_spy_success += 1;
            }
        }
        self.event_sink.log(
            now,
            self.id,
            Event::TxReceived {
                tx: tx.hash,
                from,
                latency,
            },
        );

        if self.config.mode == RelayMode::BlackHole {
            return;
        }
        self.relay(tx.hash, ctx);
    }

    fn on_reconcile_request(
        &mut self,
        from: PeerId,
        request: ReconcileRequest,
        ctx: &mut dyn RelayContext,
    ) {
        let Some(outcome) = self.reconciliation.on_request(from, &request) else {
            debug!("node {}: reconcile request from untracked {}", self.id, from);
            return;
        };

        self.stats.borrow_mut().record_reconciliation(outcome.item);
        self.event_sink.log(
            ctx.now(),
            self.id,
            Event::ReconciliationCompleted {
                peer: from,
                actual_diff: outcome.item.actual_diff,
                estimated_diff: outcome.item.estimated_diff,
            },
        );

        for item in &request.items {
            self.mark_known_by(item.hash, from);
        }
        for item in &outcome.response.missing {
            self.mark_known_by(item.hash, from);
        }
        let missing = outcome.response.missing.len();
        self.send(from, Message::ReconcileResponse(outcome.response), ctx);
        self.note_sent(from, missing as u64, &[], ctx.now());

        if !outcome.learned.is_empty() {
            self.on_inv(from, outcome.learned, false, true, ctx);
        }
    }

    fn on_reconcile_response(
        &mut self,
        from: PeerId,
        response: ReconcileResponse,
        ctx: &mut dyn RelayContext,
    ) {
        let learned = self.reconciliation.on_response(from, &response);
        if !learned.is_empty() {
            self.on_inv(from, learned, false, true, ctx);
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    pub fn handle_timer(&mut self, timer: NodeTimer, ctx: &mut dyn RelayContext) {
        match timer {
            NodeTimer::GenerateTx => {
                self.generate_timer = None;
                if self.running {
                    self.create_transaction(ctx);
                    self.schedule_generation(ctx);
                }
            }
            NodeTimer::TrickleOutbound(peer) => {
                if let Some(entry) = self.peers.get_mut(peer) {
                    entry.trickle_timer = None;
                }
                self.flush(peer, ctx);
            }
            NodeTimer::TrickleInbound => {
                self.inbound_trickle = None;
                for peer in self.peers.inbound_ids() {
                    self.flush(peer, ctx);
                }
            }
            NodeTimer::Reconcile => {
                self.reconcile_timer = None;
                if !self.running {
                    return;
                }
                for peer in self.reconciliation.on_reconciliation_due() {
                    self.initiate_reconciliation(peer, ctx);
                }
                let interval = self.config.settings.reconciliation_interval();
                self.reconcile_timer = Some(ctx.schedule(interval, NodeTimer::Reconcile));
            }
            NodeTimer::RotateStems => {
                self.rotate_timer = None;
                if !self.running {
                    return;
                }
                self.router.rotate(&mut self.rng);
                let interval = self.config.settings.stem_rotation();
                self.rotate_timer = Some(ctx.schedule(interval, NodeTimer::RotateStems));
            }
            NodeTimer::Embargo(hash) => {
                self.embargo.remove(&hash);
                let stem_phase = self
                    .known
                    .get(&hash)
                    .map(|r| r.phase == TxPhase::Stem)
                    .unwrap_or(false);
                if stem_phase {
                    debug!("node {}: embargo expired for {}", self.id, hash);
                    if let Some(peer) = self.stemmed_to.remove(&hash) {
                        self.note_lost_stem(peer, ctx.now());
                    }
                    self.fluff(hash, ctx);
                }
            }
            NodeTimer::RequestTimeout(hash) => self.on_request_timeout(hash, ctx),
        }
    }

    fn on_request_timeout(&mut self, hash: TxHash, ctx: &mut dyn RelayContext) {
        let Some(mut request) = self.requests.remove(&hash) else {
            return;
        };
        self.stats.borrow_mut().request_timeouts += 1;
        self.event_sink.log(
            ctx.now(),
            self.id,
            Event::RequestTimedOut {
                tx: hash,
                peer: request.peer,
            },
        );

        let next = self
            .peers_knowing(hash)
            .iter()
            .copied()
            .find(|&p| self.peers.contains(p) && !request.tried.contains(&p));
        match next {
            Some(peer) => {
                request.tried.push(peer);
                self.send(peer, Message::GetData { hashes: vec![hash] }, ctx);
                self.count_get_data(peer);
                let timeout = self.config.settings.request_timeout();
                request.handle = ctx.schedule(timeout, NodeTimer::RequestTimeout(hash));
                request.peer = peer;
                self.requests.insert(hash, request);
            }
            None => self.forget_if_missing(hash),
        }
    }

    // ========================================================================
    // Local transactions
    // ========================================================================

    /// Create a transaction here and announce it
    pub fn create_transaction(&mut self, ctx: &mut dyn RelayContext) -> TxHash {
        let now = ctx.now();
        let hash = self.derive_hash(now);
        self.tx_counter += 1;
        self.inject_transaction(
            Transaction {
                hash,
                created_at: now,
                origin: self.id,
            },
            ctx,
        );
        hash
    }

    /// Treat `tx` as created by this node
    pub fn inject_transaction(&mut self, tx: Transaction, ctx: &mut dyn RelayContext) {
        if self.known.contains_key(&tx.hash) {
            return;
        }
        let phase = if self.config.settings.protocol == ProtocolType::DandelionMapping {
            TxPhase::Stem
        } else {
            TxPhase::Fluff
        };
        self.known.insert(
            tx.hash,
            TxRecord {
                hop: 0,
                first_from: None,
                first_seen: ctx.now(),
                phase,
                payload: Some(tx),
            },
        );
        self.stats.borrow_mut().tx_created += 1;
        self.event_sink
            .log(ctx.now(), self.id, Event::TxCreated { tx: tx.hash });
        self.relay(tx.hash, ctx);
    }

    fn derive_hash(&self, now: SimTime) -> TxHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.id.to_le_bytes());
        hasher.update(&self.tx_counter.to_le_bytes());
        hasher.update(&now.to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    fn schedule_generation(&mut self, ctx: &mut dyn RelayContext) {
        if let Some(delay) = self.generator.next_delay(ctx.now(), &mut self.rng) {
            self.generate_timer = Some(ctx.schedule(delay, NodeTimer::GenerateTx));
        }
    }

    // ========================================================================
    // Announcing
    // ========================================================================

    fn candidates(&self, hash: TxHash, from: Option<PeerId>) -> Vec<Candidate> {
        let knowing = self.peers_knowing(hash);
        self.peers
            .iter()
            .filter(|e| Some(e.id) != from)
            .filter(|e| !knowing.contains(&e.id))
            .map(|e| Candidate {
                peer: e.id,
                outbound: e.outbound,
            })
            .collect()
    }

    fn relay(&mut self, hash: TxHash, ctx: &mut dyn RelayContext) {
        let Some(record) = self.known.get(&hash) else {
            return;
        };
        let hop = record.hop;
        let from = record.first_from;
        let stem = record.phase == TxPhase::Stem;
        let candidates = self.candidates(hash, from);
        let suspected: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|e| e.suspected_black_hole)
            .map(|e| e.id)
            .collect();

        let decision = {
            let mut announce = AnnounceContext {
                tx: hash,
                hop,
                from,
                stem,
                candidates: &candidates,
                ranker: &self.ranker,
                filters: &self.filters,
                router: &self.router,
                rng: &mut self.rng,
            };
            let decision = self.strategy.decide(&mut announce);
            if decision.stem && decision.direct.iter().any(|p| suspected.contains(p)) {
                Flood.decide(&mut announce)
            } else {
                decision
            }
        };
        debug!(
            "node {}: {} tx {} hop {} -> direct {:?} stem {} reconcile {} filtered {}",
            self.id,
            self.strategy.name(),
            hash,
            hop,
            decision.direct,
            decision.stem,
            decision.reconcile.len(),
            decision.filtered
        );
        self.apply(hash, hop, decision, ctx);
    }

    /// Switch a stem transaction to fluff and flood it
    fn fluff(&mut self, hash: TxHash, ctx: &mut dyn RelayContext) {
        let Some(record) = self.known.get_mut(&hash) else {
            return;
        };
        if record.phase == TxPhase::Fluff {
            return;
        }
        record.phase = TxPhase::Fluff;
        let hop = record.hop;
        let from = record.first_from;
        let has_payload = record.payload.is_some();

        if let Some(handle) = self.embargo.remove(&hash) {
            ctx.cancel(handle);
        }
        self.stemmed_to.remove(&hash);
        self.event_sink.log(ctx.now(), self.id, Event::Fluffed { tx: hash });

        // without the payload the flood happens once it arrives
        if !has_payload || self.config.mode == RelayMode::BlackHole {
            return;
        }
        let candidates = self.candidates(hash, from);
        let decision = {
            let mut announce = AnnounceContext {
                tx: hash,
                hop,
                from,
                stem: false,
                candidates: &candidates,
                ranker: &self.ranker,
                filters: &self.filters,
                router: &self.router,
                rng: &mut self.rng,
            };
            Flood.decide(&mut announce)
        };
        self.apply(hash, hop, decision, ctx);
    }

    fn apply(&mut self, hash: TxHash, hop: u32, decision: AnnounceDecision, ctx: &mut dyn RelayContext) {
        let now = ctx.now();
        let item = InvItem { hash, hop: hop + 1 };

        if decision.stem {
            if let Some(record) = self.known.get_mut(&hash) {
                record.phase = TxPhase::Stem;
            }
            for peer in decision.direct {
                self.mark_known_by(hash, peer);
                self.send(
                    peer,
                    Message::Inv {
                        items: vec![item],
                        stem: true,
                    },
                    ctx,
                );
                self.note_sent(peer, 1, &[item], now);
                self.stemmed_to.insert(hash, peer);
                self.event_sink
                    .log(now, self.id, Event::StemRelayed { tx: hash, to: peer });
            }
            if !self.embargo.contains_key(&hash) {
                let delay = self.config.settings.stem_embargo();
                let handle = ctx.schedule(delay, NodeTimer::Embargo(hash));
                self.embargo.insert(hash, handle);
            }
        } else {
            let was_stem = self
                .known
                .get(&hash)
                .map(|r| r.phase == TxPhase::Stem)
                .unwrap_or(false);
            if was_stem {
                if let Some(record) = self.known.get_mut(&hash) {
                    record.phase = TxPhase::Fluff;
                }
                if let Some(handle) = self.embargo.remove(&hash) {
                    ctx.cancel(handle);
                }
                self.stemmed_to.remove(&hash);
                self.event_sink.log(now, self.id, Event::Fluffed { tx: hash });
            }
            for peer in decision.direct {
                self.queue_inv(peer, item, ctx);
            }
        }

        for peer in decision.reconcile {
            if self.reconciliation.add(peer, hash, hop + 1) {
                debug!("node {}: reconciliation set for {} is full", self.id, peer);
                self.initiate_reconciliation(peer, ctx);
            }
        }

        if decision.filtered > 0 {
            self.stats.borrow_mut().ignored_filters += decision.filtered as u64;
            self.event_sink.log(
                now,
                self.id,
                Event::FilteredOut {
                    tx: hash,
                    skipped: decision.filtered,
                },
            );
        }
    }

    fn queue_inv(&mut self, peer: PeerId, item: InvItem, ctx: &mut dyn RelayContext) {
        let Some(entry) = self.peers.get_mut(peer) else {
            return;
        };
        entry.queue_inv(item);
        let outbound = entry.outbound;
        let armed = entry.trickle_timer.is_some();

        let interval = self.config.settings.inv_interval();
        if outbound {
            if !armed {
                let delay = poisson_delay(interval / 2, &mut self.rng);
                let handle = ctx.schedule(delay, NodeTimer::TrickleOutbound(peer));
                if let Some(entry) = self.peers.get_mut(peer) {
                    entry.trickle_timer = Some(handle);
                }
            }
        } else if self.inbound_trickle.is_none() {
            let delay = poisson_delay(interval, &mut self.rng);
            self.inbound_trickle = Some(ctx.schedule(delay, NodeTimer::TrickleInbound));
        }
    }

    /// Send everything queued for `peer` in one INV
    fn flush(&mut self, peer: PeerId, ctx: &mut dyn RelayContext) {
        let Some(entry) = self.peers.get_mut(peer) else {
            return;
        };
        let items = entry.take_pending();
        if items.is_empty() {
            return;
        }
        let count = items.len() as u64;
        for item in &items {
            self.mark_known_by(item.hash, peer);
        }
        self.send(
            peer,
            Message::Inv {
                items: items.clone(),
                stem: false,
            },
            ctx,
        );
        self.note_sent(peer, count, &items, ctx.now());
        self.event_sink.log(
            ctx.now(),
            self.id,
            Event::InvFlushed {
                peer,
                items: items.len(),
            },
        );
    }

    // Counters for INV items sent to `peer`, and the first-spy delay of own transactions
    fn note_sent(&mut self, peer: PeerId, count: u64, items: &[InvItem], now: SimTime) {
        if count == 0 {
            return;
        }
        self.stats.borrow_mut().inv_items_sent += count;
        self.ranker.record_sent(peer, count);
        let Some(entry) = self.peers.get_mut(peer) else {
            return;
        };
        entry.stats.inv_items_sent += count;
        if entry.mode != RelayMode::Spy {
            return;
        }
        for item in items {
            let own = self
                .known
                .get(&item.hash)
                .filter(|r| r.first_from.is_none())
                .map(|r| r.first_seen);
            if let Some(created) = own {
                if self.reached_spy.insert(item.hash) {
                    self.stats
                        .borrow_mut()
                        .first_spy_delays
                        .push(now.saturating_sub(created));
                }
            }
        }
    }

    // An embargo expired on a stem handed to `peer`: the stem never came back fluffed
    fn note_lost_stem(&mut self, peer: PeerId, now: SimTime) {
        let detect = self.config.settings.bh_detection;
        let Some(entry) = self.peers.get_mut(peer) else {
            return;
        };
        entry.stats.stems_lost += 1;
        if !detect
            || entry.suspected_black_hole
            || entry.stats.stems_lost < BH_DETECTION_MIN_LOST
            || entry.stats.inv_received() > 0
        {
            return;
        }
        entry.suspected_black_hole = true;
        self.stats.borrow_mut().black_holes_detected += 1;
        self.event_sink
            .log(now, self.id, Event::BlackHoleSuspected { peer });
        debug!("node {}: peer {} suspected black hole", self.id, peer);
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    fn initiate_reconciliation(&mut self, peer: PeerId, ctx: &mut dyn RelayContext) {
        if !self.peers.contains(peer) {
            return;
        }
        let request = self.reconciliation.build_request(peer);
        for item in &request.items {
            self.mark_known_by(item.hash, peer);
        }
        self.send(peer, Message::ReconcileRequest(request), ctx);
    }

    // ========================================================================
    // Filters
    // ========================================================================

    /// Re-partition the filter space over the current peers
    fn validate_node_filters(&mut self, ctx: &mut dyn RelayContext) {
        let peers = self.peers.ids();
        let windows = FilterManager::partition(&peers, self.config.settings.filter_overlap);

        match self.config.settings.protocol {
            ProtocolType::OutgoingFilters => {
                for (peer, window) in windows {
                    self.filters.set_window(peer, window.begin, window.end);
                }
            }
            ProtocolType::FiltersOnIncomingLinks => {
                for (peer, window) in windows {
                    match self.requested_filters.insert(peer, window) {
                        None => self.send(
                            peer,
                            Message::FilterRequest {
                                begin: window.begin,
                                end: window.end,
                            },
                            ctx,
                        ),
                        Some(previous) => {
                            if previous.begin != window.begin {
                                self.send(
                                    peer,
                                    Message::UpdateFilterBegin {
                                        value: window.begin,
                                    },
                                    ctx,
                                );
                            }
                            if previous.end != window.end {
                                self.send(peer, Message::UpdateFilterEnd { value: window.end }, ctx);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn request(&mut self, from: PeerId, hashes: Vec<TxHash>, ctx: &mut dyn RelayContext) {
        let timeout = self.config.settings.request_timeout();
        for &hash in &hashes {
            let handle = ctx.schedule(timeout, NodeTimer::RequestTimeout(hash));
            self.requests.insert(
                hash,
                PendingRequest {
                    peer: from,
                    handle,
                    tried: vec![from],
                },
            );
        }
        self.send(from, Message::GetData { hashes }, ctx);
        self.count_get_data(from);
    }

    fn count_get_data(&mut self, peer: PeerId) {
        self.stats.borrow_mut().get_data_sent += 1;
        if let Some(entry) = self.peers.get_mut(peer) {
            entry.stats.get_data_sent += 1;
        }
    }

    fn mark_known_by(&mut self, hash: TxHash, peer: PeerId) {
        let knowing = self.peers_know_tx.entry(hash).or_default();
        if !knowing.contains(&peer) {
            knowing.push(peer);
        }
    }

    // A record without payload is dropped so a later announcement counts as new
    fn forget_if_missing(&mut self, hash: TxHash) {
        let missing = self
            .known
            .get(&hash)
            .map(|r| r.payload.is_none())
            .unwrap_or(false);
        if missing {
            self.known.remove(&hash);
        }
    }

    fn send(&mut self, peer: PeerId, message: Message, ctx: &mut dyn RelayContext) {
        let Some(entry) = self.peers.get(peer) else {
            return;
        };
        let size = message.wire_size();
        let rate = self.config.link.upload_mbps.min(entry.download_mbps);
        {
            let mut stats = self.stats.borrow_mut();
            stats.messages_sent += 1;
            stats.bytes_sent += size as u64;
        }
        ctx.send(peer, message, transmit_millis(size, rate));
    }
}
