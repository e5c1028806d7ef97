// all the same numeric type of some size to allow casting/interop
pub type PeerId = u64;
pub type TxHash = u64;

/// Virtual simulation time in milliseconds
pub type SimTime = u64;
pub type TimerHandle = u64;

pub const MILLIS_PER_SECOND: SimTime = 1000;

// Filter value of a transaction is `hash % FILTER_BASE_NUMBERING`
pub const FILTER_BASE_NUMBERING: u32 = 1000;

// A reconciliation set this large forces an early round with that peer
pub const RECON_MAX_SET_SIZE: usize = 1600;

pub const DANDELION_ROTATION_SECONDS: u64 = 1000;

/// Base of the set-difference estimator, scaled by `q_estimation_multiplier`
pub const A_ESTIMATOR: f64 = 0.04;

/// Number of emitter nodes the network-wide emission rates are shared among
pub const TX_EMITTERS: u32 = 1000;

pub const EMISSION_WINDOW_SECONDS: u64 = 30;

/// Network-wide transaction rates (tx/s), one entry per emission window
pub const TRANSACTION_RATES: [f64; 11] = [9.0, 2.66, 7.0, 2.033, 14.0, 14.0, 3.6, 2.45, 2.067, 9.0, 2.067];

// Expired stem embargoes through a silent peer before it is suspected to be a black hole
pub const BH_DETECTION_MIN_LOST: u64 = 3;

// Modeled message sizes (bytes). The header covers the message header plus TCP/IP/Ethernet.
pub const MESSAGE_HEADER_BYTES: usize = 90;
pub const COUNT_BYTES: usize = 4;
pub const INVENTORY_BYTES: usize = 36;
pub const TX_PAYLOAD_BYTES: usize = 250;
pub const SKETCH_ELEMENT_BYTES: usize = 4;

pub fn seconds_to_millis(seconds: f64) -> SimTime {
    if seconds <= 0.0 {
        0
    } else {
        (seconds * MILLIS_PER_SECOND as f64).round() as SimTime
    }
}

/// Role a node plays in the simulated network
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    #[default]
    Regular,
    TxEmitter,
    /// Receives everything, relays nothing
    BlackHole,
    /// Relays like a regular node but records who announced each transaction first
    Spy,
}

/// Transaction payload as carried by `Message::Tx`
///
/// `origin` is simulation ground truth (the creating node); it is only read by
/// spy statistics, never by relay decisions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub hash: TxHash,
    pub created_at: SimTime,
    pub origin: PeerId,
}

/// One announced transaction. `hop` is the hop count the receiver records.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct InvItem {
    pub hash: TxHash,
    pub hop: u32,
}

/// Set summary sent by the initiating side of a reconciliation round
#[derive(Clone, Debug, PartialEq)]
pub struct ReconcileRequest {
    pub set_size: usize,
    // stands in for a sketch: the responder decodes the exact set
    pub items: Vec<InvItem>,
}

/// Responder's answer: what the initiator is missing, plus both difference metrics
#[derive(Clone, Debug, PartialEq)]
pub struct ReconcileResponse {
    pub missing: Vec<InvItem>,
    pub actual_diff: usize,
    pub estimated_diff: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Inv {
        items: Vec<InvItem>,
        stem: bool,
    },
    GetData {
        hashes: Vec<TxHash>,
    },
    Tx {
        tx: Transaction,
    },
    /// "only announce to me transactions whose filter value is in [begin, end)"
    FilterRequest {
        begin: u32,
        end: u32,
    },
    UpdateFilterBegin {
        value: u32,
    },
    UpdateFilterEnd {
        value: u32,
    },
    Mode {
        mode: RelayMode,
    },
    ReconcileRequest(ReconcileRequest),
    ReconcileResponse(ReconcileResponse),
}

impl Message {
    /// Modeled size on the wire, used for bandwidth accounting only
    pub fn wire_size(&self) -> usize {
        match self {
            Message::Inv { items, .. } => {
                MESSAGE_HEADER_BYTES + COUNT_BYTES + items.len() * INVENTORY_BYTES
            }
            Message::GetData { hashes } => {
                MESSAGE_HEADER_BYTES + COUNT_BYTES + hashes.len() * INVENTORY_BYTES
            }
            Message::Tx { .. } => MESSAGE_HEADER_BYTES + TX_PAYLOAD_BYTES,
            Message::FilterRequest { .. } => MESSAGE_HEADER_BYTES + 2 * COUNT_BYTES,
            Message::UpdateFilterBegin { .. } | Message::UpdateFilterEnd { .. } => {
                MESSAGE_HEADER_BYTES + COUNT_BYTES
            }
            Message::Mode { .. } => MESSAGE_HEADER_BYTES + 1,
            // set size + estimator parameter
            Message::ReconcileRequest(_) => MESSAGE_HEADER_BYTES + 2 * COUNT_BYTES,
            // sketch sized by the estimate, followed by INVs for what the initiator lacks
            Message::ReconcileResponse(response) => {
                MESSAGE_HEADER_BYTES
                    + COUNT_BYTES
                    + response.estimated_diff * SKETCH_ELEMENT_BYTES
                    + response.missing.len() * INVENTORY_BYTES
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Inv { .. } => "inv",
            Message::GetData { .. } => "get_data",
            Message::Tx { .. } => "tx",
            Message::FilterRequest { .. } => "filter_request",
            Message::UpdateFilterBegin { .. } => "update_filter_begin",
            Message::UpdateFilterEnd { .. } => "update_filter_end",
            Message::Mode { .. } => "mode",
            Message::ReconcileRequest(_) => "reconcile_request",
            Message::ReconcileResponse(_) => "reconcile_response",
        }
    }
}

/// Timers a node asks the scheduler for. Delivered back through `RelayNode::handle_timer`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeTimer {
    GenerateTx,
    /// Poisson trickle flush for one outbound peer
    TrickleOutbound(PeerId),
    /// Shared Poisson trickle flush for all inbound peers
    TrickleInbound,
    Reconcile,
    RotateStems,
    /// Stem-phase fail-safe: fluff if the transaction was not seen fluffed in time
    Embargo(TxHash),
    RequestTimeout(TxHash),
}

/// Download/upload speed of a link end, in megabits per second
#[derive(Copy, Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LinkSpeeds {
    pub download_mbps: f64,
    pub upload_mbps: f64,
}

impl Default for LinkSpeeds {
    fn default() -> Self {
        Self {
            download_mbps: 50.0,
            upload_mbps: 10.0,
        }
    }
}

/// Milliseconds needed to push `bytes` through a link of `mbps`
pub fn transmit_millis(bytes: usize, mbps: f64) -> SimTime {
    if mbps <= 0.0 {
        return 0;
    }
    let bits = (bytes * 8) as f64;
    (bits / (mbps * 1000.0)).ceil() as SimTime
}

// ============================================================================
// Scheduler / channel seam
// ============================================================================

/// Everything a node needs from the world around it: virtual time, timers and channels.
///
/// Implemented by the network harness (`tx_network::SimNetwork`) and by test doubles.
pub trait RelayContext {
    fn now(&self) -> SimTime;

    /// Fire `timer` on this node after `delay` milliseconds
    fn schedule(&mut self, delay: SimTime, timer: NodeTimer) -> TimerHandle;

    /// Cancelling a fired or already cancelled handle is a no-op
    fn cancel(&mut self, handle: TimerHandle);

    /// Send over the open channel to `to`; `transmit_delay` is the serialization time
    /// the sender computed from the message size and link speeds
    fn send(&mut self, to: PeerId, message: Message, transmit_delay: SimTime);
}

// ============================================================================
// Event Logging System
// ============================================================================

/// Events emitted by relay nodes for debugging and analysis
#[derive(Debug, Clone)]
pub enum Event {
    TxCreated {
        tx: TxHash,
    },
    /// First sighting of a transaction
    TxAnnounced {
        tx: TxHash,
        from: PeerId,
        hop: u32,
        reconciled: bool,
    },
    DuplicateAnnouncement {
        tx: TxHash,
        from: PeerId,
    },
    TxReceived {
        tx: TxHash,
        from: PeerId,
        latency: SimTime,
    },
    InvFlushed {
        peer: PeerId,
        items: usize,
    },
    StemRelayed {
        tx: TxHash,
        to: PeerId,
    },
    Fluffed {
        tx: TxHash,
    },
    FilteredOut {
        tx: TxHash,
        skipped: usize,
    },
    ReconciliationCompleted {
        peer: PeerId,
        actual_diff: usize,
        estimated_diff: usize,
    },
    RequestTimedOut {
        tx: TxHash,
        peer: PeerId,
    },
    BlackHoleSuspected {
        peer: PeerId,
    },
    PeerConnected {
        peer: PeerId,
        outbound: bool,
    },
    PeerClosed {
        peer: PeerId,
        duration: SimTime,
    },
}

/// Trait for consuming events from relay nodes
pub trait EventSink {
    fn log(&mut self, time: SimTime, node: PeerId, event: Event);
}

/// No-op event sink for production use (zero overhead)
pub struct NoOpSink;

impl EventSink for NoOpSink {
    #[inline(always)]
    fn log(&mut self, _time: SimTime, _node: PeerId, _event: Event) {
        // Intentionally empty - compiler should optimize this away
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inv_wire_size_grows_per_item() {
        let one = Message::Inv {
            items: vec![InvItem { hash: 1, hop: 1 }],
            stem: false,
        };
        let three = Message::Inv {
            items: vec![
                InvItem { hash: 1, hop: 1 },
                InvItem { hash: 2, hop: 1 },
                InvItem { hash: 3, hop: 1 },
            ],
            stem: false,
        };
        assert_eq!(one.wire_size(), 90 + 4 + 36);
        assert_eq!(three.wire_size() - one.wire_size(), 2 * INVENTORY_BYTES);
    }

    #[test]
    fn test_reconcile_response_charges_estimate() {
        let response = Message::ReconcileResponse(ReconcileResponse {
            missing: vec![],
            actual_diff: 0,
            estimated_diff: 10,
        });
        assert_eq!(response.wire_size(), 90 + 4 + 10 * SKETCH_ELEMENT_BYTES);
    }

    #[test]
    fn test_transmit_millis() {
        // 1250 bytes = 10_000 bits over 10 Mbps = 1 ms
        assert_eq!(transmit_millis(1250, 10.0), 1);
        assert_eq!(transmit_millis(1251, 10.0), 2);
        assert_eq!(transmit_millis(100, 0.0), 0);
    }

    #[test]
    fn test_seconds_to_millis() {
        assert_eq!(seconds_to_millis(2.5), 2500);
        assert_eq!(seconds_to_millis(-1.0), 0);
    }
}
