//! Event logging for simulator

use tx_relay::{Event, EventSink, PeerId, SimTime};

/// Logging event sink that outputs events to console
pub struct LoggingEventSink {
    enabled: bool,
}

impl LoggingEventSink {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl EventSink for LoggingEventSink {
    fn log(&mut self, time: SimTime, node: PeerId, event: Event) {
        if !self.enabled {
            return;
        }

        match event {
            Event::TxCreated { tx } => {
                println!("{} new: n:{} tx:{:x}", time, node, tx & 0xFFFF);
            }
            Event::TxAnnounced {
                tx,
                from,
                hop,
                reconciled,
            } => {
                println!(
                    "{} inv: n:{} tx:{:x} from:{} hop:{}{}",
                    time,
                    node,
                    tx & 0xFFFF,
                    from,
                    hop,
                    if reconciled { " (recon)" } else { "" }
                );
            }
            Event::DuplicateAnnouncement { tx, from } => {
                println!("{} dup: n:{} tx:{:x} from:{}", time, node, tx & 0xFFFF, from);
            }
            Event::TxReceived { tx, from, latency } => {
                println!(
                    "{} recv: n:{} tx:{:x} from:{} latency:{}ms",
                    time,
                    node,
                    tx & 0xFFFF,
                    from,
                    latency
                );
            }
            Event::InvFlushed { peer, items } => {
                println!("{} flush: n:{} -> {} items:{}", time, node, peer, items);
            }
            Event::StemRelayed { tx, to } => {
                println!("{} stem: n:{} tx:{:x} -> {}", time, node, tx & 0xFFFF, to);
            }
            Event::Fluffed { tx } => {
                println!("{} fluff: n:{} tx:{:x}", time, node, tx & 0xFFFF);
            }
            Event::FilteredOut { tx, skipped } => {
                println!(
                    "{} filter: n:{} tx:{:x} skipped:{}",
                    time,
                    node,
                    tx & 0xFFFF,
                    skipped
                );
            }
            Event::ReconciliationCompleted {
                peer,
                actual_diff,
                estimated_diff,
            } => {
                println!(
                    "{} recon: n:{} with:{} diff:{} est:{}",
                    time, node, peer, actual_diff, estimated_diff
                );
            }
            Event::RequestTimedOut { tx, peer } => {
                println!("{} timeout: n:{} tx:{:x} peer:{}", time, node, tx & 0xFFFF, peer);
            }
            Event::BlackHoleSuspected { peer } => {
                println!("{} black-hole: n:{} suspects:{}", time, node, peer);
            }
            Event::PeerConnected { peer, outbound } => {
                println!(
                    "{} connect: n:{} {} {}",
                    time,
                    node,
                    if outbound { "->" } else { "<-" },
                    peer
                );
            }
            Event::PeerClosed { peer, duration } => {
                println!("{} close: n:{} peer:{} after:{}ms", time, node, peer, duration);
            }
        }
    }
}
