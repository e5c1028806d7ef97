use indexmap::IndexMap;

use crate::tx_interface::{InvItem, PeerId, RelayMode, SimTime, TimerHandle};
use crate::tx_stats::PeerSummary;

/// Per-connection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStatistics {
    pub useful_inv_received: u64,
    pub useless_inv_received: u64,
    pub inv_items_sent: u64,
    pub get_data_received: u64,
    pub get_data_sent: u64,
    /// Stems handed to this peer whose embargo expired before we heard them fluffed
    pub stems_lost: u64,
    pub connected_since: SimTime,
    pub connection_length: SimTime,
}

impl PeerStatistics {
    pub fn inv_received(&self) -> u64 {
        self.useful_inv_received + self.useless_inv_received
    }
}

#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub id: PeerId,
    /// We opened the connection
    pub outbound: bool,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    /// Mode the peer declared, Regular until told otherwise
    pub mode: RelayMode,
    pub stats: PeerStatistics,
    /// Items waiting for the next trickle flush
    pub pending_inv: Vec<InvItem>,
    /// Outbound peers only; inbound peers share the node-level timer
    pub trickle_timer: Option<TimerHandle>,
    pub suspected_black_hole: bool,
}

impl PeerEntry {
    pub fn new(id: PeerId, outbound: bool, download_mbps: f64, upload_mbps: f64, now: SimTime) -> Self {
        Self {
            id,
            outbound,
            download_mbps,
            upload_mbps,
            mode: RelayMode::Regular,
            stats: PeerStatistics {
                connected_since: now,
                ..Default::default()
            },
            pending_inv: Vec::new(),
            trickle_timer: None,
            suspected_black_hole: false,
        }
    }

    /// Queue an item unless it is already waiting
    pub fn queue_inv(&mut self, item: InvItem) -> bool {
        if self.pending_inv.iter().any(|i| i.hash == item.hash) {
            return false;
        }
        self.pending_inv.push(item);
        true
    }

    pub fn take_pending(&mut self) -> Vec<InvItem> {
        std::mem::take(&mut self.pending_inv)
    }

    /// Close the connection at `now` and produce its summary
    pub fn close(&mut self, now: SimTime) -> PeerSummary {
        self.stats.connection_length = now.saturating_sub(self.stats.connected_since);
        PeerSummary {
            peer: self.id,
            outbound: self.outbound,
            mode: self.mode,
            useful_inv_received: self.stats.useful_inv_received,
            useless_inv_received: self.stats.useless_inv_received,
            inv_items_sent: self.stats.inv_items_sent,
            connection_length: self.stats.connection_length,
        }
    }
}

/// Connected peers in connection order
#[derive(Debug, Default)]
pub struct PeerTable {
    entries: IndexMap<PeerId, PeerEntry>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: PeerEntry) {
        self.entries.insert(entry.id, entry);
    }

    pub fn remove(&mut self, peer: PeerId) -> Option<PeerEntry> {
        self.entries.shift_remove(&peer)
    }

    pub fn get(&self, peer: PeerId) -> Option<&PeerEntry> {
        self.entries.get(&peer)
    }

    pub fn get_mut(&mut self, peer: PeerId) -> Option<&mut PeerEntry> {
        self.entries.get_mut(&peer)
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.entries.contains_key(&peer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.entries.keys().copied().collect()
    }

    pub fn outbound_ids(&self) -> Vec<PeerId> {
        self.entries
            .values()
            .filter(|e| e.outbound)
            .map(|e| e.id)
            .collect()
    }

    pub fn inbound_ids(&self) -> Vec<PeerId> {
        self.entries
            .values()
            .filter(|e| !e.outbound)
            .map(|e| e.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerEntry> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerEntry> {
        self.entries.values_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_inv_dedupes() {
        let mut entry = PeerEntry::new(1, true, 50.0, 10.0, 0);
        assert!(entry.queue_inv(InvItem { hash: 5, hop: 1 }));
        assert!(!entry.queue_inv(InvItem { hash: 5, hop: 2 }));
        assert!(entry.queue_inv(InvItem { hash: 6, hop: 1 }));

        assert_eq!(entry.take_pending().len(), 2);
        assert!(entry.pending_inv.is_empty());
    }

    #[test]
    fn test_close_records_connection_length() {
        let mut entry = PeerEntry::new(1, false, 50.0, 10.0, 1_000);
        entry.stats.useful_inv_received = 3;
        entry.mode = RelayMode::Spy;

        let summary = entry.close(4_500);
        assert_eq!(summary.connection_length, 3_500);
        assert_eq!(summary.useful_inv_received, 3);
        assert_eq!(summary.mode, RelayMode::Spy);
        assert!(!summary.outbound);
    }

    #[test]
    fn test_table_keeps_connection_order() {
        let mut table = PeerTable::new();
        for (id, outbound) in [(3, true), (1, false), (2, true)] {
            table.insert(PeerEntry::new(id, outbound, 50.0, 10.0, 0));
        }
        assert_eq!(table.ids(), vec![3, 1, 2]);
        assert_eq!(table.outbound_ids(), vec![3, 2]);
        assert_eq!(table.inbound_ids(), vec![1]);

        table.remove(1);
        assert_eq!(table.ids(), vec![3, 2]);
        assert!(!table.contains(1));
    }
}
