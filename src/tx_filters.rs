use hashbrown::HashMap;

use crate::tx_interface::{PeerId, TxHash, FILTER_BASE_NUMBERING};

/// Filter value a transaction is matched against
pub fn filter_value(hash: TxHash) -> u32 {
    (hash % FILTER_BASE_NUMBERING as u64) as u32
}

/// Half-open window `[begin, end)` over the filter space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterWindow {
    pub begin: u32,
    pub end: u32,
}

impl FilterWindow {
    pub const FULL: FilterWindow = FilterWindow {
        begin: 0,
        end: FILTER_BASE_NUMBERING,
    };

    pub fn contains(&self, value: u32) -> bool {
        value >= self.begin && value < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }
}

/// Per-peer filter windows. A peer without a window accepts everything.
#[derive(Debug, Default)]
pub struct FilterManager {
    windows: HashMap<PeerId, FilterWindow>,
}

impl FilterManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self, peer: PeerId, value: u32) -> bool {
        self.window(peer).contains(value)
    }

    pub fn window(&self, peer: PeerId) -> FilterWindow {
        self.windows.get(&peer).copied().unwrap_or(FilterWindow::FULL)
    }

    pub fn has_window(&self, peer: PeerId) -> bool {
        self.windows.contains_key(&peer)
    }

    pub fn set_window(&mut self, peer: PeerId, begin: u32, end: u32) {
        let begin = begin.min(FILTER_BASE_NUMBERING);
        let end = end.min(FILTER_BASE_NUMBERING);
        self.windows.insert(peer, clamp(begin, end));
    }

    pub fn update_begin(&mut self, peer: PeerId, value: u32) {
        let end = self.window(peer).end;
        self.set_window(peer, value, end);
    }

    /// `end < begin` leaves the peer with an empty window
    pub fn update_end(&mut self, peer: PeerId, value: u32) {
        let begin = self.window(peer).begin;
        self.set_window(peer, begin, value);
    }

    pub fn remove(&mut self, peer: PeerId) {
        self.windows.remove(&peer);
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Split the filter space into one contiguous slice per peer, in the given order.
    ///
    /// Each slice is widened by `overlap` (fraction of a slice) on both sides and
    /// clamped to the base range. The last peer absorbs the remainder, so the union
    /// always covers `[0, FILTER_BASE_NUMBERING)`.
    pub fn partition(peers: &[PeerId], overlap: f64) -> Vec<(PeerId, FilterWindow)> {
        if peers.is_empty() {
            return Vec::new();
        }
        let n = peers.len() as u32;
        let slice = FILTER_BASE_NUMBERING / n;
        let widen = (slice as f64 * overlap.clamp(0.0, 1.0)).round() as u32;

        peers
            .iter()
            .enumerate()
            .map(|(i, &peer)| {
                let i = i as u32;
                let begin = i * slice;
                let end = if i + 1 == n {
                    FILTER_BASE_NUMBERING
                } else {
                    (i + 1) * slice
                };
                let window = FilterWindow {
                    begin: begin.saturating_sub(widen),
                    end: (end + widen).min(FILTER_BASE_NUMBERING),
                };
                (peer, window)
            })
            .collect()
    }
}

fn clamp(begin: u32, end: u32) -> FilterWindow {
    if end < begin {
        FilterWindow { begin, end: begin }
    } else {
        FilterWindow { begin, end }
    }
}
