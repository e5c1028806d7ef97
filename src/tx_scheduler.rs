// Virtual-time event queue
//
// Min-heap keyed by (time, sequence): events at the same instant pop in the order
// they were scheduled. Cancellation is lazy; cancelled entries are skipped on pop.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use hashbrown::HashSet;

use crate::tx_interface::{SimTime, TimerHandle};

struct Entry<T> {
    at: SimTime,
    seq: u64,
    event: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap is a max-heap
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct EventQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    pending: HashSet<TimerHandle>,
    next_seq: u64,
    now: SimTime,
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashSet::new(),
            next_seq: 0,
            now: 0,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule at an absolute time. Times in the past fire at `now`.
    pub fn schedule_at(&mut self, at: SimTime, event: T) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            at: at.max(self.now),
            seq,
            event,
        });
        self.pending.insert(seq);
        seq
    }

    pub fn schedule(&mut self, delay: SimTime, event: T) -> TimerHandle {
        self.schedule_at(self.now.saturating_add(delay), event)
    }

    /// No-op for handles that already fired or were cancelled
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.pending.remove(&handle)
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.pending.contains(&handle)
    }

    /// Time of the next live event
    pub fn peek_time(&mut self) -> Option<SimTime> {
        self.discard_cancelled();
        self.heap.peek().map(|e| e.at)
    }

    /// Pop the next live event and advance the clock to it
    pub fn pop(&mut self) -> Option<(SimTime, T)> {
        self.discard_cancelled();
        let entry = self.heap.pop()?;
        self.pending.remove(&entry.seq);
        self.now = entry.at;
        Some((entry.at, entry.event))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn discard_cancelled(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.pending.contains(&top.seq) {
                break;
            }
            self.heap.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_in_time_order() {
        let mut queue = EventQueue::new();
        queue.schedule(30, "c");
        queue.schedule(10, "a");
        queue.schedule(20, "b");

        assert_eq!(queue.pop(), Some((10, "a")));
        assert_eq!(queue.pop(), Some((20, "b")));
        assert_eq!(queue.now(), 20);
        assert_eq!(queue.pop(), Some((30, "c")));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_ties_are_fifo() {
        let mut queue = EventQueue::new();
        for i in 0..10 {
            queue.schedule(5, i);
        }
        let order: Vec<i32> = std::iter::from_fn(|| queue.pop().map(|(_, e)| e)).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_cancelled_never_fires() {
        let mut queue = EventQueue::new();
        let a = queue.schedule(10, "a");
        queue.schedule(20, "b");

        assert!(queue.cancel(a));
        assert!(!queue.cancel(a));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek_time(), Some(20));
        assert_eq!(queue.pop(), Some((20, "b")));
    }

    #[test]
    fn test_cancel_after_fire_is_noop() {
        let mut queue = EventQueue::new();
        let a = queue.schedule(10, "a");
        queue.pop();
        assert!(!queue.cancel(a));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_schedule_relative_to_now() {
        let mut queue = EventQueue::new();
        queue.schedule(100, "first");
        queue.pop();
        queue.schedule(50, "second");
        queue.schedule_at(10, "late");

        // past times are clamped to the current clock
        assert_eq!(queue.pop(), Some((100, "late")));
        assert_eq!(queue.pop(), Some((150, "second")));
    }
}
