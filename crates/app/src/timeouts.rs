//! Block-time timeout scheduler.
//!
//! Deadlines are block-time instants, never wall-clock: the period driver
//! feeds block timestamps into [`AbciApp::update_time`](crate::AbciApp) and
//! timeouts fire against those, so every replica fires them at the same point
//! of the block stream.

use std::cmp::Ordering;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};
use std::time::Duration;

use thiserror::Error;

/// Cancelling an entry id that is not in the queue.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown timeout entry id {0}")]
pub struct UnknownTimeout(pub u64);

/// One scheduled timeout.
#[derive(Clone, Debug)]
struct TimeoutEvent<E> {
    deadline: Duration,
    /// Monotonic counter; tie-breaker and cancellation handle.
    entry_id: u64,
    event: E,
}

// Ordering ignores the event, (deadline, entry_id) is already total.
impl<E> PartialEq for TimeoutEvent<E> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.entry_id == other.entry_id
    }
}

impl<E> Eq for TimeoutEvent<E> {}

impl<E> PartialOrd for TimeoutEvent<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for TimeoutEvent<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.entry_id).cmp(&(other.deadline, other.entry_id))
    }
}

/// Min-priority queue of pending timeouts with lazy cancellation.
///
/// Cancelled entries stay in the heap, marked, and are discarded when they
/// reach the top.
#[derive(Debug, Default)]
pub struct Timeouts<E> {
    heap: BinaryHeap<Reverse<TimeoutEvent<E>>>,
    /// Entry ids currently in the heap.
    live: BTreeSet<u64>,
    /// Entry ids marked cancelled but not yet discarded.
    cancelled: BTreeSet<u64>,
    next_entry_id: u64,
}

impl<E> Timeouts<E> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: BTreeSet::new(),
            cancelled: BTreeSet::new(),
            next_entry_id: 0,
        }
    }

    /// Number of entries in the queue, cancelled ones included.
    pub fn size(&self) -> usize {
        self.heap.len()
    }

    /// Schedule an event at a deadline; returns the cancellation handle.
    pub fn add_timeout(&mut self, deadline: Duration, event: E) -> u64 {
        let entry_id = self.next_entry_id;
        self.next_entry_id += 1;
        self.heap.push(Reverse(TimeoutEvent {
            deadline,
            entry_id,
            event,
        }));
        self.live.insert(entry_id);
        entry_id
    }

    /// Mark an entry as cancelled; it is discarded when it reaches the top.
    pub fn cancel_timeout(&mut self, entry_id: u64) -> Result<(), UnknownTimeout> {
        if !self.live.contains(&entry_id) {
            return Err(UnknownTimeout(entry_id));
        }
        self.cancelled.insert(entry_id);
        Ok(())
    }

    /// Discard every cancelled entry at the front of the queue.
    pub fn pop_earliest_cancelled_timeouts(&mut self) {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if !self.cancelled.contains(&entry.entry_id) {
                break;
            }
            self.pop_timeout();
        }
    }

    /// The earliest deadline-event pair, without removing it.
    pub fn get_earliest_timeout(&self) -> Option<(Duration, &E)> {
        self.heap
            .peek()
            .map(|Reverse(entry)| (entry.deadline, &entry.event))
    }

    /// Remove and return the earliest deadline-event pair.
    pub fn pop_timeout(&mut self) -> Option<(Duration, E)> {
        let Reverse(entry) = self.heap.pop()?;
        self.live.remove(&entry.entry_id);
        self.cancelled.remove(&entry.entry_id);
        Some((entry.deadline, entry.event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Event {
        RoundTimeout,
        ResetTimeout,
    }

    #[test]
    fn add_cancel_pop_leaves_queue_empty() {
        let mut timeouts = Timeouts::new();
        let id = timeouts.add_timeout(Duration::from_secs(30), Event::RoundTimeout);
        timeouts.cancel_timeout(id).unwrap();
        timeouts.pop_earliest_cancelled_timeouts();
        assert_eq!(timeouts.size(), 0);
        assert!(timeouts.get_earliest_timeout().is_none());
    }

    #[test]
    fn cancelling_unknown_id_fails() {
        let mut timeouts: Timeouts<Event> = Timeouts::new();
        assert_eq!(timeouts.cancel_timeout(7), Err(UnknownTimeout(7)));

        let id = timeouts.add_timeout(Duration::from_secs(1), Event::RoundTimeout);
        timeouts.pop_timeout().unwrap();
        assert_eq!(timeouts.cancel_timeout(id), Err(UnknownTimeout(id)));
    }

    #[test]
    fn pops_in_deadline_order() {
        let mut timeouts = Timeouts::new();
        timeouts.add_timeout(Duration::from_secs(30), Event::RoundTimeout);
        timeouts.add_timeout(Duration::from_secs(10), Event::ResetTimeout);
        timeouts.add_timeout(Duration::from_secs(20), Event::RoundTimeout);

        let mut deadlines = Vec::new();
        while let Some((deadline, _)) = timeouts.pop_timeout() {
            deadlines.push(deadline);
        }
        assert_eq!(
            deadlines,
            vec![
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(30)
            ]
        );
    }

    #[test]
    fn equal_deadlines_pop_in_insertion_order() {
        let mut timeouts = Timeouts::new();
        timeouts.add_timeout(Duration::from_secs(5), Event::RoundTimeout);
        timeouts.add_timeout(Duration::from_secs(5), Event::ResetTimeout);

        assert_eq!(
            timeouts.pop_timeout().unwrap().1,
            Event::RoundTimeout
        );
        assert_eq!(
            timeouts.pop_timeout().unwrap().1,
            Event::ResetTimeout
        );
    }

    #[test]
    fn cancellation_is_lazy() {
        let mut timeouts = Timeouts::new();
        let first = timeouts.add_timeout(Duration::from_secs(1), Event::RoundTimeout);
        timeouts.add_timeout(Duration::from_secs(2), Event::ResetTimeout);
        timeouts.cancel_timeout(first).unwrap();

        // still in the heap until the front is swept
        assert_eq!(timeouts.size(), 2);
        timeouts.pop_earliest_cancelled_timeouts();
        assert_eq!(timeouts.size(), 1);
        assert_eq!(
            timeouts.get_earliest_timeout().unwrap(),
            (Duration::from_secs(2), &Event::ResetTimeout)
        );
    }
}
