//! Frames awaiting acknowledgement
//!
//! Each layer keeps one table keyed by its own sequence numbers. Alongside
//! the map sits a time-ordered log of `(sent_at, seq)` pairs. Timeouts are
//! found by scanning that log from the front; log entries whose sequence has
//! since been acknowledged (or re-registered under a different time) are
//! skipped rather than removed in place, so acknowledging is O(log n) and
//! a late timer is always a no-op.

use super::address::NicAddr;
use super::frame::SeqNo;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// A frame waiting for its acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry<T> {
    /// What to resubmit or report if the acknowledgement never comes
    pub item: T,
    /// Neighbour the frame was handed to
    pub next_hop: NicAddr,
    /// First transmission time; the deadline is measured from here
    pub sent_at: Duration,
    /// Number of times the frame has been (re)registered
    pub attempts: u32,
}

/// Pending-acknowledgement table with a fixed timeout
#[derive(Debug, Clone)]
pub struct PendingAcks<T> {
    waiting: BTreeMap<SeqNo, PendingEntry<T>>,
    sent_log: VecDeque<(Duration, SeqNo)>,
    timeout: Duration,
}

impl<T> PendingAcks<T> {
    /// Create an empty table
    pub fn new(timeout: Duration) -> Self {
        Self {
            waiting: BTreeMap::new(),
            sent_log: VecDeque::new(),
            timeout,
        }
    }

    /// Start waiting for `seq`.
    ///
    /// Registering a sequence that is already waiting keeps its original
    /// send time (and so its deadline) but records the new item and next hop.
    pub fn register(&mut self, seq: SeqNo, item: T, next_hop: NicAddr, now: Duration) {
        if let Some(entry) = self.waiting.get_mut(&seq) {
            entry.item = item;
            entry.next_hop = next_hop;
            entry.attempts += 1;
            return;
        }

        self.waiting.insert(
            seq,
            PendingEntry {
                item,
                next_hop,
                sent_at: now,
                attempts: 1,
            },
        );
        self.sent_log.push_back((now, seq));
    }

    /// Clear `seq`. Unknown sequences are ignored.
    pub fn acknowledge(&mut self, seq: SeqNo) -> Option<PendingEntry<T>> {
        self.waiting.remove(&seq)
    }

    /// Clear `seq` only if `matches` accepts the entry
    pub fn acknowledge_if<F>(&mut self, seq: SeqNo, matches: F) -> Option<PendingEntry<T>>
    where
        F: FnOnce(&PendingEntry<T>) -> bool,
    {
        if self.waiting.get(&seq).map(matches).unwrap_or(false) {
            self.waiting.remove(&seq)
        } else {
            None
        }
    }

    /// Remove and return every entry whose deadline is at or before `now`,
    /// oldest first
    pub fn expire(&mut self, now: Duration) -> Vec<(SeqNo, PendingEntry<T>)> {
        let mut expired = Vec::new();
        while let Some(&(sent_at, seq)) = self.sent_log.front() {
            if sent_at + self.timeout > now {
                break;
            }
            self.sent_log.pop_front();

            let live = self
                .waiting
                .get(&seq)
                .map(|entry| entry.sent_at == sent_at)
                .unwrap_or(false);
            if !live {
                continue;
            }
            if let Some(entry) = self.waiting.remove(&seq) {
                expired.push((seq, entry));
            }
        }
        expired
    }

    /// Earliest time `expire` could return something
    pub fn next_deadline(&self) -> Option<Duration> {
        self.sent_log
            .front()
            .map(|(sent_at, _)| *sent_at + self.timeout)
    }

    /// Get an entry by sequence
    pub fn get(&self, seq: SeqNo) -> Option<&PendingEntry<T>> {
        self.waiting.get(&seq)
    }

    /// Check if `seq` is still waiting
    pub fn contains(&self, seq: SeqNo) -> bool {
        self.waiting.contains_key(&seq)
    }

    /// Number of entries waiting
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    /// Check if nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Length of the timeout log, stale entries included
    pub fn log_len(&self) -> usize {
        self.sent_log.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(10);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn hop() -> NicAddr {
        NicAddr::from_index(2)
    }

    #[test]
    fn test_ack_clears() {
        let mut table = PendingAcks::new(TIMEOUT);
        table.register(1, "a", hop(), ms(0));
        assert!(table.contains(1));

        assert_eq!(table.acknowledge(1).map(|e| e.item), Some("a"));
        assert!(table.is_empty());

        // Duplicate or late ack is a no-op
        assert!(table.acknowledge(1).is_none());
        assert!(table.acknowledge(99).is_none());
    }

    #[test]
    fn test_expire_in_order() {
        let mut table = PendingAcks::new(TIMEOUT);
        table.register(5, "five", hop(), ms(0));
        table.register(3, "three", hop(), ms(2));
        table.register(9, "nine", hop(), ms(4));

        assert!(table.expire(ms(9)).is_empty());
        assert_eq!(table.next_deadline(), Some(ms(10)));

        let expired: Vec<_> = table.expire(ms(12)).into_iter().map(|(s, _)| s).collect();
        assert_eq!(expired, vec![5, 3]);
        assert_eq!(table.len(), 1);
        assert!(table.contains(9));
    }

    #[test]
    fn test_acked_entries_skipped() {
        let mut table = PendingAcks::new(TIMEOUT);
        table.register(1, (), hop(), ms(0));
        table.register(2, (), hop(), ms(1));
        table.acknowledge(1);

        let expired = table.expire(ms(20));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, 2);
        assert_eq!(table.log_len(), 0);
    }

    #[test]
    fn test_reregister_keeps_deadline() {
        let mut table = PendingAcks::new(TIMEOUT);
        let other = NicAddr::from_index(3);
        table.register(1, "first", hop(), ms(0));
        table.register(1, "second", other, ms(6));

        let entry = table.get(1).unwrap();
        assert_eq!(entry.sent_at, ms(0));
        assert_eq!(entry.next_hop, other);
        assert_eq!(entry.attempts, 2);
        assert_eq!(table.log_len(), 1);

        let expired = table.expire(ms(10));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].1.item, "second");
    }

    #[test]
    fn test_reused_seq_after_ack() {
        let mut table = PendingAcks::new(TIMEOUT);
        table.register(1, "old", hop(), ms(0));
        table.acknowledge(1);
        table.register(1, "new", hop(), ms(8));

        // The stale log entry at t=0 must not expire the new registration
        assert!(table.expire(ms(12)).is_empty());
        assert!(table.contains(1));
        assert_eq!(table.expire(ms(18)).len(), 1);
    }

    #[test]
    fn test_acknowledge_if() {
        let mut table = PendingAcks::new(TIMEOUT);
        table.register(4, (), hop(), ms(0));

        assert!(table
            .acknowledge_if(4, |e| e.next_hop == NicAddr::from_index(7))
            .is_none());
        assert!(table.contains(4));
        assert!(table.acknowledge_if(4, |e| e.next_hop == hop()).is_some());
    }
}
