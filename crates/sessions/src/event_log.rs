//! Append-only, sequence-numbered record of a session's outbound events.
//!
//! Sequence ids start at 1 and increase by exactly one per append.  The log
//! is a bounded ring: once `max_events` entries are held, each append evicts
//! the oldest entry.  Eviction never renumbers, so retained entries always
//! form one contiguous run of sequence ids.

use std::collections::VecDeque;

use serde::Serialize;
use serde_json::Value;

/// One logged event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEntry {
    pub seq: u64,
    pub payload: Value,
}

/// Result of a replay request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Replay {
    /// Retained entries after the requested cursor, ascending.
    pub entries: Vec<EventEntry>,
    /// Entries after the cursor that were already evicted.
    pub missed: u64,
}

#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<EventEntry>,
    next_seq: u64,
    max_events: usize,
}

impl EventLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            next_seq: 1,
            max_events: max_events.max(1),
        }
    }

    /// Append a payload and return its sequence id.
    pub fn append(&mut self, payload: Value) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(EventEntry { seq, payload });
        while self.entries.len() > self.max_events {
            self.entries.pop_front();
        }
        seq
    }

    /// Sequence id of the most recent append (0 if nothing was appended).
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    /// Oldest retained sequence id.
    pub fn first_retained(&self) -> Option<u64> {
        self.entries.front().map(|e| e.seq)
    }

    /// All retained entries with `seq > after`, in order.
    pub fn replay_after(&self, after: u64) -> Replay {
        let Some(first) = self.first_retained() else {
            return Replay {
                entries: Vec::new(),
                missed: self.last_seq().saturating_sub(after),
            };
        };

        let wanted_from = after.saturating_add(1);
        let missed = first.saturating_sub(wanted_from);
        // Retained seqs are contiguous, so the offset is direct.
        let skip = wanted_from.saturating_sub(first) as usize;
        let entries = self.entries.iter().skip(skip).cloned().collect();

        Replay { entries, missed }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seqs(replay: &Replay) -> Vec<u64> {
        replay.entries.iter().map(|e| e.seq).collect()
    }

    #[test]
    fn sequence_ids_start_at_one_and_are_gapless() {
        let mut log = EventLog::new(100);
        let ids: Vec<u64> = (0..10).map(|i| log.append(json!(i))).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
        assert_eq!(log.last_seq(), 10);
    }

    #[test]
    fn replay_returns_entries_strictly_after_cursor() {
        let mut log = EventLog::new(100);
        for i in 0..6 {
            log.append(json!({ "n": i }));
        }
        let replay = log.replay_after(3);
        assert_eq!(seqs(&replay), vec![4, 5, 6]);
        assert_eq!(replay.missed, 0);
        assert_eq!(replay.entries[0].payload, json!({ "n": 3 }));
    }

    #[test]
    fn replay_from_zero_returns_everything() {
        let mut log = EventLog::new(100);
        log.append(json!("a"));
        log.append(json!("b"));
        assert_eq!(seqs(&log.replay_after(0)), vec![1, 2]);
    }

    #[test]
    fn replay_at_or_past_head_is_empty() {
        let mut log = EventLog::new(100);
        log.append(json!("a"));
        assert!(log.replay_after(1).entries.is_empty());
        assert!(log.replay_after(99).entries.is_empty());
        assert_eq!(log.replay_after(99).missed, 0);
    }

    #[test]
    fn eviction_keeps_numbering_and_reports_missed() {
        let mut log = EventLog::new(3);
        for i in 0..5 {
            log.append(json!(i));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.first_retained(), Some(3));

        let replay = log.replay_after(1);
        assert_eq!(seqs(&replay), vec![3, 4, 5]);
        assert_eq!(replay.missed, 1);

        // A new append continues the sequence.
        assert_eq!(log.append(json!(5)), 6);
    }

    #[test]
    fn empty_log_replays_nothing() {
        let log = EventLog::new(3);
        assert!(log.is_empty());
        assert_eq!(log.replay_after(0), Replay::default());
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mut log = EventLog::new(0);
        log.append(json!(1));
        log.append(json!(2));
        assert_eq!(log.len(), 1);
        assert_eq!(seqs(&log.replay_after(0)), vec![2]);
    }
}
