use crate::Msg;
use parking_lot::Mutex;
use std::collections::VecDeque;
use weft::time::timestamp_millis;

/// Number of undeliverable messages retained for diagnostics. The ring keeps
/// the newest entries.
pub const RETENTION: usize = 256;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DeadLetterReason {
    /// The actor's handler did not recognise the message.
    UnhandledMessage,
    /// The target actor stopped (or could not be created) before delivery.
    ActorTerminated,
    /// The message was dropped by a bounded mailbox's overflow policy.
    Delivery,
}

/// A message that could not be delivered or handled.
pub struct DeadLetter {
    pub actor: String,
    pub message: Msg,
    pub reason: DeadLetterReason,
    pub timestamp: u64,
}

/// Bounded ring of dead letters with age-order retrieval.
pub struct DeadLetterLog {
    ring: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
}

impl DeadLetterLog {
    pub fn new(capacity: usize) -> DeadLetterLog {
        DeadLetterLog {
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Record a dead letter, evicting the oldest entry when full.
    pub fn record(&self, actor: &str, message: Msg, reason: DeadLetterReason) {
        let mut ring = self.ring.lock();

        if ring.len() == self.capacity {
            ring.pop_front();
        }

        ring.push_back(DeadLetter {
            actor: actor.to_string(),
            message,
            reason,
            timestamp: timestamp_millis(),
        });
    }

    /// Dequeue up to `limit` dead letters, oldest first. The limit must be
    /// positive.
    pub fn take(&self, limit: usize) -> Vec<DeadLetter> {
        if limit == 0 {
            panic!("Dead letter limit must be positive");
        }

        let mut ring = self.ring.lock();
        let count = limit.min(ring.len());

        ring.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter(log: &DeadLetterLog, actor: &str, value: i32) {
        log.record(actor, Box::new(value), DeadLetterReason::Delivery);
    }

    #[test]
    fn test_take_age_order() {
        let log = DeadLetterLog::new(8);
        letter(&log, "a", 1);
        letter(&log, "b", 2);
        letter(&log, "c", 3);

        let taken = log.take(2);

        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].actor, "a");
        assert_eq!(taken[1].actor, "b");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let log = DeadLetterLog::new(3);
        for i in 0..5 {
            letter(&log, &format!("actor-{}", i), i);
        }

        let taken = log.take(10);
        let names: Vec<_> = taken.iter().map(|dl| dl.actor.as_str()).collect();

        assert_eq!(names, vec!["actor-2", "actor-3", "actor-4"]);
    }

    #[test]
    #[should_panic(expected = "Dead letter limit must be positive")]
    fn test_zero_limit_rejected() {
        let log = DeadLetterLog::new(3);
        log.take(0);
    }

    #[test]
    fn test_message_payload_survives() {
        let log = DeadLetterLog::new(3);
        letter(&log, "echo", 42);

        let taken = log.take(1);
        let value = taken[0].message.downcast_ref::<i32>().unwrap();

        assert_eq!(*value, 42);
        assert_eq!(taken[0].reason, DeadLetterReason::Delivery);
        assert!(taken[0].timestamp > 0);
    }
}
