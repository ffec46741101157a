use crate::Msg;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Ranking function for priority mailboxes. Lower ranks dequeue first.
pub type PriorityFn = Arc<dyn Fn(&Msg) -> i64 + Send + Sync>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room for the incoming one.
    DropOldest,
    /// Drop the incoming message.
    DropNewest,
    /// Surface the overflow to the sender.
    Fail,
}

#[derive(Clone)]
pub enum MailboxConfig {
    Unbounded,
    Bounded { capacity: usize, policy: OverflowPolicy },
    Priority { rank: PriorityFn },
}

/// Outcome of a successful enqueue. `Displaced` carries a message that was
/// dropped to make room and must be recorded as a dead letter by the caller.
pub enum Enqueued {
    Accepted,
    Displaced(Msg),
}

/// Enqueue failure. Both variants return the message to the caller.
pub enum PushError {
    /// Bounded mailbox with the `Fail` policy is full.
    Overflow(Msg),
    /// The mailbox was closed because the actor stopped.
    Closed(Msg),
}

struct Entry {
    rank: i64,
    msg: Msg,
}

struct Inner {
    queue: VecDeque<Entry>,
    closed: bool,
}

/// Ordered queue of messages awaiting delivery to an actor. All variants are
/// multi-producer, single-consumer: many senders push, the actor task pops.
pub struct Mailbox {
    config: MailboxConfig,
    inner: Mutex<Inner>,
    available: Condvar,
}

impl Mailbox {
    pub fn new(config: MailboxConfig) -> Mailbox {
        Mailbox {
            config,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Enqueue a message per the mailbox configuration.
    pub fn push(&self, msg: Msg) -> Result<Enqueued, PushError> {
        let mut inner = self.inner.lock();

        if inner.closed {
            return Err(PushError::Closed(msg));
        }

        let outcome = match &self.config {
            MailboxConfig::Unbounded => {
                inner.queue.push_back(Entry { rank: 0, msg });
                Enqueued::Accepted
            }
            MailboxConfig::Bounded { capacity, policy } => {
                if inner.queue.len() < *capacity {
                    inner.queue.push_back(Entry { rank: 0, msg });
                    Enqueued::Accepted
                } else {
                    match policy {
                        OverflowPolicy::DropOldest => {
                            let evicted = inner
                                .queue
                                .pop_front()
                                .expect("Full bounded mailbox must have a head");
                            inner.queue.push_back(Entry { rank: 0, msg });
                            Enqueued::Displaced(evicted.msg)
                        }
                        OverflowPolicy::DropNewest => Enqueued::Displaced(msg),
                        OverflowPolicy::Fail => return Err(PushError::Overflow(msg)),
                    }
                }
            }
            MailboxConfig::Priority { rank } => {
                let rank = rank(&msg);
                // Insert after every entry of equal rank so ties stay FIFO.
                let mut at = inner.queue.len();
                while at > 0 && inner.queue[at - 1].rank > rank {
                    at -= 1;
                }
                inner.queue.insert(at, Entry { rank, msg });
                Enqueued::Accepted
            }
        };

        drop(inner);
        self.available.notify_one();

        Ok(outcome)
    }

    /// Dequeue the next message, blocking until one is available, the mailbox
    /// is closed, or the optional timeout elapses.
    pub fn pop_wait(&self, timeout: Option<Duration>) -> Option<Msg> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.inner.lock();

        loop {
            if inner.closed {
                return None;
            }

            if let Some(entry) = inner.queue.pop_front() {
                return Some(entry.msg);
            }

            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut inner, deadline).timed_out() {
                        return inner.queue.pop_front().map(|entry| entry.msg);
                    }
                }
                None => self.available.wait(&mut inner),
            }
        }
    }

    /// Close the mailbox, rejecting further pushes and waking the consumer.
    /// Returns the undelivered remainder so the caller can dead letter it.
    pub fn close(&self) -> Vec<Msg> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let remainder = inner.queue.drain(..).map(|entry| entry.msg).collect();
        drop(inner);
        self.available.notify_all();

        remainder
    }
}
