//! Dead Letter Queue
//!
//! Terminal destination for entries the system gave up on:
//! - group entries whose lease expired after the last allowed delivery
//! - delay-scheduled entries whose execution kept failing
//! - entries with an unparsable reserved field
//!
//! Dead letters are kept per queue, bounded, and can be redriven.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::entry::{EntryId, Fields};
use crate::core::group::ConsumerId;

/// Why an entry was dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// Lease expired again after `deliveries` deliveries.
    MaxRedeliveryExceeded { deliveries: u32 },
    /// Delay-scheduled execution failed `attempts` times.
    ExecutionFailed { attempts: u32, error: String },
    Malformed { reason: String },
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadLetterReason::MaxRedeliveryExceeded { deliveries } => {
                write!(f, "max redelivery exceeded after {deliveries} deliveries")
            }
            DeadLetterReason::ExecutionFailed { attempts, error } => {
                write!(f, "execution failed {attempts} times: {error}")
            }
            DeadLetterReason::Malformed { reason } => write!(f, "malformed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub queue: String,
    pub group: Option<String>,
    pub consumer: Option<ConsumerId>,
    pub id: EntryId,
    /// Raw fields as stored, including any reserved fields.
    pub fields: Fields,
    pub reason: DeadLetterReason,
    pub dead_at: u64,
}

/// Per-queue dead-letter store.
#[derive(Debug)]
pub struct DeadLetterQueue {
    by_queue: DashMap<String, Vec<DeadLetter>>,
    capacity: usize,
    subscribers: Mutex<Vec<flume::Sender<DeadLetter>>>,
    total: AtomicU64,
    evicted: AtomicU64,
}

impl DeadLetterQueue {
    /// `capacity` bounds each queue's dead letters; the oldest is evicted first.
    pub fn new(capacity: usize) -> Self {
        Self {
            by_queue: DashMap::new(),
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
            total: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn push(&self, letter: DeadLetter) {
        warn!(
            queue = %letter.queue,
            id = %letter.id,
            group = letter.group.as_deref().unwrap_or("-"),
            reason = %letter.reason,
            "entry dead-lettered"
        );

        self.subscribers
            .lock()
            .retain(|tx| tx.send(letter.clone()).is_ok());

        let mut letters = self.by_queue.entry(letter.queue.clone()).or_default();
        if letters.len() >= self.capacity {
            letters.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
            debug!(queue = %letter.queue, "evicted oldest dead letter at capacity");
        }
        letters.push(letter);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Receives every dead letter pushed after this call.
    pub fn subscribe(&self) -> flume::Receiver<DeadLetter> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn list(&self, queue: &str) -> Vec<DeadLetter> {
        self.by_queue
            .get(queue)
            .map(|letters| letters.clone())
            .unwrap_or_default()
    }

    /// Removes and returns the dead letter at `index` for `queue`.
    pub fn take(&self, queue: &str, index: usize) -> Option<DeadLetter> {
        let mut letters = self.by_queue.get_mut(queue)?;
        (index < letters.len()).then(|| letters.remove(index))
    }

    pub fn len(&self, queue: &str) -> usize {
        self.by_queue.get(queue).map(|l| l.len()).unwrap_or(0)
    }

    /// Dead letters ever recorded, including evicted ones.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}
