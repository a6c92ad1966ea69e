//! Consumer-group cursor and pending-entry table.
//!
//! Each entry id moves `undelivered -> pending(consumer) -> acknowledged`, or
//! `pending -> expired -> pending(new consumer)` when a lease runs out.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Deref;
use std::time::Duration;

use crate::core::entry::EntryId;
use crate::util::millis;

/// Unique identifier for a consumer within a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub String);

impl ConsumerId {
    /// A fresh random id, for consumers that do not name themselves.
    pub fn generate() -> Self {
        ConsumerId(format!("consumer-{}", uuid::Uuid::new_v4().simple()))
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConsumerId {
    fn from(s: &str) -> Self {
        ConsumerId(s.to_owned())
    }
}

impl From<String> for ConsumerId {
    fn from(s: String) -> Self {
        ConsumerId(s)
    }
}

impl AsRef<str> for ConsumerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ConsumerId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Per-group delivery policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOptions {
    pub lease_ttl: Duration,
    /// Deliveries allowed before an expired entry is dead-lettered.
    pub max_deliveries: u32,
    /// Delete the entry from the log once a consumer loop acknowledges it.
    pub delete_on_ack: bool,
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(30),
            max_deliveries: 5,
            delete_on_ack: false,
        }
    }
}

/// A delivered-but-unacknowledged entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub consumer: ConsumerId,
    pub delivery_count: u32,
    pub delivered_at: u64,
    pub lease_expires_at: u64,
}

impl PendingRecord {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.lease_expires_at <= now_ms
    }
}

/// Snapshot row of a group's pending table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: EntryId,
    pub record: PendingRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub last_delivered_id: EntryId,
    pub pending: usize,
    /// Consumers currently holding claims, with their pending counts.
    ///
    /// A consumer is dropped from this list once its last claim is acked or
    /// reassigned.
    pub consumers: Vec<(ConsumerId, usize)>,
    pub options: GroupOptions,
}

#[derive(Debug)]
pub struct ConsumerGroup {
    name: String,
    last_delivered_id: EntryId,
    pending: BTreeMap<EntryId, PendingRecord>,
    options: GroupOptions,
}

impl ConsumerGroup {
    pub fn new(name: impl Into<String>, start: EntryId, options: GroupOptions) -> Self {
        Self {
            name: name.into(),
            last_delivered_id: start,
            pending: BTreeMap::new(),
            options,
        }
    }

    pub fn last_delivered_id(&self) -> EntryId {
        self.last_delivered_id
    }

    pub fn options(&self) -> &GroupOptions {
        &self.options
    }

    fn lease_deadline(&self, now_ms: u64) -> u64 {
        now_ms.saturating_add(millis(self.options.lease_ttl))
    }

    /// Records the first delivery of `id` and advances the cursor past it.
    ///
    /// Ids at or below the cursor were already handed out and are refused.
    pub fn claim(&mut self, id: EntryId, consumer: &ConsumerId, now_ms: u64) -> bool {
        if id <= self.last_delivered_id {
            return false;
        }
        self.last_delivered_id = id;
        let record = PendingRecord {
            consumer: consumer.clone(),
            delivery_count: 1,
            delivered_at: now_ms,
            lease_expires_at: self.lease_deadline(now_ms),
        };
        self.pending.insert(id, record);
        true
    }

    /// Moves the cursor without creating a pending record (entry isolated elsewhere).
    pub fn skip(&mut self, id: EntryId) {
        if id > self.last_delivered_id {
            self.last_delivered_id = id;
        }
    }

    /// Returns `false` when `id` was never pending or was already acknowledged.
    pub fn ack(&mut self, id: EntryId) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub fn remove_pending(&mut self, id: EntryId) -> Option<PendingRecord> {
        self.pending.remove(&id)
    }

    pub fn pending_record(&self, id: EntryId) -> Option<&PendingRecord> {
        self.pending.get(&id)
    }

    /// Up to `count` ids whose lease has run out, oldest id first.
    pub fn expired(&self, now_ms: u64, count: usize) -> Vec<EntryId> {
        self.pending
            .iter()
            .filter(|(_, record)| record.is_expired(now_ms))
            .take(count)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Hands an expired entry to `consumer`, bumping its delivery count.
    pub fn reassign(&mut self, id: EntryId, consumer: &ConsumerId, now_ms: u64) -> Option<u32> {
        let deadline = self.lease_deadline(now_ms);
        let record = self.pending.get_mut(&id)?;
        record.consumer = consumer.clone();
        record.delivery_count += 1;
        record.delivered_at = now_ms;
        record.lease_expires_at = deadline;
        Some(record.delivery_count)
    }

    /// Extends the lease on `id` if `consumer` currently holds it.
    pub fn touch(&mut self, id: EntryId, consumer: &ConsumerId, now_ms: u64) -> bool {
        let deadline = self.lease_deadline(now_ms);
        match self.pending.get_mut(&id) {
            Some(record) if record.consumer == *consumer => {
                record.lease_expires_at = deadline;
                true
            }
            _ => false,
        }
    }

    pub fn pending(&self) -> Vec<PendingEntry> {
        self.pending
            .iter()
            .map(|(id, record)| PendingEntry {
                id: *id,
                record: record.clone(),
            })
            .collect()
    }

    pub fn info(&self) -> GroupInfo {
        let mut counts: HashMap<&ConsumerId, usize> = HashMap::new();
        for record in self.pending.values() {
            *counts.entry(&record.consumer).or_default() += 1;
        }
        let mut consumers: Vec<(ConsumerId, usize)> =
            counts.into_iter().map(|(c, n)| (c.clone(), n)).collect();
        consumers.sort();

        GroupInfo {
            name: self.name.clone(),
            last_delivered_id: self.last_delivered_id,
            pending: self.pending.len(),
            consumers,
            options: self.options.clone(),
        }
    }
}
