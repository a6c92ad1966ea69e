//! The authoritative store shared by producers, delay pollers and group consumers.
//!
//! Each queue's log, due-time index and groups live behind one per-queue lock,
//! so every mutating operation (append, delete, due pop, group claim, ack,
//! reclaim) is atomic with respect to other callers on the same queue. Two
//! callers can never both win a claim on the same entry id.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::core::clock::Clock;
use crate::core::dlq::{DeadLetter, DeadLetterQueue, DeadLetterReason};
use crate::core::due_index::DueIndex;
use crate::core::entry::{
    parse_due_at, Delivery, EntryId, Fields, Record, StartId, DUE_AT_FIELD,
};
use crate::core::error::{QueueError, Result};
use crate::core::group::{ConsumerGroup, ConsumerId, GroupInfo, GroupOptions, PendingEntry};
use crate::core::log::Log;
use crate::util::millis;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Dead letters kept per queue before the oldest is evicted.
    pub dead_letter_capacity: usize,
    /// Options for groups created without explicit ones.
    pub group_defaults: GroupOptions,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            dead_letter_capacity: 10_000,
            group_defaults: GroupOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub len: usize,
    pub scheduled: usize,
    pub next_due: Option<u64>,
    pub last_id: EntryId,
    pub groups: Vec<String>,
}

#[derive(Debug, Default)]
struct StoreStats {
    enqueued: AtomicU64,
    executed: AtomicU64,
    retried: AtomicU64,
    acked: AtomicU64,
    reclaimed: AtomicU64,
    dead_lettered: AtomicU64,
    malformed: AtomicU64,
}

/// Point-in-time copy of the store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub enqueued: u64,
    pub executed: u64,
    pub retried: u64,
    pub acked: u64,
    pub reclaimed: u64,
    pub dead_lettered: u64,
    pub malformed: u64,
}

impl StoreStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    log: Log,
    due: DueIndex,
    groups: HashMap<String, ConsumerGroup>,
}

#[derive(Debug, Default)]
struct QueueState {
    inner: Mutex<QueueInner>,
    /// Wakes blocked group reads on append and on close.
    appended: Notify,
}

pub struct Store {
    queues: DashMap<String, Arc<QueueState>>,
    clock: Arc<dyn Clock>,
    options: StoreOptions,
    dead_letters: DeadLetterQueue,
    stats: StoreStats,
    closed: AtomicBool,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("queues", &self.queues.len())
            .field("options", &self.options)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Owns an open store for a scope; closing it on drop, on every exit path.
#[derive(Debug)]
pub struct StoreGuard(Arc<Store>);

impl StoreGuard {
    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.0)
    }
}

impl Deref for StoreGuard {
    type Target = Arc<Store>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for StoreGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

fn group_not_found(queue: &str, group: &str) -> QueueError {
    QueueError::GroupNotFound {
        queue: queue.to_string(),
        group: group.to_string(),
    }
}

impl Store {
    pub fn open(options: StoreOptions, clock: Arc<dyn Clock>) -> StoreGuard {
        info!(
            dead_letter_capacity = options.dead_letter_capacity,
            "store opened"
        );
        StoreGuard(Arc::new(Self {
            queues: DashMap::new(),
            clock,
            dead_letters: DeadLetterQueue::new(options.dead_letter_capacity),
            options,
            stats: StoreStats::default(),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Fails every later operation with `StoreUnavailable` and wakes blocked readers.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for queue in self.queues.iter() {
            queue.appended.notify_waiters();
        }
        info!("store closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(QueueError::StoreUnavailable)
        } else {
            Ok(())
        }
    }

    fn queue(&self, name: &str) -> Option<Arc<QueueState>> {
        self.queues.get(name).map(|entry| Arc::clone(&*entry))
    }

    fn queue_or_create(&self, name: &str) -> Arc<QueueState> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(queue = %name, "📭 queue not found; creating new");
                Arc::new(QueueState::default())
            })
            .clone()
    }

    fn dead_letter(&self, letter: DeadLetter) {
        StoreStats::bump(&self.stats.dead_lettered);
        self.dead_letters.push(letter);
    }

    // ───────────────────────────────────────────────────────────
    // Log
    // ───────────────────────────────────────────────────────────

    /// Appends `fields` under a fresh id, scheduling it when a due time is known.
    ///
    /// `due_at` wins over a raw `due_at` field. A raw field that does not parse
    /// keeps the entry in the log but out of the due-time index.
    pub fn append(&self, queue: &str, mut fields: Fields, due_at: Option<u64>) -> Result<EntryId> {
        self.ensure_open()?;
        if let Some(due_at) = due_at {
            fields.insert(DUE_AT_FIELD, due_at.to_string());
        }
        let due = fields.get(DUE_AT_FIELD).map(|raw| (parse_due_at(raw), raw.to_string()));

        let state = self.queue_or_create(queue);
        let id = {
            let mut inner = state.inner.lock();
            let id = inner.log.append(fields, self.now_ms());
            match due {
                Some((Some(due_at), _)) => inner.due.insert(id, due_at, 0),
                Some((None, raw)) => {
                    StoreStats::bump(&self.stats.malformed);
                    warn!(queue = %queue, id = %id, raw = %raw, "unparsable due_at; entry logged but not scheduled");
                }
                None => {}
            }
            id
        };
        state.appended.notify_waiters();
        StoreStats::bump(&self.stats.enqueued);
        debug!(queue = %queue, id = %id, "entry appended");
        Ok(id)
    }

    /// Appends an entry that becomes due after `delay` (immediately visible to groups).
    pub fn enqueue(&self, queue: &str, fields: Fields, delay: Option<Duration>) -> Result<EntryId> {
        let due_at = delay.map(|d| self.now_ms().saturating_add(millis(d)));
        self.append(queue, fields, due_at)
    }

    /// Removes an entry. `Ok(false)` means it was already gone.
    pub fn delete(&self, queue: &str, id: EntryId) -> Result<bool> {
        self.ensure_open()?;
        let Some(state) = self.queue(queue) else {
            debug!(queue = %queue, id = %id, "delete on unknown queue");
            return Ok(false);
        };
        let mut inner = state.inner.lock();
        inner.due.remove(id);
        let removed = inner.log.delete(id);
        if !removed {
            debug!(queue = %queue, id = %id, "delete target already gone");
        }
        Ok(removed)
    }

    pub fn get(&self, queue: &str, id: EntryId) -> Result<Option<Record>> {
        self.ensure_open()?;
        Ok(self.queue(queue).and_then(|state| state.inner.lock().log.get(id)))
    }

    /// Up to `count` records after `start`, in id order. Side-effect free.
    pub fn range_from(&self, queue: &str, start: EntryId, count: usize) -> Result<Vec<Record>> {
        self.ensure_open()?;
        Ok(self
            .queue(queue)
            .map(|state| state.inner.lock().log.range_from(start, count))
            .unwrap_or_default())
    }

    // ───────────────────────────────────────────────────────────
    // Due-time index
    // ───────────────────────────────────────────────────────────

    /// Pops up to `limit` entries due at `now_ms`, earliest first.
    ///
    /// Popped slots leave the index under the queue lock, so concurrent pollers
    /// never receive the same entry. The entries stay in the log until deleted.
    pub fn poll_due(&self, queue: &str, now_ms: u64, limit: usize) -> Result<Vec<Delivery>> {
        self.ensure_open()?;
        let Some(state) = self.queue(queue) else {
            return Ok(Vec::new());
        };
        let mut inner = state.inner.lock();
        let popped = inner.due.pop_due(now_ms, limit);
        let mut due = Vec::with_capacity(popped.len());
        for slot in popped {
            let Some(record) = inner.log.get(slot.id) else {
                debug!(queue = %queue, id = %slot.id, "due entry already deleted");
                continue;
            };
            match record.into_entry() {
                Ok(entry) => due.push(Delivery {
                    entry,
                    delivery_count: slot.attempt + 1,
                }),
                Err((_, err)) => {
                    StoreStats::bump(&self.stats.malformed);
                    warn!(queue = %queue, error = %err, "skipping malformed due entry");
                }
            }
        }
        Ok(due)
    }

    /// Puts a popped entry back in the index after a failed execution.
    pub fn retry(&self, queue: &str, id: EntryId, due_at: u64, attempt: u32) -> Result<bool> {
        let rescheduled = self.reschedule(queue, id, due_at, attempt)?;
        if rescheduled {
            StoreStats::bump(&self.stats.retried);
        }
        Ok(rescheduled)
    }

    /// Puts a popped entry back in the index at `due_at` with `attempt` failures.
    ///
    /// `Ok(false)` if the entry was deleted in the meantime.
    pub fn reschedule(&self, queue: &str, id: EntryId, due_at: u64, attempt: u32) -> Result<bool> {
        self.ensure_open()?;
        let Some(state) = self.queue(queue) else {
            return Ok(false);
        };
        let mut inner = state.inner.lock();
        if !inner.log.contains(id) {
            debug!(queue = %queue, id = %id, "reschedule target already gone");
            return Ok(false);
        }
        inner.due.insert(id, due_at, attempt);
        Ok(true)
    }

    /// Records a successful execution and deletes the entry.
    pub fn complete(&self, queue: &str, id: EntryId) -> Result<bool> {
        let removed = self.delete(queue, id)?;
        StoreStats::bump(&self.stats.executed);
        Ok(removed)
    }

    /// Moves a delay-scheduled entry from the log to the dead-letter queue.
    pub fn bury(&self, queue: &str, id: EntryId, reason: DeadLetterReason) -> Result<bool> {
        self.ensure_open()?;
        let Some(state) = self.queue(queue) else {
            return Ok(false);
        };
        let record = {
            let mut inner = state.inner.lock();
            inner.due.remove(id);
            let record = inner.log.get(id);
            inner.log.delete(id);
            record
        };
        let Some(record) = record else {
            debug!(queue = %queue, id = %id, "bury target already gone");
            return Ok(false);
        };
        self.dead_letter(DeadLetter {
            queue: queue.to_string(),
            group: None,
            consumer: None,
            id,
            fields: record.fields,
            reason,
            dead_at: self.now_ms(),
        });
        Ok(true)
    }

    // ───────────────────────────────────────────────────────────
    // Consumer groups
    // ───────────────────────────────────────────────────────────

    /// Creates `group` on `queue` with the store's default options.
    ///
    /// Returns `Ok(false)` and changes nothing if the group already exists.
    pub fn create_group(&self, queue: &str, group: &str, start: StartId) -> Result<bool> {
        self.create_group_with(queue, group, start, self.options.group_defaults.clone())
    }

    pub fn create_group_with(
        &self,
        queue: &str,
        group: &str,
        start: StartId,
        options: GroupOptions,
    ) -> Result<bool> {
        self.ensure_open()?;
        let state = self.queue_or_create(queue);
        let mut inner = state.inner.lock();
        if inner.groups.contains_key(group) {
            debug!(queue = %queue, group = %group, "consumer group already exists");
            return Ok(false);
        }
        let start_id = match start {
            StartId::After(id) => id,
            StartId::Latest => inner.log.last_id(),
        };
        inner
            .groups
            .insert(group.to_string(), ConsumerGroup::new(group, start_id, options));
        info!(queue = %queue, group = %group, start = %start_id, "consumer group created");
        Ok(true)
    }

    pub fn destroy_group(&self, queue: &str, group: &str) -> Result<bool> {
        self.ensure_open()?;
        let Some(state) = self.queue(queue) else {
            return Ok(false);
        };
        let removed = state.inner.lock().groups.remove(group).is_some();
        if removed {
            info!(queue = %queue, group = %group, "consumer group destroyed");
        }
        Ok(removed)
    }

    /// Claims up to `count` never-delivered entries for `consumer`.
    ///
    /// With nothing ready and a non-zero `block`, waits for an append until the
    /// timeout and then returns an empty batch. Cancel-safe: a claim is only
    /// made in the same synchronous step that returns it.
    pub async fn read_group(
        &self,
        queue: &str,
        group: &str,
        consumer: &ConsumerId,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>> {
        self.ensure_open()?;
        let state = self
            .queue(queue)
            .ok_or_else(|| group_not_found(queue, group))?;
        // `None` when `block` reaches past the end of time: wait without a timeout.
        let deadline = tokio::time::Instant::now().checked_add(block);

        loop {
            let notified = state.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.ensure_open()?;
            let batch = self.claim_new(&state, queue, group, consumer, count)?;
            if !batch.is_empty() || block.is_zero() {
                return Ok(batch);
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(Vec::new());
                    }
                }
                None => notified.await,
            }
        }
    }

    fn claim_new(
        &self,
        state: &QueueState,
        queue: &str,
        group: &str,
        consumer: &ConsumerId,
        count: usize,
    ) -> Result<Vec<Delivery>> {
        let now = self.now_ms();
        let mut guard = state.inner.lock();
        let inner = &mut *guard;
        let group_state = inner
            .groups
            .get_mut(group)
            .ok_or_else(|| group_not_found(queue, group))?;

        let records = inner.log.range_from(group_state.last_delivered_id(), count);
        let mut batch = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id;
            match record.into_entry() {
                Ok(entry) => {
                    group_state.claim(id, consumer, now);
                    batch.push(Delivery {
                        entry,
                        delivery_count: 1,
                    });
                }
                Err((record, err)) => {
                    group_state.skip(id);
                    StoreStats::bump(&self.stats.malformed);
                    self.dead_letter(DeadLetter {
                        queue: queue.to_string(),
                        group: Some(group.to_string()),
                        consumer: Some(consumer.clone()),
                        id,
                        fields: record.fields,
                        reason: DeadLetterReason::Malformed {
                            reason: err.to_string(),
                        },
                        dead_at: now,
                    });
                }
            }
        }
        if !batch.is_empty() {
            debug!(queue = %queue, group = %group, consumer = %consumer, count = batch.len(), "entries claimed");
        }
        Ok(batch)
    }

    /// Acknowledges `id`. `Ok(false)` if it was not pending (never, or already acked).
    ///
    /// Groups created with `delete_on_ack` also remove the entry from the log.
    pub fn ack(&self, queue: &str, group: &str, id: EntryId) -> Result<bool> {
        self.ensure_open()?;
        let state = self
            .queue(queue)
            .ok_or_else(|| group_not_found(queue, group))?;
        let mut guard = state.inner.lock();
        let inner = &mut *guard;
        let group_state = inner
            .groups
            .get_mut(group)
            .ok_or_else(|| group_not_found(queue, group))?;
        let acked = group_state.ack(id);
        if !acked {
            debug!(queue = %queue, group = %group, id = %id, "ack target not pending");
            return Ok(false);
        }
        StoreStats::bump(&self.stats.acked);
        if group_state.options().delete_on_ack {
            inner.due.remove(id);
            inner.log.delete(id);
        }
        Ok(true)
    }

    /// Hands entries whose lease expired at `now_ms` to `consumer`.
    ///
    /// An expired entry that already used its last delivery is dead-lettered
    /// and leaves the pending table. Pending records of entries deleted from
    /// the log are dropped.
    pub fn reclaim_expired(
        &self,
        queue: &str,
        group: &str,
        consumer: &ConsumerId,
        now_ms: u64,
        count: usize,
    ) -> Result<Vec<Delivery>> {
        self.ensure_open()?;
        let state = self
            .queue(queue)
            .ok_or_else(|| group_not_found(queue, group))?;
        let mut guard = state.inner.lock();
        let inner = &mut *guard;
        let group_state = inner
            .groups
            .get_mut(group)
            .ok_or_else(|| group_not_found(queue, group))?;
        let max_deliveries = group_state.options().max_deliveries;

        let mut reclaimed = Vec::new();
        for id in group_state.expired(now_ms, count) {
            let Some(record) = inner.log.get(id) else {
                group_state.remove_pending(id);
                debug!(queue = %queue, group = %group, id = %id, "dropped pending record of deleted entry");
                continue;
            };
            let delivered = group_state
                .pending_record(id)
                .map(|r| r.delivery_count)
                .unwrap_or_default();
            if delivered >= max_deliveries {
                let previous = group_state.remove_pending(id);
                self.dead_letter(DeadLetter {
                    queue: queue.to_string(),
                    group: Some(group.to_string()),
                    consumer: previous.map(|r| r.consumer),
                    id,
                    fields: record.fields,
                    reason: DeadLetterReason::MaxRedeliveryExceeded {
                        deliveries: delivered,
                    },
                    dead_at: now_ms,
                });
                continue;
            }
            let entry = match record.into_entry() {
                Ok(entry) => entry,
                Err((record, err)) => {
                    group_state.remove_pending(id);
                    self.dead_letter(DeadLetter {
                        queue: queue.to_string(),
                        group: Some(group.to_string()),
                        consumer: Some(consumer.clone()),
                        id,
                        fields: record.fields,
                        reason: DeadLetterReason::Malformed {
                            reason: err.to_string(),
                        },
                        dead_at: now_ms,
                    });
                    continue;
                }
            };
            if let Some(delivery_count) = group_state.reassign(id, consumer, now_ms) {
                StoreStats::bump(&self.stats.reclaimed);
                debug!(queue = %queue, group = %group, id = %id, consumer = %consumer, delivery_count, "lease expired; entry reclaimed");
                reclaimed.push(Delivery {
                    entry,
                    delivery_count,
                });
            }
        }
        Ok(reclaimed)
    }

    /// Extends the lease on `id` if `consumer` holds it.
    pub fn touch(&self, queue: &str, group: &str, id: EntryId, consumer: &ConsumerId) -> Result<bool> {
        self.ensure_open()?;
        let state = self
            .queue(queue)
            .ok_or_else(|| group_not_found(queue, group))?;
        let now = self.now_ms();
        let mut inner = state.inner.lock();
        let group_state = inner
            .groups
            .get_mut(group)
            .ok_or_else(|| group_not_found(queue, group))?;
        Ok(group_state.touch(id, consumer, now))
    }

    pub fn pending(&self, queue: &str, group: &str) -> Result<Vec<PendingEntry>> {
        self.with_group(queue, group, |g| g.pending())
    }

    pub fn group_info(&self, queue: &str, group: &str) -> Result<GroupInfo> {
        self.with_group(queue, group, |g| g.info())
    }

    fn with_group<T>(&self, queue: &str, group: &str, f: impl FnOnce(&ConsumerGroup) -> T) -> Result<T> {
        self.ensure_open()?;
        let state = self
            .queue(queue)
            .ok_or_else(|| group_not_found(queue, group))?;
        let inner = state.inner.lock();
        inner
            .groups
            .get(group)
            .map(f)
            .ok_or_else(|| group_not_found(queue, group))
    }

    // ───────────────────────────────────────────────────────────
    // Introspection & dead letters
    // ───────────────────────────────────────────────────────────

    pub fn queue_info(&self, queue: &str) -> Result<Option<QueueInfo>> {
        self.ensure_open()?;
        Ok(self.queue(queue).map(|state| {
            let inner = state.inner.lock();
            let mut groups: Vec<String> = inner.groups.keys().cloned().collect();
            groups.sort();
            QueueInfo {
                name: queue.to_string(),
                len: inner.log.len(),
                scheduled: inner.due.len(),
                next_due: inner.due.next_due(),
                last_id: inner.log.last_id(),
                groups,
            }
        }))
    }

    pub fn queues(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dead_letters
    }

    /// Re-appends the dead letter at `index` of `queue` as a new, immediately due entry.
    pub fn redrive(&self, queue: &str, index: usize) -> Result<Option<EntryId>> {
        self.ensure_open()?;
        let Some(letter) = self.dead_letters.take(queue, index) else {
            return Ok(None);
        };
        let mut fields = letter.fields;
        let was_scheduled = fields.remove(DUE_AT_FIELD).is_some();
        let due_at = was_scheduled.then(|| self.now_ms());
        let id = self.append(&letter.queue, fields, due_at)?;
        info!(queue = %queue, old_id = %letter.id, new_id = %id, "dead letter redriven");
        Ok(Some(id))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;

    fn store() -> (StoreGuard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (Store::open(StoreOptions::default(), clock.clone()), clock)
    }

    #[test]
    fn raw_due_field_schedules_or_is_flagged() {
        let (store, _) = store();
        store
            .append("q", Fields::from([("job", "a"), (DUE_AT_FIELD, "1500")]), None)
            .unwrap();
        store
            .append("q", Fields::from([("job", "b"), (DUE_AT_FIELD, "later")]), None)
            .unwrap();

        let info = store.queue_info("q").unwrap().unwrap();
        assert_eq!(info.len, 2);
        assert_eq!(info.scheduled, 1);
        assert_eq!(info.next_due, Some(1_500));
        assert_eq!(store.stats().malformed, 1);
    }

    #[test]
    fn delete_also_unschedules() {
        let (store, clock) = store();
        let id = store
            .enqueue("q", Fields::from([("job", "a")]), Some(Duration::from_secs(1)))
            .unwrap();
        assert!(store.delete("q", id).unwrap());
        assert!(!store.delete("q", id).unwrap());
        clock.advance(Duration::from_secs(5));
        assert!(store.poll_due("q", clock.now_ms(), 10).unwrap().is_empty());
    }

    #[test]
    fn closed_store_fails_closed() {
        let (store, _) = store();
        store.close();
        assert_eq!(
            store.enqueue("q", Fields::new(), None),
            Err(QueueError::StoreUnavailable)
        );
        assert_eq!(store.ack("q", "g", EntryId::MIN), Err(QueueError::StoreUnavailable));
    }

    #[test]
    fn dropping_the_guard_closes_the_store() {
        let (guard, _) = store();
        let store = guard.store();
        drop(guard);
        assert!(store.is_closed());
    }

    #[test]
    fn redrive_reappends_fields() {
        let (store, clock) = store();
        let id = store
            .enqueue("q", Fields::from([("job", "a")]), Some(Duration::ZERO))
            .unwrap();
        store
            .bury(
                "q",
                id,
                DeadLetterReason::ExecutionFailed {
                    attempts: 3,
                    error: "boom".into(),
                },
            )
            .unwrap();
        assert_eq!(store.queue_info("q").unwrap().unwrap().len, 0);

        let new_id = store.redrive("q", 0).unwrap().unwrap();
        assert!(new_id > id);
        let due = store.poll_due("q", clock.now_ms(), 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].entry.get("job"), Some("a"));
        assert_eq!(store.dead_letters().len("q"), 0);
    }
}
