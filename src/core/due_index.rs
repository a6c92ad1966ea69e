//! Min-ordered index of delay-scheduled entries keyed by due time.
//!
//! Pops are ordered by `(due_at, id)`, never by insertion order: an entry
//! enqueued later with a shorter delay becomes visible before an earlier one
//! with a longer delay.

use std::collections::{BTreeMap, HashMap};

use crate::core::entry::EntryId;

/// An index slot handed back by [`DueIndex::pop_due`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub id: EntryId,
    pub due_at: u64,
    /// Failed executions so far.
    pub attempt: u32,
}

#[derive(Debug, Default)]
pub struct DueIndex {
    by_due: BTreeMap<(u64, EntryId), u32>,
    due_of: HashMap<EntryId, u64>,
}

impl DueIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `id` at `due_at`, replacing any earlier slot for the same id.
    pub fn insert(&mut self, id: EntryId, due_at: u64, attempt: u32) {
        if let Some(old) = self.due_of.insert(id, due_at) {
            self.by_due.remove(&(old, id));
        }
        self.by_due.insert((due_at, id), attempt);
    }

    pub fn remove(&mut self, id: EntryId) -> bool {
        match self.due_of.remove(&id) {
            Some(due_at) => self.by_due.remove(&(due_at, id)).is_some(),
            None => false,
        }
    }

    /// Removes and returns up to `limit` slots with `due_at <= now`, earliest first.
    pub fn pop_due(&mut self, now_ms: u64, limit: usize) -> Vec<Scheduled> {
        let mut popped = Vec::new();
        while popped.len() < limit {
            let Some(entry) = self.by_due.first_entry() else {
                break;
            };
            let (due_at, id) = *entry.key();
            if due_at > now_ms {
                break;
            }
            let attempt = entry.remove();
            self.due_of.remove(&id);
            popped.push(Scheduled {
                id,
                due_at,
                attempt,
            });
        }
        popped
    }

    /// Earliest due time, if anything is scheduled.
    pub fn next_due(&self) -> Option<u64> {
        self.by_due.keys().next().map(|(due_at, _)| *due_at)
    }

    pub fn len(&self) -> usize {
        self.due_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.due_of.is_empty()
    }
}
