use std::collections::BTreeMap;
use std::ops::Bound;

use crate::core::entry::{EntryId, Fields, Record};

/// Append-only, id-ordered record of one queue's entries.
///
/// `last_id` survives deletes so ids are never reused.
#[derive(Debug, Default)]
pub struct Log {
    entries: BTreeMap<EntryId, Fields>,
    last_id: EntryId,
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `fields` under the next id and returns it.
    pub fn append(&mut self, fields: Fields, now_ms: u64) -> EntryId {
        let id = EntryId::next_after(self.last_id, now_ms);
        self.entries.insert(id, fields);
        self.last_id = id;
        id
    }

    /// Returns `false` when the id is absent (already processed or never existed).
    pub fn delete(&mut self, id: EntryId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn get(&self, id: EntryId) -> Option<Record> {
        self.entries.get(&id).map(|fields| Record {
            id,
            fields: fields.clone(),
        })
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Up to `count` records with id strictly greater than `start`, in id order.
    pub fn range_from(&self, start: EntryId, count: usize) -> Vec<Record> {
        self.entries
            .range((Bound::Excluded(start), Bound::Unbounded))
            .take(count)
            .map(|(id, fields)| Record {
                id: *id,
                fields: fields.clone(),
            })
            .collect()
    }

    pub fn last_id(&self) -> EntryId {
        self.last_id
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

    fn job(name: &str) -> Fields {
        Fields::from([("job", name)])
    }

    #[test]
    fn ids_increase_within_and_across_milliseconds() {
        let mut log = Log::new();
        let a = log.append(job("a"), 10);
        let b = log.append(job("b"), 10);
        let c = log.append(job("c"), 11);
        assert_eq!(a, EntryId::new(10, 0));
        assert_eq!(b, EntryId::new(10, 1));
        assert_eq!(c, EntryId::new(11, 0));
        assert_eq!(log.last_id(), c);
    }

    #[test]
    fn deleted_ids_are_not_reused() {
        let mut log = Log::new();
        let a = log.append(job("a"), 10);
        assert!(log.delete(a));
        assert!(!log.delete(a));
        let b = log.append(job("b"), 10);
        assert!(b > a);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn range_from_is_exclusive_and_restartable() {
        let mut log = Log::new();
        let ids: Vec<_> = (0..5).map(|i| log.append(job(&i.to_string()), 1)).collect();

        let first = log.range_from(EntryId::MIN, 2);
        assert_eq!(first.iter().map(|r| r.id).collect::<Vec<_>>(), &ids[..2]);

        let again = log.range_from(EntryId::MIN, 2);
        assert_eq!(first, again);

        let rest = log.range_from(ids[1], 10);
        assert_eq!(rest.iter().map(|r| r.id).collect::<Vec<_>>(), &ids[2..]);
        assert!(log.range_from(ids[4], 10).is_empty());
    }
}
