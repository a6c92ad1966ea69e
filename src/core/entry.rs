//! Entry identity and the typed view over stored string fields.

use std::fmt;
use std::str::FromStr;

use crate::core::error::QueueError;

/// Reserved field holding the due time (epoch ms) of a delay-scheduled entry.
pub const DUE_AT_FIELD: &str = "due_at";

/// Monotonic `(timestamp, sequence)` identifier, rendered as `"<ms>-<seq>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntryId {
    pub ms: u64,
    pub seq: u64,
}

impl EntryId {
    /// Sorts before every id a log can assign.
    pub const MIN: EntryId = EntryId { ms: 0, seq: 0 };

    pub const fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// The smallest id strictly greater than `last` that is not older than `now_ms`.
    pub fn next_after(last: EntryId, now_ms: u64) -> EntryId {
        if now_ms > last.ms {
            EntryId::new(now_ms, 0)
        } else {
            EntryId::new(last.ms, last.seq + 1)
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || QueueError::InvalidId(s.to_string());
        match s.split_once('-') {
            Some((ms, seq)) => Ok(EntryId::new(
                ms.parse().map_err(|_| invalid())?,
                seq.parse().map_err(|_| invalid())?,
            )),
            None => Ok(EntryId::new(s.parse().map_err(|_| invalid())?, 0)),
        }
    }
}

/// Where a new consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartId {
    /// Deliver every entry with an id greater than this one (`"0"` = everything).
    After(EntryId),
    /// Deliver only entries appended after the group is created (`"$"`).
    Latest,
}

impl FromStr for StartId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "$" => Ok(StartId::Latest),
            other => other.parse().map(StartId::After),
        }
    }
}

/// Ordered string → string mapping, preserving producer insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fields(Vec<(String, String)>);

impl Fields {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Sets `key`, replacing an existing value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Fields {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl fmt::Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in self.iter() {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}

/// A log record exactly as stored: id plus raw fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: EntryId,
    pub fields: Fields,
}

/// Parses a reserved due-time value (epoch ms).
pub fn parse_due_at(raw: &str) -> Option<u64> {
    raw.trim().parse().ok()
}

impl Record {
    /// Reads the reserved due-time field, if any.
    pub fn due_at(&self) -> Result<Option<u64>, QueueError> {
        match self.fields.get(DUE_AT_FIELD) {
            None => Ok(None),
            Some(raw) => parse_due_at(raw)
                .map(Some)
                .ok_or_else(|| QueueError::MalformedEntry {
                    id: self.id,
                    reason: format!("unparsable {DUE_AT_FIELD} '{raw}'"),
                }),
        }
    }

    /// Splits into the typed view, or hands the record back with the reason it is malformed.
    pub fn into_entry(self) -> Result<Entry, (Record, QueueError)> {
        match self.due_at() {
            Ok(due_at) => {
                let mut fields = self.fields;
                fields.remove(DUE_AT_FIELD);
                Ok(Entry {
                    id: self.id,
                    fields,
                    due_at,
                })
            }
            Err(err) => Err((self, err)),
        }
    }
}

/// Validated view of a record handed to consumers and handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    /// Producer fields, without the reserved due-time field.
    pub fields: Fields,
    pub due_at: Option<u64>,
}

impl Entry {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key)
    }
}

impl TryFrom<Record> for Entry {
    type Error = QueueError;

    fn try_from(record: Record) -> Result<Self, Self::Error> {
        record.into_entry().map_err(|(_, err)| err)
    }
}

/// An entry handed out for processing, with how many times it has been handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub entry: Entry,
    pub delivery_count: u32,
}

impl Delivery {
    /// Consumers use this to detect possible duplicates.
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}
