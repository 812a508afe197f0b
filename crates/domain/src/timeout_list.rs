//! TimeoutList — a list whose entries vanish after a per-entry lifetime.
//!
//! Backs the state observers: every command a rule sends is recorded here
//! with a short lifetime, and incoming state changes are matched against the
//! recorded values to tell the rule's own echoes from manual actions.
//!
//! Expiry is lazy: entries are purged at the start of every reading
//! operation, so all reads take the current time as an argument and
//! therefore borrow `self` mutably.

use std::time::Duration;

use crate::time::{Timestamp, after};

/// Errors from explicit element removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutListError {
    #[error("value not found")]
    ValueNotFound,

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Timestamp,
}

/// An ordered list of values, each with its own expiry.
#[derive(Debug, Clone)]
pub struct TimeoutList<V> {
    entries: Vec<Entry<V>>,
}

impl<V> Default for TimeoutList<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TimeoutList<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append `value`, keeping it alive for `ttl` from `now`.
    pub fn push(&mut self, value: V, ttl: Duration, now: Timestamp) {
        self.entries.push(Entry {
            value,
            expires_at: after(now, ttl),
        });
    }

    /// Remove and return the entry at `index`, counting live entries only.
    ///
    /// # Errors
    ///
    /// Returns [`TimeoutListError::IndexOutOfRange`] when `index` is past the
    /// end of the live entries.
    pub fn pop(&mut self, index: usize, now: Timestamp) -> Result<V, TimeoutListError> {
        self.purge(now);
        if index >= self.entries.len() {
            return Err(TimeoutListError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        Ok(self.entries.remove(index).value)
    }

    /// Number of live entries.
    pub fn len(&mut self, now: Timestamp) -> usize {
        self.purge(now);
        self.entries.len()
    }

    /// Whether no live entry remains.
    pub fn is_empty(&mut self, now: Timestamp) -> bool {
        self.len(now) == 0
    }

    /// The live entry at `index`, if any.
    pub fn get(&mut self, index: usize, now: Timestamp) -> Option<&V> {
        self.purge(now);
        self.entries.get(index).map(|entry| &entry.value)
    }

    /// All live values in insertion order. Expiries are never exposed.
    pub fn values(&mut self, now: Timestamp) -> impl Iterator<Item = &V> {
        self.purge(now);
        self.entries.iter().map(|entry| &entry.value)
    }

    fn purge(&mut self, now: Timestamp) {
        self.entries.retain(|entry| entry.expires_at > now);
    }
}

impl<V: PartialEq> TimeoutList<V> {
    /// Remove and return the first entry equal to `value`.
    ///
    /// Matching is by equality only: an entry that has expired but has not
    /// been purged yet is still found.
    ///
    /// # Errors
    ///
    /// Returns [`TimeoutListError::ValueNotFound`] when no entry matches.
    pub fn remove(&mut self, value: &V) -> Result<V, TimeoutListError> {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.value == *value)
            .ok_or(TimeoutListError::ValueNotFound)?;
        Ok(self.entries.remove(position).value)
    }

    /// Remove and return the first live entry equal to `value`.
    ///
    /// Expired entries are purged first, so a stale entry never matches.
    ///
    /// # Errors
    ///
    /// Returns [`TimeoutListError::ValueNotFound`] when no live entry
    /// matches.
    pub fn take(&mut self, value: &V, now: Timestamp) -> Result<V, TimeoutListError> {
        self.purge(now);
        self.remove(value)
    }

    /// Whether a live entry equal to `value` exists.
    pub fn contains(&mut self, value: &V, now: Timestamp) -> bool {
        self.purge(now);
        self.entries.iter().any(|entry| entry.value == *value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::now;

    const TTL: Duration = Duration::from_secs(20);

    #[test]
    fn should_keep_values_until_expiry() {
        let start = now();
        let mut list = TimeoutList::new();
        list.push(80.0, TTL, start);
        list.push(40.0, TTL, start);

        let just_before = after(start, Duration::from_secs(19));
        assert_eq!(list.len(just_before), 2);
        assert!(list.contains(&80.0, just_before));
    }

    #[test]
    fn should_purge_expired_values_on_read() {
        let start = now();
        let mut list = TimeoutList::new();
        list.push("a", Duration::from_secs(5), start);
        list.push("b", TTL, start);

        let later = after(start, Duration::from_secs(5));
        assert_eq!(list.values(later).copied().collect::<Vec<_>>(), vec!["b"]);
        assert!(!list.contains(&"a", later));
    }

    #[test]
    fn should_remove_first_matching_value_only() {
        let start = now();
        let mut list = TimeoutList::new();
        list.push(1, TTL, start);
        list.push(2, TTL, start);
        list.push(1, TTL, start);

        assert_eq!(list.remove(&1), Ok(1));
        assert_eq!(list.values(start).copied().collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn should_error_when_removing_missing_value() {
        let mut list = TimeoutList::<i32>::new();
        assert_eq!(list.remove(&7), Err(TimeoutListError::ValueNotFound));
    }

    #[test]
    fn should_remove_value_even_when_already_expired() {
        let start = now();
        let mut list = TimeoutList::new();
        list.push("stale", Duration::ZERO, start);
        assert_eq!(list.remove(&"stale"), Ok("stale"));
    }

    #[test]
    fn should_take_live_values_but_never_expired_ones() {
        let start = now();
        let mut list = TimeoutList::new();
        list.push("stale", Duration::ZERO, start);
        list.push("live", TTL, start);

        assert_eq!(
            list.take(&"stale", start),
            Err(TimeoutListError::ValueNotFound)
        );
        assert_eq!(list.take(&"live", start), Ok("live"));
    }

    #[test]
    fn should_pop_by_index_counting_live_entries_only() {
        let start = now();
        let mut list = TimeoutList::new();
        list.push("short", Duration::from_secs(1), start);
        list.push("long", TTL, start);

        let later = after(start, Duration::from_secs(2));
        assert_eq!(list.pop(0, later), Ok("long"));
        assert!(list.is_empty(later));
    }

    #[test]
    fn should_error_when_index_out_of_range() {
        let start = now();
        let mut list = TimeoutList::new();
        list.push(1, TTL, start);
        assert_eq!(
            list.pop(3, start),
            Err(TimeoutListError::IndexOutOfRange { index: 3, len: 1 })
        );
    }

    #[test]
    fn should_expose_values_in_insertion_order() {
        let start = now();
        let mut list = TimeoutList::new();
        list.push(3, TTL, start);
        list.push(1, TTL, start);
        list.push(2, TTL, start);
        assert_eq!(list.values(start).copied().collect::<Vec<_>>(), vec![3, 1, 2]);
    }

    #[test]
    fn should_report_empty_after_all_entries_expire() {
        let start = now();
        let mut list = TimeoutList::new();
        list.push(1, Duration::from_secs(3), start);
        list.push(2, Duration::from_secs(3), start);

        let later = after(start, Duration::from_secs(3));
        assert!(list.is_empty(later));
        assert_eq!(list.get(0, later), None);
    }
}
