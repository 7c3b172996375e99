//! Positional field index.
//!
//! One [`FieldIndex`] exists per indexed tuple position. It is a key-ordered
//! multi-map from the field [`Value`] to the handles of every stored tuple
//! carrying that value at the position, preserving insertion order among
//! duplicates so that matches always yield the oldest remaining tuple.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use crate::value::Value;

use super::TupleId;

#[derive(Debug, Default)]
pub(crate) struct FieldIndex {
    entries: Mutex<BTreeMap<Value, VecDeque<TupleId>>>,
}

impl FieldIndex {
    /// Register `id` under `key`, behind any handle already sharing the key.
    pub(crate) fn insert(&self, key: Value, id: TupleId) {
        let mut entries = self.entries.lock().unwrap();
        entries.entry(key).or_default().push_back(id);
    }

    /// The oldest handle under `key` accepted by `pred`, if any.
    pub(crate) fn find_first(
        &self,
        key: &Value,
        mut pred: impl FnMut(TupleId) -> bool,
    ) -> Option<TupleId> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)?
            .iter()
            .copied()
            .find(|&id| pred(id))
    }

    /// Drop `id` from the bucket of `key`. Returns whether the handle was
    /// present; an empty bucket is removed so the key set stays tight.
    pub(crate) fn remove_entry(&self, key: &Value, id: TupleId) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let Some(bucket) = entries.get_mut(key) else {
            return false;
        };
        let Some(at) = bucket.iter().position(|&held| held == id) else {
            return false;
        };
        bucket.remove(at);
        if bucket.is_empty() {
            entries.remove(key);
        }
        true
    }

    /// Total number of handles held, across all keys.
    #[cfg(test)]
    pub(crate) fn handle_count(&self) -> usize {
        let entries = self.entries.lock().unwrap();
        entries.values().map(VecDeque::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn duplicates_keep_insertion_order() {
        let index = FieldIndex::default();
        index.insert(Value::from("k"), 1);
        index.insert(Value::from("k"), 2);
        index.insert(Value::from("k"), 3);

        assert_eq!(index.find_first(&Value::from("k"), |_| true), Some(1));
        assert_eq!(index.find_first(&Value::from("k"), |id| id > 1), Some(2));
        assert_eq!(index.find_first(&Value::from("other"), |_| true), None);
    }

    #[test]
    fn remove_entry_drops_exactly_one_handle() {
        let index = FieldIndex::default();
        index.insert(Value::from(7i32), 10);
        index.insert(Value::from(7i32), 11);

        assert!(index.remove_entry(&Value::from(7i32), 10));
        assert!(!index.remove_entry(&Value::from(7i32), 10));
        assert_eq!(index.handle_count(), 1);

        assert!(index.remove_entry(&Value::from(7i32), 11));
        assert_eq!(index.handle_count(), 0);
        // the bucket itself is gone
        assert_eq!(index.find_first(&Value::from(7i32), |_| true), None);
    }
}
