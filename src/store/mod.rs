//! The indexed tuple store.
//!
//! Each peer hosts one [`Store`]: the primary tuple collection plus one
//! [field index](index) per indexed position. All matching is content
//! based: a [`Query`] either names a concrete value per position or admits
//! a whole variant through a typed wildcard.
//!
//! Concurrency: the primary collection sits behind a reader/writer lock;
//! destructive matches hold the write half across the whole match-and-remove
//! so they are linearizable at tuple granularity. Each index carries its own
//! lock, acquired in positional order. Blocked readers hang off an
//! insert-epoch condvar which every signalling insert bumps.

mod index;

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, RwLock};

use index::FieldIndex;

use crate::query::Query;
use crate::tuple::Tuple;

/// Number of positional indexes a store maintains. Tuples are referenced
/// from the first `min(arity, INDEXED_FIELDS)` of them and no others.
pub const INDEXED_FIELDS: usize = 3;

/// Stable handle of a stored tuple; ids grow monotonically, so iterating the
/// primary collection in id order is iteration in insertion order.
pub(crate) type TupleId = u64;

#[derive(Debug, Default)]
struct Primary {
    tuples: BTreeMap<TupleId, Tuple>,
    next_id: TupleId,
}

#[derive(Debug, Default)]
struct Signal {
    insert_epoch: u64,
    terminated: bool,
}

/// Per-field match outcome, driving the index walk of [`Store`] queries.
enum FieldMatch {
    /// This index cannot narrow the query (wildcard or missing position).
    Incomparable,
    /// The index proves no tuple matches.
    NotFound,
    /// Oldest fully matching tuple via this index.
    Found(TupleId),
}

////////////////////////////////////////////////////////////////////////////////
// Store
////////////////////////////////////////////////////////////////////////////////

/// Thread-safe, content-addressed tuple repository.
#[derive(Debug, Default)]
pub struct Store {
    primary: RwLock<Primary>,
    indexes: [FieldIndex; INDEXED_FIELDS],
    signal: Mutex<Signal>,
    arrived: Condvar,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `tuple` and wake every blocked reader.
    pub fn insert(&self, tuple: Tuple) {
        self.insert_impl(tuple);
        let mut signal = self.signal.lock().unwrap();
        signal.insert_epoch += 1;
        drop(signal);
        self.arrived.notify_all();
    }

    /// Append `tuple` without waking blocked readers. Used by the
    /// distributed withdrawal protocol to restore a tentatively removed
    /// tuple that no waiter should race for.
    pub fn insert_nosignal(&self, tuple: Tuple) {
        self.insert_impl(tuple);
    }

    fn insert_impl(&self, tuple: Tuple) {
        let mut primary = self.primary.write().unwrap();
        let id = primary.next_id;
        primary.next_id += 1;
        for (position, key) in tuple.values().iter().take(INDEXED_FIELDS).enumerate() {
            self.indexes[position].insert(key.clone(), id);
        }
        log::trace!("store insert #{id}: {tuple}");
        primary.tuples.insert(id, tuple);
    }

    /// Non-destructive, non-blocking match.
    pub fn try_read(&self, query: &Query) -> Option<Tuple> {
        let primary = self.primary.read().unwrap();
        let id = self.find(&primary, query)?;
        primary.tuples.get(&id).cloned()
    }

    /// Destructive, non-blocking match.
    pub fn try_remove(&self, query: &Query) -> Option<Tuple> {
        self.remove_nosignal(query)
    }

    /// Destructive, non-blocking match; the protocol-facing name. Removal
    /// never wakes waiters, so there is no signalling variant to distinguish
    /// from.
    pub fn remove_nosignal(&self, query: &Query) -> Option<Tuple> {
        let mut primary = self.primary.write().unwrap();
        let id = self.find(&primary, query)?;
        let tuple = primary.tuples.remove(&id)?;
        for (position, key) in tuple.values().iter().take(INDEXED_FIELDS).enumerate() {
            self.indexes[position].remove_entry(key, id);
        }
        log::trace!("store remove #{id}: {tuple}");
        Some(tuple)
    }

    /// Blocking non-destructive match: suspends the caller until a matching
    /// tuple is inserted.
    ///
    /// # Panics
    /// If the store is terminated before or while waiting.
    pub fn read(&self, query: &Query) -> Tuple {
        match self.wait_read(query) {
            Some(tuple) => tuple,
            None => panic!("tuple store terminated while reading {query}"),
        }
    }

    /// Blocking destructive match.
    ///
    /// # Panics
    /// If the store is terminated before or while waiting.
    pub fn remove(&self, query: &Query) -> Tuple {
        match self.wait_remove(query) {
            Some(tuple) => tuple,
            None => panic!("tuple store terminated while removing {query}"),
        }
    }

    /// Blocking non-destructive match; `None` reports termination instead of
    /// panicking. Worker threads use this so shutdown unwinds them cleanly.
    pub(crate) fn wait_read(&self, query: &Query) -> Option<Tuple> {
        self.wait_match(query, Self::try_read)
    }

    /// Blocking destructive match; `None` reports termination.
    pub(crate) fn wait_remove(&self, query: &Query) -> Option<Tuple> {
        self.wait_match(query, Self::try_remove)
    }

    fn wait_match(
        &self,
        query: &Query,
        attempt: impl Fn(&Self, &Query) -> Option<Tuple>,
    ) -> Option<Tuple> {
        loop {
            let seen = {
                let signal = self.signal.lock().unwrap();
                if signal.terminated {
                    return None;
                }
                signal.insert_epoch
            };
            if let Some(tuple) = attempt(self, query) {
                return Some(tuple);
            }
            let mut signal = self.signal.lock().unwrap();
            while signal.insert_epoch == seen && !signal.terminated {
                signal = self.arrived.wait(signal).unwrap();
            }
            if signal.terminated {
                return None;
            }
        }
    }

    /// Wake and abort every blocked reader; blocking operations issued after
    /// this panic (public) or report closure (internal).
    pub fn terminate(&self) {
        let mut signal = self.signal.lock().unwrap();
        signal.terminated = true;
        drop(signal);
        self.arrived.notify_all();
    }

    pub fn len(&self) -> usize {
        self.primary.read().unwrap().tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The index walk: ask each positional index in turn; a concrete
    /// position either proves absence or yields the oldest full match, a
    /// wildcard position cannot narrow. All-wildcard queries fall through to
    /// a linear scan of the primary collection in insertion order.
    fn find(&self, primary: &Primary, query: &Query) -> Option<TupleId> {
        for position in 0..INDEXED_FIELDS {
            match self.find_via_field(primary, query, position) {
                FieldMatch::Incomparable => continue,
                FieldMatch::NotFound => return None,
                FieldMatch::Found(id) => return Some(id),
            }
        }
        primary
            .tuples
            .iter()
            .find(|(_, tuple)| query.matches(tuple))
            .map(|(&id, _)| id)
    }

    fn find_via_field(&self, primary: &Primary, query: &Query, position: usize) -> FieldMatch {
        let Some(field) = query.field(position) else {
            return FieldMatch::Incomparable;
        };
        if !field.indexable() {
            return FieldMatch::Incomparable;
        }
        let crate::query::Field::Exact(key) = field else {
            unreachable!("indexable fields are exact");
        };
        // every full match holds `key` at `position`, so its bucket is
        // exhaustive: an empty scan proves absence
        let found = self.indexes[position].find_first(key, |id| {
            primary.tuples.get(&id).is_some_and(|tuple| query.matches(tuple))
        });
        match found {
            Some(id) => FieldMatch::Found(id),
            None => FieldMatch::NotFound,
        }
    }
}
