//! The live collection: the authoritative, identity-stable record set.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::observable::{ChangeCallback, ObservableVec, SubscriptionId};

/// Stable identity of a record inside a [`LiveCollection`].
///
/// An id is assigned when a record is inserted and never reused by the same
/// collection, so observers can hold on to it (for selection state, say)
/// across any number of refresh cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(u64);

impl RecordId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Ordered records with stable identity.
///
/// This is the only place records are created or destroyed. Records are
/// mutated in place; inserts and removals are reported through the order
/// sequence's subscribers as `CollectionChange<RecordId>`s.
pub struct LiveCollection<R> {
    records: HashMap<RecordId, R>,
    order: ObservableVec<RecordId>,
    next_id: u64,
}

impl<R> LiveCollection<R> {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            order: ObservableVec::new(),
            next_id: 1,
        }
    }

    /// Build a collection from records without emitting notifications.
    pub fn from_records(records: impl IntoIterator<Item = R>) -> Self {
        let mut collection = Self::new();
        let mut order = Vec::new();
        for record in records {
            let id = collection.allocate_id();
            collection.records.insert(id, record);
            order.push(id);
        }
        collection.order = ObservableVec::from_vec(order);
        collection
    }

    fn allocate_id(&mut self) -> RecordId {
        let id = RecordId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn get(&self, id: RecordId) -> Option<&R> {
        self.records.get(&id)
    }

    /// Mutable access for in-place edits. Identity is unaffected.
    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut R> {
        self.records.get_mut(&id)
    }

    /// Record ids in collection order.
    pub fn ids(&self) -> &[RecordId] {
        &self.order
    }

    /// Position of a record in collection order.
    pub fn position(&self, id: RecordId) -> Option<usize> {
        self.order.position(&id)
    }

    /// Iterate over `(id, record)` pairs in collection order.
    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &R)> + '_ {
        self.order
            .iter()
            .filter_map(move |id| self.records.get(id).map(|r| (*id, r)))
    }

    /// Iterate over records in collection order.
    pub fn records(&self) -> impl Iterator<Item = &R> + '_ {
        self.iter().map(|(_, r)| r)
    }

    /// Append a record, returning its new identity.
    pub fn insert(&mut self, record: R) -> RecordId {
        let id = self.allocate_id();
        self.records.insert(id, record);
        self.order.push(id);
        id
    }

    /// Remove a record. Returns `None` if the id is unknown.
    pub fn remove(&mut self, id: RecordId) -> Option<R> {
        let index = self.order.position(&id)?;
        self.order.remove(index);
        self.records.remove(&id)
    }

    /// Subscribe to inserts and removals.
    pub fn subscribe(&mut self, callback: ChangeCallback<RecordId>) -> SubscriptionId {
        self.order.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.order.unsubscribe(id)
    }
}

impl<R> Default for LiveCollection<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: fmt::Debug> fmt::Debug for LiveCollection<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
