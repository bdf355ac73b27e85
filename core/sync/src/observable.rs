//! Observable ordered sequences with structural change notifications.
//!
//! Every mutation of an [`ObservableVec`] goes through one of its native
//! primitives (`push`, `insert`, `remove`, `move_item`, `reset`) and fires
//! exactly one [`CollectionChange`] to each subscriber, synchronously and in
//! subscription order.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

/// A structural change to an observable sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionChange<T> {
    /// `item` was inserted at `index`.
    Added { index: usize, item: T },
    /// `item` was removed from `index`.
    Removed { index: usize, item: T },
    /// `item` moved from `old_index` to `new_index`.
    Moved {
        old_index: usize,
        new_index: usize,
        item: T,
    },
    /// The whole sequence was replaced; observers must re-read it.
    Reset,
}

/// A unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback invoked for every structural change.
///
/// Callbacks run while the sequence is mid-mutation and should not block.
pub type ChangeCallback<T> = Arc<dyn Fn(&CollectionChange<T>) + Send + Sync>;

/// An ordered sequence that reports its structural changes.
///
/// Read access goes through `Deref<Target = [T]>`. There is no mutable
/// deref; every write is one of the notifying primitives.
pub struct ObservableVec<T> {
    items: Vec<T>,
    subscribers: Vec<(SubscriptionId, ChangeCallback<T>)>,
    next_id: SubscriptionId,
}

impl<T: Clone> ObservableVec<T> {
    /// Create an empty sequence with no subscribers.
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Wrap existing items without emitting notifications.
    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            items,
            subscribers: Vec::new(),
            next_id: 1,
        }
    }

    /// Subscribe to structural changes.
    ///
    /// Returns a subscription ID that can be used to unsubscribe later.
    pub fn subscribe(&mut self, callback: ChangeCallback<T>) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push((id, callback));
        id
    }

    /// Returns `true` if the subscription was found and removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
        self.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Append an item.
    pub fn push(&mut self, item: T) {
        let index = self.items.len();
        self.insert(index, item);
    }

    /// Insert an item at `index`, shifting later items right.
    ///
    /// # Panics
    /// If `index > len`.
    pub fn insert(&mut self, index: usize, item: T) {
        self.items.insert(index, item.clone());
        self.emit(&CollectionChange::Added { index, item });
    }

    /// Remove and return the item at `index`.
    ///
    /// # Panics
    /// If `index >= len`.
    pub fn remove(&mut self, index: usize) -> T {
        let item = self.items.remove(index);
        self.emit(&CollectionChange::Removed {
            index,
            item: item.clone(),
        });
        item
    }

    /// Move the item at `old_index` so it ends up at `new_index`.
    ///
    /// # Panics
    /// If either index is out of bounds.
    pub fn move_item(&mut self, old_index: usize, new_index: usize) {
        if old_index == new_index {
            assert!(old_index < self.items.len(), "move index out of bounds");
            return;
        }
        let item = self.items.remove(old_index);
        self.items.insert(new_index, item.clone());
        self.emit(&CollectionChange::Moved {
            old_index,
            new_index,
            item,
        });
    }

    /// Replace the whole content, emitting a single `Reset`.
    pub fn reset(&mut self, items: Vec<T>) {
        self.items = items;
        self.emit(&CollectionChange::Reset);
    }

    /// Consume the sequence, returning its items.
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }

    fn emit(&self, change: &CollectionChange<T>) {
        for (_, callback) in &self.subscribers {
            callback(change);
        }
    }
}

impl<T: Clone + PartialEq> ObservableVec<T> {
    /// Index of the first item equal to `item`.
    pub fn position(&self, item: &T) -> Option<usize> {
        self.items.iter().position(|x| x == item)
    }
}

impl<T: Clone> Default for ObservableVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deref for ObservableVec<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T: fmt::Debug> fmt::Debug for ObservableVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableVec")
            .field("items", &self.items)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Collects every change it is notified of. Mostly useful in tests.
pub struct RecordingSink<T> {
    events: Arc<Mutex<Vec<CollectionChange<T>>>>,
}

impl<T: Clone + Send + 'static> RecordingSink<T> {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A callback that appends to this sink.
    pub fn callback(&self) -> ChangeCallback<T> {
        let events = self.events.clone();
        Arc::new(move |change: &CollectionChange<T>| {
            if let Ok(mut events) = events.lock() {
                events.push(change.clone());
            }
        })
    }

    /// Snapshot of the changes recorded so far.
    pub fn events(&self) -> Vec<CollectionChange<T>> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Drain the recorded changes.
    pub fn take(&self) -> Vec<CollectionChange<T>> {
        self.events
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }
}

impl<T: Clone + Send + 'static> Default for RecordingSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for RecordingSink<T> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
        }
    }
}
