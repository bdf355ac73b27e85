//! Derived sequences that mirror an observable source.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::collection::RecordId;
use crate::engine::SyncedCollection;
use crate::observable::{ChangeCallback, CollectionChange, ObservableVec, SubscriptionId};

/// A sequence of values derived one-to-one from a source sequence.
///
/// Feed it every change of the source through [`MappedCollection::apply`]
/// and it stays index-aligned with the source, mapping only the items that
/// were added. Derived values therefore keep their identity across moves,
/// and subscribers see the same structural edits as the source's.
pub struct MappedCollection<T, V> {
    items: ObservableVec<V>,
    map: Arc<dyn Fn(&T) -> V + Send + Sync>,
}

impl<T, V: Clone> MappedCollection<T, V> {
    pub fn new(map: impl Fn(&T) -> V + Send + Sync + 'static) -> Self {
        Self {
            items: ObservableVec::new(),
            map: Arc::new(map),
        }
    }

    /// Map every item of `source` without emitting notifications.
    pub fn from_source(source: &[T], map: impl Fn(&T) -> V + Send + Sync + 'static) -> Self {
        let items = source.iter().map(&map).collect();
        Self {
            items: ObservableVec::from_vec(items),
            map: Arc::new(map),
        }
    }

    /// Apply one change of the source.
    ///
    /// `source` is the source sequence after the change; it is only read on
    /// `Reset`. Returns the derived value dropped by a `Removed`.
    pub fn apply(&mut self, change: &CollectionChange<T>, source: &[T]) -> Option<V> {
        match change {
            CollectionChange::Added { index, item } => {
                self.items.insert(*index, (self.map)(item));
                None
            }
            CollectionChange::Removed { index, .. } => Some(self.items.remove(*index)),
            CollectionChange::Moved {
                old_index,
                new_index,
                ..
            } => {
                self.items.move_item(*old_index, *new_index);
                None
            }
            CollectionChange::Reset => {
                self.rebuild(source);
                None
            }
        }
    }

    /// Re-map the whole source, emitting one `Reset`.
    pub fn rebuild(&mut self, source: &[T]) {
        let items = source.iter().map(|item| (self.map)(item)).collect();
        self.items.reset(items);
    }

    pub fn subscribe(&mut self, callback: ChangeCallback<V>) -> SubscriptionId {
        self.items.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.items.unsubscribe(id)
    }
}

impl<T, V> Deref for MappedCollection<T, V> {
    type Target = [V];

    fn deref(&self) -> &[V] {
        &self.items
    }
}

impl<T, V: fmt::Debug> fmt::Debug for MappedCollection<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

type RecordMapFn<R, V> = dyn Fn(RecordId, &R) -> V + Send + Sync;

/// Derived values for the view of a [`SyncedCollection`].
///
/// The mapping receives the record behind each view id, so a derived value
/// can be built from record state. A value is built once, when its id enters
/// the view, and keeps its identity while the id moves.
pub struct MappedView<R, V> {
    items: ObservableVec<V>,
    map: Arc<RecordMapFn<R, V>>,
}

impl<R: Send + 'static, V: Clone> MappedView<R, V> {
    /// Map the collection's current view.
    pub fn new(
        collection: &SyncedCollection<R>,
        map: impl Fn(RecordId, &R) -> V + Send + Sync + 'static,
    ) -> Self {
        let map: Arc<RecordMapFn<R, V>> = Arc::new(map);
        let items = map_view(map.as_ref(), collection);
        Self {
            items: ObservableVec::from_vec(items),
            map,
        }
    }

    /// Apply view changes collected since the last call.
    ///
    /// `collection` is read as it is now, after the last change. A value
    /// removed and re-added within the batch is reused, so records the view
    /// only reordered keep their derived values. A `Reset`, or an added id
    /// whose record is already gone, rebuilds everything from the current
    /// view and ends the batch.
    pub fn apply_changes(
        &mut self,
        changes: impl IntoIterator<Item = CollectionChange<RecordId>>,
        collection: &SyncedCollection<R>,
    ) {
        let mut detached: HashMap<RecordId, V> = HashMap::new();
        for change in changes {
            match change {
                CollectionChange::Added { index, item } => {
                    let value = match detached.remove(&item) {
                        Some(value) => value,
                        None => match collection.get(item) {
                            Some(record) => (self.map)(item, record),
                            None => {
                                self.rebuild(collection);
                                return;
                            }
                        },
                    };
                    self.items.insert(index, value);
                }
                CollectionChange::Removed { index, item } => {
                    detached.insert(item, self.items.remove(index));
                }
                CollectionChange::Moved {
                    old_index,
                    new_index,
                    ..
                } => self.items.move_item(old_index, new_index),
                CollectionChange::Reset => {
                    self.rebuild(collection);
                    return;
                }
            }
        }
    }

    /// Re-map the whole view, emitting one `Reset`.
    pub fn rebuild(&mut self, collection: &SyncedCollection<R>) {
        let items = map_view(self.map.as_ref(), collection);
        self.items.reset(items);
    }

    pub fn subscribe(&mut self, callback: ChangeCallback<V>) -> SubscriptionId {
        self.items.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.items.unsubscribe(id)
    }
}

fn map_view<R: Send + 'static, V>(
    map: &RecordMapFn<R, V>,
    collection: &SyncedCollection<R>,
) -> Vec<V> {
    collection
        .view()
        .iter()
        .filter_map(|id| collection.get(*id).map(|record| map(*id, record)))
        .collect()
}

impl<R, V> Deref for MappedView<R, V> {
    type Target = [V];

    fn deref(&self) -> &[V] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::RecordingSink;
    use crate::reorder::reorder;
    use crate::source::MemorySource;
    use crate::test_support::{people, Person, PersonAccessor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_mirrors_reorder_edits() {
        let sink = RecordingSink::new();
        let mut source = ObservableVec::from_vec(vec![1u32, 2, 3]);
        source.subscribe(sink.callback());
        let mut rows = MappedCollection::from_source(&source[..], |n: &u32| format!("row {}", n));

        reorder(&mut source, &[3, 1, 4]);
        for change in sink.take() {
            rows.apply(&change, &source);
        }

        assert_eq!(&*rows, &["row 3", "row 1", "row 4"]);
    }

    #[test]
    fn test_only_added_items_are_mapped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut rows = MappedCollection::new(move |n: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            *n * 10
        });

        let mut source = ObservableVec::new();
        let sink = RecordingSink::new();
        source.subscribe(sink.callback());
        source.push(1u32);
        source.push(2);
        source.move_item(0, 1);
        for change in sink.take() {
            rows.apply(&change, &source);
        }

        assert_eq!(&*rows, &[20, 10]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_removed_value_is_returned() {
        let mut rows = MappedCollection::from_source(&[7u32, 8], |n: &u32| *n + 1);
        let removed = rows.apply(&CollectionChange::Removed { index: 0, item: 7 }, &[8]);
        assert_eq!(removed, Some(8));
        assert_eq!(&*rows, &[9]);
    }

    fn synced_people(
        records: Vec<Person>,
        source: Arc<MemorySource<Person>>,
    ) -> SyncedCollection<Person> {
        SyncedCollection::<Person>::builder()
            .accessor(PersonAccessor)
            .key_fields(["id"])
            .default_factory()
            .shared_source(source)
            .records(records)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_view_rows_follow_refresh() {
        let source = Arc::new(MemorySource::new(people(&[(2, "B2"), (3, "C")])));
        let mut collection = synced_people(people(&[(1, "A"), (2, "B")]), source);
        let sink = RecordingSink::new();
        collection.subscribe_view(sink.callback());

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut rows = MappedView::new(&collection, move |id, person: &Person| {
            counter.fetch_add(1, Ordering::SeqCst);
            (id, person.name.to_uppercase())
        });
        let b = collection.view()[1];
        assert_eq!(rows[1], (b, "B".to_string()));

        collection.refresh().await.unwrap();
        rows.apply_changes(sink.take(), &collection);

        let ids: Vec<RecordId> = rows.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, collection.view());
        assert_eq!(rows[0], (b, "B".to_string()), "reordered row is reused");
        assert_eq!(rows[1].1, "C");
        assert_eq!(calls.load(Ordering::SeqCst), 3, "only the new record is mapped");
    }

    #[test]
    fn test_view_rows_rebuild_on_reset() {
        let source = Arc::new(MemorySource::new(Vec::new()));
        let mut collection = synced_people(people(&[(1, "A")]), source);
        let mut rows = MappedView::new(&collection, |_, person: &Person| person.name.clone());

        collection.apply_snapshot(people(&[(1, "A"), (2, "B")])).unwrap();
        rows.apply_changes(vec![CollectionChange::Reset], &collection);

        assert_eq!(&*rows, &["A", "B"]);
    }

    #[test]
    fn test_reset_rebuilds_and_notifies() {
        let mut rows = MappedCollection::from_source(&[1u32], |n: &u32| *n);
        let sink = RecordingSink::new();
        rows.subscribe(sink.callback());

        rows.apply(&CollectionChange::Reset, &[4, 5]);

        assert_eq!(&*rows, &[4, 5]);
        assert_eq!(sink.events(), vec![CollectionChange::Reset]);
    }
}
