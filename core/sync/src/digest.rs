//! Collection reconciler.
//!
//! Applies a change list to a [`LiveCollection`] in three passes (deletes,
//! then updates, then adds, each in change order) while leaving every
//! record that is not being added in place, so its [`RecordId`] survives.
//!
//! Field writes follow two rules:
//! - **Divergence wins.** An update only overwrites a field whose current
//!   value still equals the old value recorded in the diff. A field edited
//!   locally since the baseline was captured is left alone.
//! - **Ignore on failure.** A write the record rejects is skipped and
//!   counted; it never aborts the remaining writes or the digest.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

use rox_common::{Key, Value};

use crate::collection::{LiveCollection, RecordId};
use crate::diff::{Change, FieldDiff};
use crate::schema::{read, RecordAccessor, RecordFactory, Schema};

/// What a digest did to the collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestReport {
    /// Records created.
    pub added: usize,
    /// Existing records that received at least one write attempt. A record
    /// whose every diffed field diverged is not counted.
    pub updated: usize,
    /// Records removed.
    pub deleted: usize,
    /// Updates whose record was missing and was created instead.
    pub corrective_adds: usize,
    /// Adds whose record already existed and was updated instead.
    pub corrective_updates: usize,
    /// Fields left untouched because they changed locally.
    pub diverged_fields: usize,
    /// Field writes the record refused.
    pub rejected_writes: usize,
}

impl DigestReport {
    /// Total number of structural or field-level edits.
    pub fn total_changes(&self) -> usize {
        self.added + self.updated + self.deleted
    }
}

/// Key index over the live collection, in collection order per key.
struct KeyIndex(HashMap<Key, Vec<RecordId>>);

impl KeyIndex {
    fn build<R>(
        collection: &LiveCollection<R>,
        schema: &Schema,
        accessor: &dyn RecordAccessor<R>,
    ) -> Self {
        let mut index: HashMap<Key, Vec<RecordId>> = HashMap::with_capacity(collection.len());
        for (id, record) in collection.iter() {
            index
                .entry(schema.key_of(accessor, record))
                .or_default()
                .push(id);
        }
        Self(index)
    }

    fn find(&self, key: &Key) -> Option<RecordId> {
        self.0.get(key).and_then(|ids| ids.first().copied())
    }

    fn take(&mut self, key: &Key) -> Option<RecordId> {
        let ids = self.0.get_mut(key)?;
        if ids.is_empty() {
            None
        } else {
            Some(ids.remove(0))
        }
    }

    fn push(&mut self, key: Key, id: RecordId) {
        self.0.entry(key).or_default().push(id);
    }
}

/// Apply `changes` to `target`.
///
/// - `Delete` removes the matching record; a missing record is not an error.
/// - `Update` writes diffed fields under the divergence rule. If the record
///   is missing it is created from the key and the new values instead.
/// - `Add` creates a record from the key and every field. If a record with
///   that key already exists, the fields are applied as an update whose old
///   values are `Null`, so only empty fields get filled.
pub fn digest<R>(
    target: &mut LiveCollection<R>,
    changes: &[Change],
    factory: &dyn RecordFactory<R>,
    schema: &Schema,
    accessor: &dyn RecordAccessor<R>,
) -> DigestReport {
    let mut report = DigestReport::default();
    let mut index = KeyIndex::build(target, schema, accessor);

    for change in changes {
        if let Change::Delete { key } = change {
            match index.take(key) {
                Some(id) => {
                    target.remove(id);
                    report.deleted += 1;
                }
                None => trace!(%key, "Delete of absent record ignored"),
            }
        }
    }

    for change in changes {
        if let Change::Update { key, diffs } = change {
            match index.find(key) {
                Some(id) => {
                    if let Some(record) = target.get_mut(id) {
                        if apply_update(record, diffs, accessor, &mut report) {
                            report.updated += 1;
                        }
                    }
                }
                None => {
                    debug!(%key, "Update for missing record, creating it");
                    let values = diffs.iter().map(|d| (d.field.as_str(), &d.new));
                    let id = create(target, key, values, factory, accessor, &mut report);
                    index.push(key.clone(), id);
                    report.added += 1;
                    report.corrective_adds += 1;
                }
            }
        }
    }

    for change in changes {
        if let Change::Add { key, fields } = change {
            match index.find(key) {
                None => {
                    let values = fields.iter().map(|f| (f.field.as_str(), &f.value));
                    let id = create(target, key, values, factory, accessor, &mut report);
                    index.push(key.clone(), id);
                    report.added += 1;
                }
                Some(id) => {
                    debug!(%key, "Add for existing record, updating it");
                    if let Some(record) = target.get_mut(id) {
                        let diffs: Vec<FieldDiff> = fields
                            .iter()
                            .map(|f| FieldDiff::new(f.field.clone(), f.value.clone(), Value::Null))
                            .collect();
                        if apply_update(record, &diffs, accessor, &mut report) {
                            report.updated += 1;
                        }
                        report.corrective_updates += 1;
                    }
                }
            }
        }
    }

    debug!(
        added = report.added,
        updated = report.updated,
        deleted = report.deleted,
        diverged = report.diverged_fields,
        rejected = report.rejected_writes,
        "Digest applied"
    );
    report
}

/// Returns whether any write was attempted.
fn apply_update<R>(
    record: &mut R,
    diffs: &[FieldDiff],
    accessor: &dyn RecordAccessor<R>,
    report: &mut DigestReport,
) -> bool {
    let mut attempted = false;
    for diff in diffs {
        let current = read(accessor, record, &diff.field);
        if current != diff.old {
            trace!(
                field = %diff.field,
                %current,
                expected = %diff.old,
                "Field diverged locally, keeping local value"
            );
            report.diverged_fields += 1;
            continue;
        }
        if current != diff.new {
            write(record, &diff.field, diff.new.clone(), accessor, report);
            attempted = true;
        }
    }
    attempted
}

fn create<'a, R>(
    target: &mut LiveCollection<R>,
    key: &Key,
    values: impl Iterator<Item = (&'a str, &'a Value)>,
    factory: &dyn RecordFactory<R>,
    accessor: &dyn RecordAccessor<R>,
    report: &mut DigestReport,
) -> RecordId {
    let mut record = factory.create_seeded(key);
    for fv in key.fields() {
        write(&mut record, &fv.field, fv.value.clone(), accessor, report);
    }
    for (field, value) in values {
        write(&mut record, field, value.clone(), accessor, report);
    }
    target.insert(record)
}

fn write<R>(
    record: &mut R,
    field: &str,
    value: Value,
    accessor: &dyn RecordAccessor<R>,
    report: &mut DigestReport,
) {
    match accessor.set(record, field, value) {
        Ok(()) => trace!(field, "Field written"),
        Err(rejected) => {
            warn!("Skipping field write: {}", rejected);
            report.rejected_writes += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compare;
    use crate::observable::{CollectionChange, RecordingSink};
    use crate::schema::{factory_fn, DefaultFactory};
    use crate::test_support::{
        people, person_schema, region_accessor, region_row, region_schema, Person,
        PersonAccessor,
    };
    use proptest::prelude::*;
    use rox_common::FieldValue;

    fn apply(live: &mut LiveCollection<Person>, changes: &[Change]) -> DigestReport {
        digest(live, changes, &DefaultFactory, &person_schema(), &PersonAccessor)
    }

    fn snapshot(live: &LiveCollection<Person>) -> Vec<Person> {
        live.records().cloned().collect()
    }

    #[test]
    fn test_scenario_round_trip() {
        let old = people(&[(1, "A"), (2, "B")]);
        let new = people(&[(2, "B2"), (3, "C")]);
        let changes = compare(&old, &new, &person_schema(), &PersonAccessor);

        let mut live = LiveCollection::from_records(old.clone());
        let id_b = live.ids()[1];
        let report = apply(&mut live, &changes);

        assert_eq!(snapshot(&live), new);
        assert_eq!(live.ids()[0], id_b, "updated record keeps its identity");
        assert_eq!(report.added, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.deleted, 1);
    }

    #[test]
    fn test_local_divergence_is_preserved() {
        let mut live = LiveCollection::from_records(people(&[(2, "B-local")]));
        let changes = vec![Change::Update {
            key: Key::single("id", 2i64),
            diffs: vec![FieldDiff::new("name", "B2", "B")],
        }];

        let report = apply(&mut live, &changes);

        assert_eq!(snapshot(&live), people(&[(2, "B-local")]));
        assert_eq!(report.diverged_fields, 1);
        assert_eq!(report.updated, 0);
    }

    #[test]
    fn test_divergence_is_per_field() {
        let mut live = LiveCollection::from_records(vec![Person::new(1, "local").aged(40)]);
        let changes = vec![Change::Update {
            key: Key::single("id", 1i64),
            diffs: vec![
                FieldDiff::new("name", "remote", "base"),
                FieldDiff::new("age", 41i64, 40i64),
            ],
        }];

        apply(&mut live, &changes);

        assert_eq!(snapshot(&live), vec![Person::new(1, "local").aged(41)]);
    }

    #[test]
    fn test_update_for_missing_record_creates_it() {
        let mut live = LiveCollection::new();
        let changes = vec![Change::Update {
            key: Key::single("id", 9i64),
            diffs: vec![FieldDiff::new("name", "Nine", "Old")],
        }];

        let report = apply(&mut live, &changes);

        assert_eq!(snapshot(&live), people(&[(9, "Nine")]));
        assert_eq!(report.corrective_adds, 1);
    }

    #[test]
    fn test_add_for_existing_record_only_fills_empty_fields() {
        let mut live = LiveCollection::from_records(vec![Person::new(4, "kept")]);
        let id = live.ids()[0];
        let changes = vec![Change::Add {
            key: Key::single("id", 4i64),
            fields: vec![FieldValue::new("name", "remote"), FieldValue::new("age", 7i64)],
        }];

        let report = apply(&mut live, &changes);

        assert_eq!(live.ids(), &[id]);
        assert_eq!(live.get(id).unwrap(), &Person::new(4, "kept").aged(7));
        assert_eq!(report.corrective_updates, 1);
        assert_eq!(report.diverged_fields, 1);
    }

    #[test]
    fn test_delete_of_absent_record_is_ignored() {
        let mut live = LiveCollection::from_records(people(&[(1, "A")]));
        let report = apply(
            &mut live,
            &[Change::Delete {
                key: Key::single("id", 2i64),
            }],
        );
        assert_eq!(report.deleted, 0);
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn test_rejected_write_does_not_abort() {
        let mut live = LiveCollection::new();
        let changes = vec![
            Change::Add {
                key: Key::single("id", 1i64),
                fields: vec![
                    FieldValue::new("age", "not a number"),
                    FieldValue::new("name", "A"),
                ],
            },
            Change::Add {
                key: Key::single("id", 2i64),
                fields: vec![FieldValue::new("name", "B")],
            },
        ];

        let report = apply(&mut live, &changes);

        assert_eq!(snapshot(&live), people(&[(1, "A"), (2, "B")]));
        assert_eq!(report.rejected_writes, 1);
    }

    #[test]
    fn test_phases_run_deletes_first() {
        let sink = RecordingSink::new();
        let mut live = LiveCollection::from_records(people(&[(1, "A")]));
        let id_a = live.ids()[0];
        live.subscribe(sink.callback());

        let changes = vec![
            Change::Add {
                key: Key::single("id", 2i64),
                fields: vec![FieldValue::new("name", "B")],
            },
            Change::Delete {
                key: Key::single("id", 1i64),
            },
        ];
        apply(&mut live, &changes);

        let events = sink.events();
        assert_eq!(events[0], CollectionChange::Removed { index: 0, item: id_a });
        assert!(matches!(events[1], CollectionChange::Added { index: 0, .. }));
    }

    #[test]
    fn test_composite_key_keeps_same_id_in_other_region() {
        let old = vec![region_row("eu", 1, "A"), region_row("us", 1, "B")];
        let new = vec![region_row("us", 1, "B2"), region_row("eu", 2, "C")];
        let schema = region_schema();
        let accessor = region_accessor();
        let changes = compare(&old, &new, &schema, &accessor);

        let mut live = LiveCollection::from_records(old);
        let us1 = live.ids()[1];
        let report = digest(&mut live, &changes, &DefaultFactory, &schema, &accessor);

        assert_eq!(
            live.records().cloned().collect::<Vec<_>>(),
            vec![region_row("us", 1, "B2"), region_row("eu", 2, "C")]
        );
        assert_eq!(live.ids()[0], us1);
        assert_eq!((report.added, report.updated, report.deleted), (1, 1, 1));
    }

    #[test]
    fn test_factory_is_used_for_new_records() {
        let mut live = LiveCollection::new();
        let factory = factory_fn(|| Person::new(0, "").aged(99));
        let changes = vec![Change::Add {
            key: Key::single("id", 1i64),
            fields: vec![FieldValue::new("name", "A")],
        }];

        digest(&mut live, &changes, &factory, &person_schema(), &PersonAccessor);

        assert_eq!(snapshot(&live), vec![Person::new(1, "A").aged(99)]);
    }

    fn arb_snapshot() -> impl Strategy<Value = Vec<Person>> {
        proptest::collection::btree_map(0i64..16, ("[a-c]{1,2}", proptest::option::of(0i64..3)), 0..10)
            .prop_map(|entries| {
                entries
                    .into_iter()
                    .map(|(id, (name, age))| Person {
                        id,
                        name,
                        age,
                    })
                    .collect()
            })
            .prop_shuffle()
    }

    proptest! {
        #[test]
        fn prop_digest_of_compare_round_trips(old in arb_snapshot(), new in arb_snapshot()) {
            let schema = person_schema();
            let changes = compare(&old, &new, &schema, &PersonAccessor);
            let mut live = LiveCollection::from_records(old.clone());
            let survivors: Vec<(i64, RecordId)> = live.iter().map(|(id, p)| (p.id, id)).collect();

            digest(&mut live, &changes, &DefaultFactory, &schema, &PersonAccessor);

            let mut got = snapshot(&live);
            let mut want = new.clone();
            got.sort_by_key(|p| p.id);
            want.sort_by_key(|p| p.id);
            prop_assert_eq!(got, want);

            for (key, id) in survivors {
                if new.iter().any(|p| p.id == key) {
                    prop_assert_eq!(live.get(id).map(|p| p.id), Some(key));
                }
            }
        }
    }
}
