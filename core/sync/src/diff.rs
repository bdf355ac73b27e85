//! Snapshot differ.
//!
//! Compares an old and a new snapshot by key and produces the ordered list of
//! [`Change`]s that turns one into the other: one entry per new record that is
//! added or modified (in new-snapshot order), then one `Delete` per old record
//! that has no counterpart (in old-snapshot order).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use rox_common::{FieldValue, Key, Value};

use crate::schema::{read, RecordAccessor, Schema};

/// A tracked field that changed between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    /// Value in the new snapshot.
    pub new: Value,
    /// Value in the old snapshot when the diff was computed.
    pub old: Value,
}

impl FieldDiff {
    pub fn new(field: impl Into<String>, new: impl Into<Value>, old: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            new: new.into(),
            old: old.into(),
        }
    }
}

/// One keyed change between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "lowercase")]
pub enum Change {
    /// A record exists only in the new snapshot; carries every tracked field.
    Add { key: Key, fields: Vec<FieldValue> },
    /// A record exists in both and at least one tracked field differs.
    Update { key: Key, diffs: Vec<FieldDiff> },
    /// A record exists only in the old snapshot.
    Delete { key: Key },
}

/// Discriminant of a [`Change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Add,
    Update,
    Delete,
}

impl Change {
    pub fn key(&self) -> &Key {
        match self {
            Change::Add { key, .. } | Change::Update { key, .. } | Change::Delete { key } => key,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Change::Add { .. } => ChangeKind::Add,
            Change::Update { .. } => ChangeKind::Update,
            Change::Delete { .. } => ChangeKind::Delete,
        }
    }
}

/// Compute the changes that turn `old` into `new`.
///
/// Records are joined on key equality alone. When a snapshot repeats a key,
/// each new record is matched with the first old record of that key that has
/// not been matched yet. An `Update` is only emitted when at least one
/// tracked field differs; a matched record is consumed either way.
///
/// Runs in `O(|old| + |new|)` using a key index over `old`.
pub fn compare<'a, R: 'a>(
    old: impl IntoIterator<Item = &'a R>,
    new: impl IntoIterator<Item = &'a R>,
    schema: &Schema,
    accessor: &dyn RecordAccessor<R>,
) -> Vec<Change> {
    let old: Vec<(Key, &R)> = old
        .into_iter()
        .map(|record| (schema.key_of(accessor, record), record))
        .collect();

    let mut pool: HashMap<&Key, VecDeque<usize>> = HashMap::with_capacity(old.len());
    for (index, (key, _)) in old.iter().enumerate() {
        pool.entry(key).or_default().push_back(index);
    }
    let mut matched = vec![false; old.len()];

    let mut changes = Vec::new();
    for new_record in new {
        let key = schema.key_of(accessor, new_record);
        let found = pool.get_mut(&key).and_then(|indices| indices.pop_front());

        match found {
            None => {
                let fields = schema
                    .compared_fields(accessor, &[new_record])
                    .iter()
                    .map(|field| FieldValue::new(field.clone(), read(accessor, new_record, field)))
                    .collect();
                changes.push(Change::Add { key, fields });
            }
            Some(index) => {
                matched[index] = true;
                let old_record = old[index].1;
                let diffs: Vec<FieldDiff> = schema
                    .compared_fields(accessor, &[old_record, new_record])
                    .iter()
                    .filter_map(|field| {
                        let new_value = read(accessor, new_record, field);
                        let old_value = read(accessor, old_record, field);
                        (new_value != old_value).then(|| FieldDiff {
                            field: field.clone(),
                            new: new_value,
                            old: old_value,
                        })
                    })
                    .collect();
                if !diffs.is_empty() {
                    changes.push(Change::Update { key, diffs });
                }
            }
        }
    }

    for ((key, _), _) in old.iter().zip(&matched).filter(|(_, m)| !**m) {
        changes.push(Change::Delete { key: key.clone() });
    }

    debug!(
        old = old.len(),
        changes = changes.len(),
        "Compared snapshots"
    );
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{MapAccessor, MapRecord};
    use crate::test_support::{
        people, person_schema, region_accessor, region_key, region_row, region_schema, Person,
        PersonAccessor,
    };
    use proptest::prelude::*;

    fn diff(old: &[Person], new: &[Person]) -> Vec<Change> {
        compare(old, new, &person_schema(), &PersonAccessor)
    }

    #[test]
    fn test_scenario_update_add_delete() {
        let old = people(&[(1, "A"), (2, "B")]);
        let new = people(&[(2, "B2"), (3, "C")]);

        let changes = diff(&old, &new);

        assert_eq!(
            changes,
            vec![
                Change::Update {
                    key: Key::single("id", 2i64),
                    diffs: vec![FieldDiff::new("name", "B2", "B")],
                },
                Change::Add {
                    key: Key::single("id", 3i64),
                    fields: vec![
                        FieldValue::new("name", "C"),
                        FieldValue::new("age", Value::Null),
                    ],
                },
                Change::Delete {
                    key: Key::single("id", 1i64),
                },
            ]
        );
    }

    #[test]
    fn test_unchanged_record_emits_nothing() {
        let old = people(&[(1, "A")]);
        assert!(diff(&old, &old.clone()).is_empty());
    }

    #[test]
    fn test_deletes_follow_old_order() {
        let old = people(&[(5, "E"), (1, "A"), (3, "C")]);
        let keys: Vec<Key> = diff(&old, &[]).iter().map(|c| c.key().clone()).collect();
        assert_eq!(
            keys,
            vec![
                Key::single("id", 5i64),
                Key::single("id", 1i64),
                Key::single("id", 3i64),
            ]
        );
    }

    #[test]
    fn test_duplicate_keys_match_first_unmatched() {
        let old = people(&[(1, "first"), (1, "second")]);
        let new = people(&[(1, "second")]);

        let changes = diff(&old, &new);

        // The new record pairs with "first", so it is an update, and "second"
        // is left over as a delete of the same key.
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].kind(), ChangeKind::Update);
        assert_eq!(changes[1].kind(), ChangeKind::Delete);
    }

    #[test]
    fn test_diff_carries_old_value() {
        let old = vec![Person::new(1, "A").aged(30)];
        let new = vec![Person::new(1, "A").aged(31)];

        let changes = diff(&old, &new);

        assert_eq!(
            changes,
            vec![Change::Update {
                key: Key::single("id", 1i64),
                diffs: vec![FieldDiff::new("age", 31i64, 30i64)],
            }]
        );
    }

    #[test]
    fn test_composite_key_joins_on_every_key_field() {
        let old = vec![region_row("eu", 1, "A"), region_row("us", 1, "B")];
        let new = vec![region_row("us", 1, "B2"), region_row("eu", 2, "C")];

        let changes = compare(&old, &new, &region_schema(), &region_accessor());

        assert_eq!(
            changes,
            vec![
                Change::Update {
                    key: region_key("us", 1),
                    diffs: vec![FieldDiff::new("name", "B2", "B")],
                },
                Change::Add {
                    key: region_key("eu", 2),
                    fields: vec![FieldValue::new("name", "C")],
                },
                Change::Delete {
                    key: region_key("eu", 1),
                },
            ]
        );
    }

    #[test]
    fn test_open_accessor_compares_fields_that_appear_later() {
        let accessor = MapAccessor::new(["id"]).open();
        let schema = Schema::resolve::<MapRecord, _>(&accessor, &["id"]).unwrap();
        let old = vec![MapRecord::from([("id".to_string(), Value::Int(1))])];
        let new = vec![
            MapRecord::from([
                ("id".to_string(), Value::Int(1)),
                ("email".to_string(), Value::from("a@b")),
            ]),
            MapRecord::from([
                ("id".to_string(), Value::Int(2)),
                ("phone".to_string(), Value::from("555")),
            ]),
        ];

        let changes = compare(&old, &new, &schema, &accessor);

        assert_eq!(
            changes,
            vec![
                Change::Update {
                    key: Key::single("id", 1i64),
                    diffs: vec![FieldDiff::new("email", "a@b", Value::Null)],
                },
                Change::Add {
                    key: Key::single("id", 2i64),
                    fields: vec![FieldValue::new("phone", "555")],
                },
            ]
        );
    }

    #[test]
    fn test_change_json_shape() {
        let change = Change::Delete {
            key: Key::single("id", 1i64),
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"change": "delete", "key": [{"field": "id", "value": 1}]})
        );
    }

    fn arb_snapshot() -> impl Strategy<Value = Vec<Person>> {
        proptest::collection::btree_map(0i64..20, "[a-c]{1,2}", 0..12).prop_map(|entries| {
            entries
                .into_iter()
                .map(|(id, name)| Person::new(id, &name))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_compare_with_itself_is_empty(snapshot in arb_snapshot()) {
            prop_assert!(diff(&snapshot, &snapshot).is_empty());
        }

        #[test]
        fn prop_every_change_touches_one_key(old in arb_snapshot(), new in arb_snapshot()) {
            let changes = diff(&old, &new);
            let mut seen = std::collections::HashSet::new();
            for change in &changes {
                prop_assert!(seen.insert(change.key().clone()));
            }
            let adds = changes.iter().filter(|c| c.kind() == ChangeKind::Add).count();
            let deletes = changes.iter().filter(|c| c.kind() == ChangeKind::Delete).count();
            prop_assert_eq!(old.len() + adds - deletes, new.len());
        }
    }
}
