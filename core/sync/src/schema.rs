//! Record access by field name.
//!
//! The core never inspects records directly. It reads and writes fields
//! through an injected [`RecordAccessor`], resolves the key/tracked field
//! split once into a [`Schema`], and creates records through a
//! [`RecordFactory`].

use std::borrow::Cow;
use std::collections::BTreeMap;
use thiserror::Error;

use rox_common::{Error, FieldValue, Key, Result, Value};

/// A field write that the record refused.
///
/// Writes are best-effort: the reconciler skips a rejected write and carries
/// on with the remaining fields and records. The rejection is counted and
/// logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("write to field '{field}' rejected: {reason}")]
pub struct FieldWriteRejected {
    pub field: String,
    pub reason: String,
}

impl FieldWriteRejected {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Reads and writes record fields by name.
pub trait RecordAccessor<R>: Send + Sync {
    /// All readable and writable fields of the record type, in a stable order.
    fn fields(&self) -> Vec<String>;

    /// Read a field. `None` means the record has no such field.
    fn get(&self, record: &R, field: &str) -> Option<Value>;

    /// Write a field.
    fn set(
        &self,
        record: &mut R,
        field: &str,
        value: Value,
    ) -> std::result::Result<(), FieldWriteRejected>;

    /// Fields present on this record beyond [`fields`](Self::fields).
    /// Accessors over open-ended records report them so they are compared too.
    fn extra_fields(&self, record: &R) -> Vec<String> {
        let _ = record;
        Vec::new()
    }
}

/// The resolved key/tracked field split for one record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    key_fields: Vec<String>,
    tracked_fields: Vec<String>,
}

impl Schema {
    /// Resolve key fields by name against the accessor's field list.
    ///
    /// Tracked fields are every other field, in accessor order.
    ///
    /// # Errors
    /// - `MissingKeyConfiguration` if `key_names` is empty, or names a field
    ///   the accessor does not expose
    pub fn resolve<R, S: AsRef<str>>(
        accessor: &dyn RecordAccessor<R>,
        key_names: &[S],
    ) -> Result<Self> {
        if key_names.is_empty() {
            return Err(Error::MissingKeyConfiguration(
                "at least one key field is required".to_string(),
            ));
        }

        let fields = accessor.fields();
        let mut key_fields = Vec::with_capacity(key_names.len());
        for name in key_names {
            let name = name.as_ref();
            if !fields.iter().any(|f| f == name) {
                return Err(Error::MissingKeyConfiguration(format!(
                    "key field '{}' is not a field of the record type",
                    name
                )));
            }
            if !key_fields.iter().any(|f: &String| f == name) {
                key_fields.push(name.to_string());
            }
        }

        let tracked_fields = fields
            .into_iter()
            .filter(|f| !key_fields.contains(f))
            .collect();

        Ok(Self {
            key_fields,
            tracked_fields,
        })
    }

    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    pub fn tracked_fields(&self) -> &[String] {
        &self.tracked_fields
    }

    /// Fields to compare across `records`: the tracked fields, then any
    /// extra field the accessor reports on them, in first-seen order.
    pub fn compared_fields<R>(
        &self,
        accessor: &dyn RecordAccessor<R>,
        records: &[&R],
    ) -> Cow<'_, [String]> {
        let mut widened: Option<Vec<String>> = None;
        for record in records {
            for extra in accessor.extra_fields(record) {
                if self.key_fields.contains(&extra) || self.tracked_fields.contains(&extra) {
                    continue;
                }
                let fields = widened.get_or_insert_with(|| self.tracked_fields.clone());
                if !fields.contains(&extra) {
                    fields.push(extra);
                }
            }
        }
        match widened {
            Some(fields) => Cow::Owned(fields),
            None => Cow::Borrowed(self.tracked_fields.as_slice()),
        }
    }

    /// Extract the key of a record. Missing fields read as `Null`.
    pub fn key_of<R>(&self, accessor: &dyn RecordAccessor<R>, record: &R) -> Key {
        Key::new(
            self.key_fields
                .iter()
                .map(|field| FieldValue::new(field.clone(), read(accessor, record, field)))
                .collect(),
        )
    }
}

/// Read a field, treating a missing field as `Null`.
pub(crate) fn read<R>(accessor: &dyn RecordAccessor<R>, record: &R, field: &str) -> Value {
    accessor.get(record, field).unwrap_or(Value::Null)
}

/// Creates fresh records for the reconciler.
pub trait RecordFactory<R>: Send + Sync {
    /// Create an empty record.
    fn create(&self) -> R;

    /// Create a record seeded with its key. Key fields are written again
    /// by the reconciler afterwards, so seeding is optional.
    fn create_seeded(&self, key: &Key) -> R {
        let _ = key;
        self.create()
    }
}

/// Factory for records with a `Default` implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFactory;

impl<R: Default> RecordFactory<R> for DefaultFactory {
    fn create(&self) -> R {
        R::default()
    }
}

/// Factory backed by a closure.
pub struct FnFactory<F>(F);

impl<R, F> RecordFactory<R> for FnFactory<F>
where
    F: Fn() -> R + Send + Sync,
{
    fn create(&self) -> R {
        (self.0)()
    }
}

/// Factory backed by a closure that receives the key.
pub struct SeededFnFactory<F>(F);

impl<R, F> RecordFactory<R> for SeededFnFactory<F>
where
    F: Fn(Option<&Key>) -> R + Send + Sync,
{
    fn create(&self) -> R {
        (self.0)(None)
    }

    fn create_seeded(&self, key: &Key) -> R {
        (self.0)(Some(key))
    }
}

pub fn factory_fn<F>(f: F) -> FnFactory<F> {
    FnFactory(f)
}

pub fn seeded_factory_fn<F>(f: F) -> SeededFnFactory<F> {
    SeededFnFactory(f)
}

/// A schema-less record: field name to value.
pub type MapRecord = BTreeMap<String, Value>;

/// Value constraint for a [`MapAccessor`] field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Any,
    Bool,
    Int,
    Float,
    Text,
    Timestamp,
    Uuid,
}

impl FieldKind {
    fn admits(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (FieldKind::Any, _)
                | (_, Value::Null)
                | (FieldKind::Bool, Value::Bool(_))
                | (FieldKind::Int, Value::Int(_))
                | (FieldKind::Float, Value::Float(_) | Value::Int(_))
                | (FieldKind::Text, Value::Text(_))
                | (FieldKind::Timestamp, Value::Timestamp(_))
                | (FieldKind::Uuid, Value::Uuid(_))
        )
    }
}

/// Accessor for [`MapRecord`]s over a declared field list.
///
/// A write whose value does not match the field's [`FieldKind`] is rejected.
/// Undeclared fields cannot be read or written unless the accessor is
/// [`open`](MapAccessor::open), in which case they behave as `Any` fields
/// and are compared whenever a record carries them.
#[derive(Debug, Clone, Default)]
pub struct MapAccessor {
    fields: Vec<(String, FieldKind)>,
    open: bool,
}

impl MapAccessor {
    /// Declare untyped fields.
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|f| (f.into(), FieldKind::Any))
                .collect(),
            open: false,
        }
    }

    /// Also accept fields that were never declared.
    pub fn open(mut self) -> Self {
        self.open = true;
        self
    }

    /// Declare (or redeclare) a field with a value constraint.
    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(f, _)| *f == name) {
            Some(entry) => entry.1 = kind,
            None => self.fields.push((name, kind)),
        }
        self
    }

    /// Derive the field list from the union of the records' fields.
    pub fn infer<'a>(records: impl IntoIterator<Item = &'a MapRecord>) -> Self {
        let mut accessor = Self::default();
        for record in records {
            for name in record.keys() {
                if !accessor.fields.iter().any(|(f, _)| f == name) {
                    accessor.fields.push((name.clone(), FieldKind::Any));
                }
            }
        }
        accessor
    }

    fn kind_of(&self, field: &str) -> Option<FieldKind> {
        self.fields
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, kind)| *kind)
            .or(self.open.then_some(FieldKind::Any))
    }

    fn is_declared(&self, field: &str) -> bool {
        self.fields.iter().any(|(f, _)| f == field)
    }
}

impl RecordAccessor<MapRecord> for MapAccessor {
    fn fields(&self) -> Vec<String> {
        self.fields.iter().map(|(f, _)| f.clone()).collect()
    }

    fn get(&self, record: &MapRecord, field: &str) -> Option<Value> {
        self.kind_of(field)?;
        Some(record.get(field).cloned().unwrap_or(Value::Null))
    }

    fn set(
        &self,
        record: &mut MapRecord,
        field: &str,
        value: Value,
    ) -> std::result::Result<(), FieldWriteRejected> {
        let kind = self
            .kind_of(field)
            .ok_or_else(|| FieldWriteRejected::new(field, "undeclared field"))?;
        if !kind.admits(&value) {
            return Err(FieldWriteRejected::new(
                field,
                format!("{:?} field cannot hold a {} value", kind, value.kind()),
            ));
        }
        record.insert(field.to_string(), value);
        Ok(())
    }

    fn extra_fields(&self, record: &MapRecord) -> Vec<String> {
        if !self.open {
            return Vec::new();
        }
        record
            .keys()
            .filter(|field| !self.is_declared(field))
            .cloned()
            .collect()
    }
}
