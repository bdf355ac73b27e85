//! Shared fixtures for unit tests.

use rox_common::{FieldValue, Key, Value};

use crate::schema::{FieldWriteRejected, MapAccessor, MapRecord, RecordAccessor, Schema};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub age: Option<i64>,
}

impl Person {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            age: None,
        }
    }

    pub fn aged(mut self, age: i64) -> Self {
        self.age = Some(age);
        self
    }
}

pub struct PersonAccessor;

impl RecordAccessor<Person> for PersonAccessor {
    fn fields(&self) -> Vec<String> {
        vec!["id".to_string(), "name".to_string(), "age".to_string()]
    }

    fn get(&self, record: &Person, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::Int(record.id)),
            "name" => Some(Value::Text(record.name.clone())),
            "age" => Some(record.age.into()),
            _ => None,
        }
    }

    fn set(
        &self,
        record: &mut Person,
        field: &str,
        value: Value,
    ) -> Result<(), FieldWriteRejected> {
        match (field, value) {
            ("id", Value::Int(id)) => record.id = id,
            ("name", Value::Text(name)) => record.name = name,
            ("age", Value::Int(age)) => record.age = Some(age),
            ("age", Value::Null) => record.age = None,
            (field, value) => {
                return Err(FieldWriteRejected::new(
                    field,
                    format!("cannot store a {} value", value.kind()),
                ))
            }
        }
        Ok(())
    }
}

pub fn person_schema() -> Schema {
    Schema::resolve::<Person, _>(&PersonAccessor, &["id"]).unwrap()
}

pub fn people(entries: &[(i64, &str)]) -> Vec<Person> {
    entries
        .iter()
        .map(|(id, name)| Person::new(*id, name))
        .collect()
}

/// Map records keyed on (`region`, `id`).
pub fn region_accessor() -> MapAccessor {
    MapAccessor::new(["region", "id", "name"])
}

pub fn region_schema() -> Schema {
    Schema::resolve::<MapRecord, _>(&region_accessor(), &["region", "id"]).unwrap()
}

pub fn region_row(region: &str, id: i64, name: &str) -> MapRecord {
    MapRecord::from([
        ("region".to_string(), Value::from(region)),
        ("id".to_string(), Value::Int(id)),
        ("name".to_string(), Value::from(name)),
    ])
}

pub fn region_key(region: &str, id: i64) -> Key {
    Key::new(vec![
        FieldValue::new("region", region),
        FieldValue::new("id", id),
    ])
}
