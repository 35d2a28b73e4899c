use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use uuid::Uuid;

/// A scalar value stored under one field of a reading
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Integer(i64),
    Text(String),
    Bool(bool),
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Number(v) => serializer.serialize_f64(*v),
            FieldValue::Integer(v) => serializer.serialize_i64(*v),
            FieldValue::Text(v) => serializer.serialize_str(v),
            FieldValue::Bool(v) => serializer.serialize_bool(*v),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

/// One captured sensor sample.
///
/// Fields keep their insertion order, which is also the order they are
/// written in the NDJSON row. The `id` is assigned when the reading is built
/// and doubles as the offset token when the reading closes a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    id: Uuid,
    captured_at: DateTime<Utc>,
    fields: Vec<(String, FieldValue)>,
}

impl Reading {
    pub fn builder(captured_at: DateTime<Utc>) -> ReadingBuilder {
        ReadingBuilder {
            captured_at,
            fields: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Capture time as whole epoch seconds
    pub fn epoch_seconds(&self) -> i64 {
        self.captured_at.timestamp()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Encode as a single-line JSON object
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone)]
pub struct ReadingBuilder {
    captured_at: DateTime<Utc>,
    fields: Vec<(String, FieldValue)>,
}

impl ReadingBuilder {
    /// Set a field. Setting an existing field replaces its value in place.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
        self
    }

    pub fn build(self) -> Reading {
        self.build_with_id(Uuid::new_v4())
    }

    pub fn build_with_id(self, id: Uuid) -> Reading {
        Reading {
            id,
            captured_at: self.captured_at,
            fields: self.fields,
        }
    }
}
