//! Row contract of the target table.
//!
//! The streaming pipe maps NDJSON keys onto table columns by name, so a
//! reading must not carry keys the table does not know and each value must
//! have the column's type.

use crate::sensor::reading::{FieldValue, Reading};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Number,
    Bool,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
}

const fn required(name: &'static str, field_type: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        field_type,
        required: true,
    }
}

const fn optional(name: &'static str, field_type: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        field_type,
        required: false,
    }
}

pub const ROW_SCHEMA: &[FieldSpec] = &[
    required("uuid", FieldType::Text),
    required("rowid", FieldType::Text),
    required("hostname", FieldType::Text),
    optional("ipaddress", FieldType::Text),
    optional("macaddress", FieldType::Text),
    required("ts", FieldType::Integer),
    required("datetimestamp", FieldType::Text),
    required("systemtime", FieldType::Text),
    optional("temperature", FieldType::Number),
    optional("humidity", FieldType::Number),
    optional("pressure", FieldType::Number),
    optional("pitch", FieldType::Number),
    optional("roll", FieldType::Number),
    optional("yaw", FieldType::Number),
    optional("accel_x", FieldType::Number),
    optional("accel_y", FieldType::Number),
    optional("accel_z", FieldType::Number),
    optional("gyro_x", FieldType::Number),
    optional("gyro_y", FieldType::Number),
    optional("gyro_z", FieldType::Number),
    optional("mag_x", FieldType::Number),
    optional("mag_y", FieldType::Number),
    optional("mag_z", FieldType::Number),
    optional("compass", FieldType::Number),
    optional("cpu_percent", FieldType::Number),
    optional("memory_percent", FieldType::Number),
    optional("disk_usage_mb", FieldType::Number),
    optional("cputempc", FieldType::Number),
    optional("cputempf", FieldType::Number),
    required("simulated", FieldType::Bool),
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaViolation {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("field '{field}' expected {expected:?}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
    },

    #[error("required field '{0}' is missing")]
    MissingField(&'static str),
}

fn field_def(name: &str) -> Option<&'static FieldSpec> {
    ROW_SCHEMA.iter().find(|def| def.name == name)
}

fn type_matches(value: &FieldValue, expected: FieldType) -> bool {
    matches!(
        (value, expected),
        (FieldValue::Text(_), FieldType::Text)
            | (FieldValue::Integer(_), FieldType::Integer)
            | (FieldValue::Integer(_), FieldType::Number)
            | (FieldValue::Number(_), FieldType::Number)
            | (FieldValue::Bool(_), FieldType::Bool)
    )
}

/// Check a reading against [`ROW_SCHEMA`]
pub fn validate(reading: &Reading) -> Result<(), SchemaViolation> {
    let mut present = HashSet::new();

    for (name, value) in reading.fields() {
        let def = field_def(name).ok_or_else(|| SchemaViolation::UnknownField(name.to_string()))?;
        if !type_matches(value, def.field_type) {
            return Err(SchemaViolation::TypeMismatch {
                field: name.to_string(),
                expected: def.field_type,
            });
        }
        present.insert(def.name);
    }

    match ROW_SCHEMA
        .iter()
        .find(|def| def.required && !present.contains(def.name))
    {
        Some(def) => Err(SchemaViolation::MissingField(def.name)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn minimal_row() -> crate::sensor::reading::ReadingBuilder {
        Reading::builder(Utc::now())
            .field("uuid", "sensehat_pi_20260128100000_1")
            .field("rowid", "20260128100000_x")
            .field("hostname", "pi")
            .field("ts", 1_769_594_400i64)
            .field("datetimestamp", "2026-01-28T10:00:00+00:00")
            .field("systemtime", "01/28/2026 10:00:00")
            .field("simulated", true)
    }

    #[test]
    fn test_minimal_row_is_valid() {
        assert_eq!(validate(&minimal_row().build()), Ok(()));
    }

    #[test]
    fn test_integer_accepted_for_number_column() {
        let reading = minimal_row().field("temperature", 21i64).build();
        assert_eq!(validate(&reading), Ok(()));
    }

    #[test]
    fn test_extra_field_rejected() {
        let reading = minimal_row().field("voltage", 3.3).build();
        assert_eq!(
            validate(&reading),
            Err(SchemaViolation::UnknownField("voltage".to_string()))
        );
    }

    #[test]
    fn test_wrong_type_rejected() {
        let reading = minimal_row().field("simulated", "yes").build();
        assert!(matches!(
            validate(&reading),
            Err(SchemaViolation::TypeMismatch { expected: FieldType::Bool, .. })
        ));
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let reading = Reading::builder(Utc::now()).field("uuid", "u").build();
        assert_eq!(validate(&reading), Err(SchemaViolation::MissingField("rowid")));
    }
}
