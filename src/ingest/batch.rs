use crate::sensor::Reading;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Ordered, non-empty group of readings sent in a single append.
///
/// The payload is derived from the readings alone, so every retry of the same
/// batch sends byte-identical content under the same offset token.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Local identifier for log correlation
    batch_id: Uuid,

    /// Readings in arrival order
    readings: Vec<Reading>,
}

impl Batch {
    /// Returns None for an empty set of readings
    pub fn new(readings: Vec<Reading>) -> Option<Self> {
        if readings.is_empty() {
            return None;
        }
        Some(Self {
            batch_id: Uuid::new_v4(),
            readings,
        })
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Identifier of the last reading; the service uses it to suppress
    /// duplicates when the same batch is resubmitted.
    pub fn offset_token(&self) -> String {
        self.readings
            .last()
            .map(|r| r.id().to_string())
            .unwrap_or_default()
    }

    pub fn first_captured_at(&self) -> Option<DateTime<Utc>> {
        self.readings.first().map(Reading::captured_at)
    }

    /// One JSON object per line, in reading order
    pub fn to_ndjson(&self) -> Result<String, serde_json::Error> {
        let lines = self
            .readings
            .iter()
            .map(Reading::to_json_line)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines.join("\n"))
    }
}
