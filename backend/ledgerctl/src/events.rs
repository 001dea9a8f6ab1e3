//! Row shapes for the `records` and `events` tables.

use chrono::DateTime;
use research_funding::storage::{Record, StoreError, StoreResult, Versioned};
use research_funding::{EventRecord, LedgerEvent};

/// A raw record row as stored in / read from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecordRow {
    pub version: i64,
    pub body: String,
}

impl RecordRow {
    pub fn decode(self) -> StoreResult<Versioned<Record>> {
        Ok(Versioned {
            version: self.version as u64,
            value: decode_body(&self.body)?,
        })
    }
}

/// A raw event row as stored in / read from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    pub seq: i64,
    pub event_type: String,
    pub project_id: Option<i64>,
    pub work_id: Option<i64>,
    pub body: String,
    pub timestamp: i64,
}

impl TryFrom<EventRow> for EventRecord {
    type Error = StoreError;

    fn try_from(row: EventRow) -> StoreResult<Self> {
        let event: LedgerEvent = decode_body(&row.body)?;
        if event.as_str() != row.event_type {
            return Err(StoreError::Serialization(format!(
                "event {} tagged {} but body is {}",
                row.seq,
                row.event_type,
                event.as_str()
            )));
        }
        let timestamp = DateTime::from_timestamp_millis(row.timestamp).ok_or_else(|| {
            StoreError::Serialization(format!("event {} has bad timestamp", row.seq))
        })?;
        Ok(EventRecord {
            seq: row.seq as u64,
            timestamp,
            event,
        })
    }
}

pub fn encode_body<T: serde::Serialize>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

pub fn decode_body<T: serde::de::DeserializeOwned>(body: &str) -> StoreResult<T> {
    serde_json::from_str(body).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Index columns `(project_id, funder)` denormalised from a record.
pub fn index_columns(record: &Record) -> (Option<i64>, Option<String>) {
    match record {
        Record::Project(p) => (Some(p.id as i64), None),
        Record::Contribution(c) => (Some(c.project as i64), Some(c.funder.to_string())),
        Record::Work(w) => (w.funding_source.map(|p| p as i64), None),
        Record::Counter(_) => (None, None),
    }
}
