//! In-memory [`RecordStore`].
//!
//! Deterministic and test-friendly. A single lock guards records and the
//! event log, which makes every commit trivially atomic; conflicts still
//! surface because versions are checked against what the caller read.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::events::EventRecord;
use crate::storage::{
    EventFilter, Record, RecordKey, RecordStore, ScanFilter, StoreError, StoreResult,
    Transaction, Versioned,
};

#[derive(Default)]
struct Inner {
    records: BTreeMap<RecordKey, Versioned<Record>>,
    events: Vec<EventRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, counters included.
    pub fn len(&self) -> StoreResult<usize> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard.records.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_string())
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, key: &RecordKey) -> StoreResult<Option<Versioned<Record>>> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard.records.get(key).cloned())
    }

    async fn commit(&self, tx: Transaction) -> StoreResult<()> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;

        for (key, expected) in &tx.reads {
            let actual = guard.records.get(key).map(|v| v.version);
            if actual != *expected {
                return Err(StoreError::Conflict(format!(
                    "{key} moved from version {expected:?} to {actual:?}"
                )));
            }
        }

        for (key, value) in tx.writes {
            let version = guard.records.get(&key).map_or(1, |v| v.version + 1);
            guard.records.insert(key, Versioned { version, value });
        }

        for event in tx.events {
            let seq = guard.events.len() as u64 + 1;
            guard.events.push(EventRecord {
                seq,
                timestamp: tx.timestamp,
                event,
            });
        }
        Ok(())
    }

    async fn scan(&self, filter: &ScanFilter) -> StoreResult<Vec<Record>> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard
            .records
            .values()
            .filter(|v| filter.matches(&v.value))
            .map(|v| v.value.clone())
            .collect())
    }

    async fn events(&self, filter: &EventFilter) -> StoreResult<Vec<EventRecord>> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard
            .events
            .iter()
            .filter(|e| filter.matches(&e.event))
            .cloned()
            .collect())
    }
}
