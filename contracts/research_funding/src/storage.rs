//! # Storage
//!
//! The ledger's only shared mutable resource is a key-addressed
//! [`RecordStore`]. This module defines its contract and the
//! [`atomic_update`] primitive every write goes through.
//!
//! ## Keys
//!
//! | Key                    | Record          | Description                       |
//! |------------------------|-----------------|-----------------------------------|
//! | `ProjectCount`         | `Counter`       | Next project id                   |
//! | `WorkCount`            | `Counter`       | Next work id                      |
//! | `Project(id)`          | `Project`       | Project metadata and funding      |
//! | `Contribution(key)`    | `Contribution`  | Per `(project, funder)` total     |
//! | `Work(id)`             | `Work`          | Reviewable work and its grants    |
//!
//! ## Optimistic concurrency
//!
//! Every stored record carries a version that increments on each committed
//! write. [`atomic_update`] reads the versions of its keys, runs the mutation
//! against that snapshot and submits a [`Transaction`] asserting the versions
//! it saw. A store commits the whole transaction iff those versions are still
//! current and otherwise applies nothing and reports [`StoreError::Conflict`].
//! Two operations racing on the same project therefore never interleave: the
//! loser is rejected and must re-read.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::address::ContributionKey;
use crate::events::{EventRecord, LedgerEvent};
use crate::types::{Contribution, Identity, Project, ProjectId, ReviewableWork, WorkId};
use crate::{Error, Result};

// ── Keys and records ─────────────────────────────────────────────────

/// All record store keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordKey {
    ProjectCount,
    WorkCount,
    Project(ProjectId),
    Contribution(ContributionKey),
    Work(WorkId),
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProjectCount => f.write_str("counter/projects"),
            Self::WorkCount => f.write_str("counter/works"),
            Self::Project(id) => write!(f, "project/{id}"),
            Self::Contribution(key) => write!(f, "contribution/{key}"),
            Self::Work(id) => write!(f, "work/{id}"),
        }
    }
}

/// Value stored under a [`RecordKey`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Record {
    Counter(u64),
    Project(Project),
    Contribution(Contribution),
    Work(ReviewableWork),
}

impl Record {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Counter(_) => "counter",
            Self::Project(_) => "project",
            Self::Contribution(_) => "contribution",
            Self::Work(_) => "work",
        }
    }
}

/// A record together with its commit version (starting at 1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Filtered-scan predicates a store must support.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanFilter {
    Projects,
    ContributionsByProject(ProjectId),
    ContributionsByFunder(Identity),
    Works,
}

impl ScanFilter {
    pub fn matches(&self, record: &Record) -> bool {
        match (self, record) {
            (Self::Projects, Record::Project(_)) => true,
            (Self::ContributionsByProject(id), Record::Contribution(c)) => c.project == *id,
            (Self::ContributionsByFunder(funder), Record::Contribution(c)) => c.funder == *funder,
            (Self::Works, Record::Work(_)) => true,
            _ => false,
        }
    }
}

/// Event log filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Project(ProjectId),
    Work(WorkId),
}

impl EventFilter {
    pub fn matches(&self, event: &LedgerEvent) -> bool {
        match self {
            Self::All => true,
            Self::Project(id) => event.project_id() == Some(*id),
            Self::Work(id) => event.work_id() == Some(*id),
        }
    }
}

/// A unit of work submitted to [`RecordStore::commit`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// Versions observed at read time; `None` asserts the key is absent.
    pub reads: Vec<(RecordKey, Option<u64>)>,
    pub writes: Vec<(RecordKey, Record)>,
    pub events: Vec<LedgerEvent>,
    pub timestamp: DateTime<Utc>,
}

// ── Store contract ───────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A read version was stale at commit time. Nothing was applied.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("record at {key} is not a {expected}")]
    Corrupt { key: RecordKey, expected: &'static str },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Key-addressed persistent storage with all-or-nothing multi-key commits.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Current value and version at `key`.
    async fn get(&self, key: &RecordKey) -> StoreResult<Option<Versioned<Record>>>;

    /// Apply `tx` iff every read version is still current.
    async fn commit(&self, tx: Transaction) -> StoreResult<()>;

    /// All records matching `filter`, in no particular order.
    async fn scan(&self, filter: &ScanFilter) -> StoreResult<Vec<Record>>;

    /// Committed events matching `filter`.
    async fn events(&self, filter: &EventFilter) -> StoreResult<Vec<EventRecord>>;
}

// ── Snapshot / atomic update ─────────────────────────────────────────

#[derive(Debug)]
struct Slot {
    version: Option<u64>,
    value: Option<Record>,
    dirty: bool,
}

/// The view an [`atomic_update`] mutation works against.
///
/// Writing a key that was not loaded asserts the key does not exist yet.
#[derive(Debug)]
pub struct Snapshot {
    timestamp: DateTime<Utc>,
    slots: BTreeMap<RecordKey, Slot>,
    events: Vec<LedgerEvent>,
}

impl Snapshot {
    fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            slots: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    fn load(&mut self, key: RecordKey, current: Option<Versioned<Record>>) {
        let (version, value) = match current {
            Some(v) => (Some(v.version), Some(v.value)),
            None => (None, None),
        };
        self.slots.insert(
            key,
            Slot {
                version,
                value,
                dirty: false,
            },
        );
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn get(&self, key: &RecordKey) -> Option<&Record> {
        self.slots.get(key).and_then(|slot| slot.value.as_ref())
    }

    /// Stage `record` for writing at `key`.
    pub fn put(&mut self, key: RecordKey, record: Record) {
        let slot = self.slots.entry(key).or_insert(Slot {
            version: None,
            value: None,
            dirty: false,
        });
        slot.value = Some(record);
        slot.dirty = true;
    }

    /// Stage an event for the same commit.
    pub fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    /// Counter value at `key`, zero when unset.
    pub fn counter(&self, key: &RecordKey) -> StoreResult<u64> {
        match self.get(key) {
            None => Ok(0),
            Some(Record::Counter(n)) => Ok(*n),
            Some(_) => Err(corrupt(*key, "counter")),
        }
    }

    pub fn project(&self, id: ProjectId) -> StoreResult<Option<Project>> {
        let key = RecordKey::Project(id);
        match self.get(&key) {
            None => Ok(None),
            Some(Record::Project(p)) => Ok(Some(p.clone())),
            Some(_) => Err(corrupt(key, "project")),
        }
    }

    pub fn contribution(&self, key: &ContributionKey) -> StoreResult<Option<Contribution>> {
        let key = RecordKey::Contribution(*key);
        match self.get(&key) {
            None => Ok(None),
            Some(Record::Contribution(c)) => Ok(Some(c.clone())),
            Some(_) => Err(corrupt(key, "contribution")),
        }
    }

    pub fn work(&self, id: WorkId) -> StoreResult<Option<ReviewableWork>> {
        let key = RecordKey::Work(id);
        match self.get(&key) {
            None => Ok(None),
            Some(Record::Work(w)) => Ok(Some(w.clone())),
            Some(_) => Err(corrupt(key, "work")),
        }
    }

    fn into_transaction(self) -> Transaction {
        let mut reads = Vec::with_capacity(self.slots.len());
        let mut writes = Vec::new();
        for (key, slot) in self.slots {
            reads.push((key, slot.version));
            if slot.dirty {
                if let Some(value) = slot.value {
                    writes.push((key, value));
                }
            }
        }
        Transaction {
            reads,
            writes,
            events: self.events,
            timestamp: self.timestamp,
        }
    }
}

fn corrupt(key: RecordKey, expected: &'static str) -> StoreError {
    StoreError::Corrupt { key, expected }
}

/// Load `keys`, apply `mutate` and commit the result as one transaction.
///
/// If `mutate` fails nothing is submitted. If another writer committed to any
/// loaded key in between, the store rejects the transaction and this returns
/// [`Error::ConcurrentUpdateConflict`]; the caller must re-run the whole
/// operation against fresh state.
pub async fn atomic_update<S, T, F>(
    store: &S,
    keys: &[RecordKey],
    timestamp: DateTime<Utc>,
    mutate: F,
) -> Result<T>
where
    S: RecordStore + ?Sized,
    F: FnOnce(&mut Snapshot) -> Result<T> + Send,
    T: Send,
{
    let mut snapshot = Snapshot::new(timestamp);
    for key in keys {
        let current = store.get(key).await?;
        snapshot.load(*key, current);
    }

    let output = mutate(&mut snapshot)?;
    let tx = snapshot.into_transaction();
    if tx.writes.is_empty() && tx.events.is_empty() {
        return Ok(output);
    }

    let (writes, events) = (tx.writes.len(), tx.events.len());
    match store.commit(tx).await {
        Ok(()) => {
            debug!(writes, events, "transaction committed");
            Ok(output)
        }
        Err(StoreError::Conflict(reason)) => {
            warn!(%reason, "transaction rejected");
            Err(Error::ConcurrentUpdateConflict)
        }
        Err(e) => Err(e.into()),
    }
}

/// Read a typed record outside a transaction.
pub(crate) async fn load_project<S>(store: &S, id: ProjectId) -> Result<Project>
where
    S: RecordStore + ?Sized,
{
    let key = RecordKey::Project(id);
    match store.get(&key).await? {
        None => Err(Error::ProjectNotFound(id)),
        Some(Versioned {
            value: Record::Project(p),
            ..
        }) => Ok(p),
        Some(_) => Err(corrupt(key, "project").into()),
    }
}

pub(crate) async fn load_work<S>(store: &S, id: WorkId) -> Result<ReviewableWork>
where
    S: RecordStore + ?Sized,
{
    let key = RecordKey::Work(id);
    match store.get(&key).await? {
        None => Err(Error::WorkNotFound(id)),
        Some(Versioned {
            value: Record::Work(w),
            ..
        }) => Ok(w),
        Some(_) => Err(corrupt(key, "work").into()),
    }
}
