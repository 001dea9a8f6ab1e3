use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::invariants::assert_contributions_match;
use crate::storage::{
    EventFilter, Record, RecordKey, RecordStore, ScanFilter, StoreError, StoreResult,
    Transaction, Versioned,
};
use crate::{
    events, funding, retry_on_conflict, Env, Error, EventRecord, Identity, LedgerEvent,
    MemoryStore, ProjectId, ProjectSpec, RetryPolicy,
};

fn identity(n: u8) -> Identity {
    Identity::from_bytes([n; 32])
}

fn spec(goal: u64, min: u64) -> ProjectSpec {
    ProjectSpec {
        title: "Deep-sea vent sampling".into(),
        abstract_text: "Two expeditions to sample hydrothermal vent fauna.".into(),
        category: "oceanography".into(),
        funding_goal: goal,
        min_contribution: min,
    }
}

fn patient() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 1_000,
        backoff: Duration::from_micros(50),
    }
}

/// Wraps a [`MemoryStore`] and lets one rival contribution commit right
/// before the next transaction, after that transaction has read its state.
struct RacingStore {
    inner: MemoryStore,
    rival: Mutex<Option<(ProjectId, Identity, u64)>>,
}

impl RacingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            rival: Mutex::new(None),
        }
    }

    fn arm(&self, project: ProjectId, funder: Identity, amount: u64) {
        *self.rival.lock().unwrap() = Some((project, funder, amount));
    }
}

#[async_trait]
impl RecordStore for RacingStore {
    async fn get(&self, key: &RecordKey) -> StoreResult<Option<Versioned<Record>>> {
        self.inner.get(key).await
    }

    async fn commit(&self, tx: Transaction) -> StoreResult<()> {
        let rival = self.rival.lock().unwrap().take();
        if let Some((project, funder, amount)) = rival {
            funding::contribute(&Env::new(&self.inner, funder), project, amount)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        self.inner.commit(tx).await
    }

    async fn scan(&self, filter: &ScanFilter) -> StoreResult<Vec<Record>> {
        self.inner.scan(filter).await
    }

    async fn events(&self, filter: &EventFilter) -> StoreResult<Vec<EventRecord>> {
        self.inner.events(filter).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_contributions_lose_no_updates() {
    let store = Arc::new(MemoryStore::new());
    let id = funding::create_project(&Env::new(store.as_ref(), identity(0)), spec(1_000_000, 1))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..64u64 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let env = Env::new(store.as_ref(), identity((i % 8) as u8 + 1));
            let env = &env;
            retry_on_conflict(patient(), move || funding::contribute(env, id, i + 1)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let project = funding::get_project(store.as_ref(), id).await.unwrap();
    let expected: u64 = (1..=64).sum();
    assert_eq!(project.current_funding, expected);

    let records = funding::list_contributions_for_project(store.as_ref(), id)
        .await
        .unwrap();
    assert_eq!(records.len(), 8);
    assert_contributions_match(&project, &records);
    for record in &records {
        let slot = record.funder.as_bytes()[0] as u64 - 1;
        let own: u64 = (0..64u64).filter(|i| i % 8 == slot).map(|i| i + 1).sum();
        assert_eq!(record.amount, own);
    }

    let received = events::list_events(store.as_ref(), &EventFilter::Project(id))
        .await
        .unwrap()
        .into_iter()
        .filter(|e| matches!(e.event, LedgerEvent::ContributionReceived { .. }))
        .count();
    assert_eq!(received, 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_goal_crossing_flags_once() {
    let store = Arc::new(MemoryStore::new());
    let id = funding::create_project(&Env::new(store.as_ref(), identity(0)), spec(100, 10))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..20u8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let env = Env::new(store.as_ref(), identity(i + 1));
            let env = &env;
            retry_on_conflict(patient(), move || funding::contribute(env, id, 10)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let project = funding::get_project(store.as_ref(), id).await.unwrap();
    assert_eq!(project.current_funding, 200);
    assert!(project.is_fully_funded);
    let crossings = events::list_events(store.as_ref(), &EventFilter::Project(id))
        .await
        .unwrap()
        .into_iter()
        .filter(|e| matches!(e.event, LedgerEvent::ProjectFullyFunded { .. }))
        .count();
    assert_eq!(crossings, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_project_creation_allocates_unique_ids() {
    let store = Arc::new(MemoryStore::new());
    let mut handles = Vec::new();
    for i in 0..16u8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let env = Env::new(store.as_ref(), identity(i));
            let env = &env;
            retry_on_conflict(patient(), move || funding::create_project(env, spec(100, 1))).await
        }));
    }
    let mut ids = BTreeSet::new();
    for handle in handles {
        assert!(ids.insert(handle.await.unwrap().unwrap()));
    }
    assert_eq!(ids, (0..16).collect::<BTreeSet<ProjectId>>());
}

#[tokio::test]
async fn test_lost_race_applies_nothing() {
    let store = RacingStore::new();
    let id = funding::create_project(&Env::new(&store.inner, identity(0)), spec(1000, 10))
        .await
        .unwrap();
    let loser = identity(2);

    store.arm(id, identity(1), 300);
    let err = funding::contribute(&Env::new(&store, loser), id, 500)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConcurrentUpdateConflict));
    assert!(err.is_retryable());

    // Neither half of the losing transaction landed.
    let project = funding::get_project(&store, id).await.unwrap();
    assert_eq!(project.current_funding, 300);
    assert_eq!(funding::get_contribution(&store, id, &loser).await.unwrap(), None);

    // Retrying against fresh state succeeds.
    funding::contribute(&Env::new(&store, loser), id, 500).await.unwrap();
    let project = funding::get_project(&store, id).await.unwrap();
    assert_eq!(project.current_funding, 800);
    let records = funding::list_contributions_for_project(&store, id).await.unwrap();
    assert_contributions_match(&project, &records);
}

#[tokio::test]
async fn test_retry_recovers_from_lost_race() {
    let store = RacingStore::new();
    let id = funding::create_project(&Env::new(&store.inner, identity(0)), spec(1000, 10))
        .await
        .unwrap();

    store.arm(id, identity(1), 100);
    let env = Env::new(&store, identity(2));
    let env = &env;
    let record = retry_on_conflict(RetryPolicy::default(), move || {
        funding::contribute(env, id, 50)
    })
    .await
    .unwrap();
    assert_eq!(record.amount, 50);
    assert_eq!(funding::get_project(&store, id).await.unwrap().current_funding, 150);
}

#[tokio::test]
async fn test_withdraw_racing_a_contribution_withdraws_everything() {
    let store = RacingStore::new();
    let creator = identity(0);
    let id = funding::create_project(&Env::new(&store.inner, creator), spec(100, 10))
        .await
        .unwrap();
    funding::contribute(&Env::new(&store.inner, identity(1)), id, 100)
        .await
        .unwrap();

    store.arm(id, identity(2), 40);
    let env = Env::new(&store, creator);
    let err = funding::withdraw(&env, id).await.unwrap_err();
    assert!(matches!(err, Error::ConcurrentUpdateConflict));
    assert!(funding::get_project(&store, id).await.unwrap().is_active);

    let withdrawal = funding::withdraw(&env, id).await.unwrap();
    assert_eq!(withdrawal.amount, 140);
    let project = funding::get_project(&store, id).await.unwrap();
    assert_eq!(project.current_funding, 0);
    assert!(!project.is_active);
}
