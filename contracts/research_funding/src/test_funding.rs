use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use crate::invariants::*;
use crate::storage::EventFilter;
use crate::{
    events, funding, Env, Error, ErrorKind, Identity, LedgerEvent, MemoryStore, ProjectId,
    ProjectSpec,
};

fn setup() -> MemoryStore {
    MemoryStore::new()
}

fn identity(n: u8) -> Identity {
    Identity::from_bytes([n; 32])
}

fn launch_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn spec(goal: u64, min: u64) -> ProjectSpec {
    ProjectSpec {
        title: "Soil microbiome survey".into(),
        abstract_text: "Sequencing soil samples across three climate zones.".into(),
        category: "biology".into(),
        funding_goal: goal,
        min_contribution: min,
    }
}

async fn create(store: &MemoryStore, creator: Identity, goal: u64, min: u64) -> ProjectId {
    let env = Env::at(store, creator, launch_time());
    funding::create_project(&env, spec(goal, min)).await.unwrap()
}

#[tokio::test]
async fn test_create_project_initial_state() {
    let store = setup();
    let creator = identity(1);
    let id = create(&store, creator, 1000, 10).await;

    let project = funding::get_project(&store, id).await.unwrap();
    assert_eq!(project.id, 0);
    assert_eq!(project.creator, creator);
    assert_eq!(project.current_funding, 0);
    assert!(project.is_active);
    assert!(!project.is_fully_funded);
    assert_eq!(project.created_at, launch_time());
    assert_all_project_invariants(&project);
}

#[tokio::test]
async fn test_create_project_assigns_sequential_ids() {
    let store = setup();
    for expected in 0..4u64 {
        assert_eq!(create(&store, identity(1), 500, 5).await, expected);
    }
    let ids: Vec<ProjectId> = funding::list_projects(&store)
        .await
        .unwrap()
        .iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_create_project_rejects_invalid_spec() {
    let store = setup();
    let env = Env::new(&store, identity(1));

    let mut too_long = spec(100, 1);
    too_long.title = "x".repeat(funding::MAX_TITLE_LEN + 1);
    let mut blank = spec(100, 1);
    blank.category = "   ".into();

    for bad in [spec(0, 0), spec(100, 0), spec(100, 101), too_long, blank] {
        let err = funding::create_project(&env, bad).await.unwrap_err();
        assert!(matches!(err, Error::InvalidSpec(_)), "got {err:?}");
        assert_eq!(err.kind(), ErrorKind::InvalidSpec);
    }
    assert!(store.is_empty().unwrap());
}

#[tokio::test]
async fn test_minimum_equal_to_goal_is_accepted() {
    let store = setup();
    let id = create(&store, identity(1), 100, 100).await;
    let env = Env::new(&store, identity(2));
    funding::contribute(&env, id, 100).await.unwrap();
    assert!(funding::get_project(&store, id).await.unwrap().is_fully_funded);
}

#[tokio::test]
async fn test_funding_walkthrough() {
    let store = setup();
    let creator = identity(1);
    let (a, b, c) = (identity(0xa), identity(0xb), identity(0xc));
    let id = create(&store, creator, 1000, 10).await;
    let original = funding::get_project(&store, id).await.unwrap();

    let env = Env::new(&store, a);
    funding::contribute(&env, id, 400).await.unwrap();
    let record = funding::contribute(&env, id, 300).await.unwrap();
    assert_eq!(record.amount, 700);

    let project = funding::get_project(&store, id).await.unwrap();
    assert_eq!(project.current_funding, 700);
    assert!(!project.is_fully_funded);

    funding::contribute(&env.as_invoker(b), id, 300).await.unwrap();
    let funded = funding::get_project(&store, id).await.unwrap();
    assert_eq!(funded.current_funding, 1000);
    assert!(funded.is_fully_funded);
    assert_flag_monotonic(&project, &funded);

    let contributions = funding::list_contributions_for_project(&store, id).await.unwrap();
    assert_contributions_match(&funded, &contributions);

    let withdrawal = funding::withdraw(&env.as_invoker(creator), id).await.unwrap();
    assert_eq!(withdrawal.amount, 1000);
    assert_eq!(withdrawal.recipient, creator);

    let closed = funding::get_project(&store, id).await.unwrap();
    assert_eq!(closed.current_funding, 0);
    assert!(!closed.is_active);
    assert!(closed.is_fully_funded);
    assert_project_immutable_fields(&original, &closed);
    assert_all_project_invariants(&closed);

    let err = funding::contribute(&env.as_invoker(c), id, 50).await.unwrap_err();
    assert!(matches!(err, Error::ProjectInactive(_)));
    assert_eq!(err.kind(), ErrorKind::InactiveState);
}

#[tokio::test]
async fn test_repeat_contribution_updates_single_record() {
    let store = setup();
    let id = create(&store, identity(1), 10_000, 10).await;
    let funder = identity(2);
    let env = Env::new(&store, funder);

    let first = funding::contribute(&env, id, 100).await.unwrap();
    let second = funding::contribute(&env, id, 250).await.unwrap();
    assert_eq!(first.key, second.key);
    assert_eq!(second.amount, 350);

    let records = funding::list_contributions_for_project(&store, id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].amount, 350);

    let direct = funding::get_contribution(&store, id, &funder).await.unwrap();
    assert_eq!(direct, Some(second));
}

#[tokio::test]
async fn test_below_minimum_rejected_without_mutation() {
    let store = setup();
    let id = create(&store, identity(1), 1000, 10).await;
    let funder = identity(2);
    let env = Env::new(&store, funder);
    let before = funding::get_project(&store, id).await.unwrap();
    let events_before = events::list_events(&store, &EventFilter::All).await.unwrap();

    for amount in [0, 5, 9] {
        let err = funding::contribute(&env, id, amount).await.unwrap_err();
        assert!(matches!(
            err,
            Error::BelowMinimumContribution { minimum: 10, .. }
        ));
        assert!(!err.is_retryable());
    }

    assert_eq!(funding::get_project(&store, id).await.unwrap(), before);
    assert_eq!(funding::get_contribution(&store, id, &funder).await.unwrap(), None);
    assert_eq!(
        events::list_events(&store, &EventFilter::All).await.unwrap(),
        events_before
    );
}

#[tokio::test]
async fn test_minimum_applies_per_call_not_cumulative() {
    let store = setup();
    let id = create(&store, identity(1), 1000, 10).await;
    let env = Env::new(&store, identity(2));

    funding::contribute(&env, id, 10).await.unwrap();
    funding::contribute(&env, id, 10).await.unwrap();
    // A running total of 20 does not make a 5 acceptable.
    assert!(funding::contribute(&env, id, 5).await.is_err());
    let record = funding::get_contribution(&store, id, &identity(2)).await.unwrap().unwrap();
    assert_eq!(record.amount, 20);
}

#[tokio::test]
async fn test_contribute_unknown_project() {
    let store = setup();
    let env = Env::new(&store, identity(2));
    let err = funding::contribute(&env, 42, 100).await.unwrap_err();
    assert!(matches!(err, Error::ProjectNotFound(42)));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(store.is_empty().unwrap());
}

#[tokio::test]
async fn test_fully_funded_event_emitted_once_and_overfunding_allowed() {
    let store = setup();
    let id = create(&store, identity(1), 100, 10).await;
    let env = Env::new(&store, identity(2));

    funding::contribute(&env, id, 60).await.unwrap();
    funding::contribute(&env, id, 60).await.unwrap();
    funding::contribute(&env, id, 60).await.unwrap();

    let project = funding::get_project(&store, id).await.unwrap();
    assert_eq!(project.current_funding, 180);
    assert!(project.is_fully_funded);

    let log = events::list_events(&store, &EventFilter::Project(id)).await.unwrap();
    let crossings: Vec<_> = log
        .iter()
        .filter(|e| matches!(e.event, LedgerEvent::ProjectFullyFunded { .. }))
        .collect();
    assert_eq!(crossings.len(), 1);
    assert_eq!(
        crossings[0].event,
        LedgerEvent::ProjectFullyFunded {
            project: id,
            total: 120
        }
    );
}

#[tokio::test]
async fn test_withdraw_requires_creator() {
    let store = setup();
    let id = create(&store, identity(1), 100, 10).await;
    let env = Env::new(&store, identity(2));
    funding::contribute(&env, id, 100).await.unwrap();

    let err = funding::withdraw(&env, id).await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized { .. }));
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert!(funding::get_project(&store, id).await.unwrap().is_active);
}

#[tokio::test]
async fn test_withdraw_before_goal_fails() {
    let store = setup();
    let creator = identity(1);
    let id = create(&store, creator, 100, 10).await;
    funding::contribute(&Env::new(&store, identity(2)), id, 99).await.unwrap();

    let err = funding::withdraw(&Env::new(&store, creator), id).await.unwrap_err();
    assert!(matches!(err, Error::GoalNotMet(_)));
    assert_eq!(funding::get_project(&store, id).await.unwrap().current_funding, 99);
}

#[tokio::test]
async fn test_second_withdraw_fails_inactive() {
    let store = setup();
    let creator = identity(1);
    let id = create(&store, creator, 100, 10).await;
    funding::contribute(&Env::new(&store, identity(2)), id, 150).await.unwrap();

    let env = Env::new(&store, creator);
    assert_eq!(funding::withdraw(&env, id).await.unwrap().amount, 150);
    let err = funding::withdraw(&env, id).await.unwrap_err();
    assert!(matches!(err, Error::ProjectInactive(_)));

    let withdrawals = events::list_events(&store, &EventFilter::Project(id))
        .await
        .unwrap()
        .into_iter()
        .filter(|e| matches!(e.event, LedgerEvent::FundsWithdrawn { .. }))
        .count();
    assert_eq!(withdrawals, 1);
}

#[tokio::test]
async fn test_close_project() {
    let store = setup();
    let creator = identity(1);
    let id = create(&store, creator, 1000, 10).await;
    let funder = Env::new(&store, identity(2));
    funding::contribute(&funder, id, 200).await.unwrap();

    let err = funding::close(&funder, id).await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized { .. }));

    let closed = funding::close(&Env::new(&store, creator), id).await.unwrap();
    assert!(!closed.is_active);
    assert_eq!(closed.current_funding, 200);
    assert_all_project_invariants(&closed);

    let err = funding::close(&Env::new(&store, creator), id).await.unwrap_err();
    assert!(matches!(err, Error::ProjectInactive(_)));

    for amount in [0, 5, 200, 10_000] {
        let err = funding::contribute(&funder, id, amount).await.unwrap_err();
        assert!(matches!(err, Error::ProjectInactive(_)), "amount {amount}: {err:?}");
    }
    let err = funding::withdraw(&Env::new(&store, creator), id).await.unwrap_err();
    assert!(matches!(err, Error::ProjectInactive(_)));
}

#[tokio::test]
async fn test_close_rejected_once_fully_funded() {
    let store = setup();
    let creator = identity(1);
    let id = create(&store, creator, 100, 10).await;
    funding::contribute(&Env::new(&store, identity(2)), id, 100).await.unwrap();
    let before = funding::get_project(&store, id).await.unwrap();

    let env = Env::new(&store, creator);
    let err = funding::close(&env, id).await.unwrap_err();
    assert!(matches!(err, Error::ProjectFullyFunded(_)));
    assert_eq!(err.kind(), ErrorKind::FullyFunded);
    assert!(!err.is_retryable());
    assert_eq!(funding::get_project(&store, id).await.unwrap(), before);

    // The balance is still reachable through withdraw.
    let withdrawal = funding::withdraw(&env, id).await.unwrap();
    assert_eq!(withdrawal.amount, 100);
    let closed_events = events::list_events(&store, &EventFilter::Project(id))
        .await
        .unwrap()
        .into_iter()
        .filter(|e| matches!(e.event, LedgerEvent::ProjectClosed { .. }))
        .count();
    assert_eq!(closed_events, 0);
}

#[tokio::test]
async fn test_close_checks_creator_before_funding_state() {
    let store = setup();
    let id = create(&store, identity(1), 100, 10).await;
    let funder = Env::new(&store, identity(2));
    funding::contribute(&funder, id, 100).await.unwrap();

    let err = funding::close(&funder, id).await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized { .. }));
}

#[tokio::test]
async fn test_funding_overflow_rejected() {
    let store = setup();
    let id = create(&store, identity(1), u64::MAX, 1).await;
    funding::contribute(&Env::new(&store, identity(2)), id, u64::MAX).await.unwrap();

    let err = funding::contribute(&Env::new(&store, identity(3)), id, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FundingOverflow(_)));
    assert_eq!(err.kind(), ErrorKind::Overflow);
    assert_eq!(funding::get_contribution(&store, id, &identity(3)).await.unwrap(), None);
    assert_eq!(
        funding::get_project(&store, id).await.unwrap().current_funding,
        u64::MAX
    );
}

#[tokio::test]
async fn test_list_contributions_for_funder() {
    let store = setup();
    let p0 = create(&store, identity(1), 1000, 10).await;
    let p1 = create(&store, identity(1), 1000, 10).await;
    let funder = Env::new(&store, identity(7));
    let other = Env::new(&store, identity(8));

    funding::contribute(&funder, p1, 30).await.unwrap();
    funding::contribute(&funder, p0, 20).await.unwrap();
    funding::contribute(&other, p0, 90).await.unwrap();

    let mine = funding::list_contributions_for_funder(&store, &identity(7)).await.unwrap();
    let summary: Vec<(ProjectId, u64)> = mine.iter().map(|c| (c.project, c.amount)).collect();
    assert_eq!(summary, vec![(p0, 20), (p1, 30)]);

    let on_p0 = funding::list_contributions_for_project(&store, p0).await.unwrap();
    assert_eq!(on_p0.len(), 2);
    assert_contributions_match(&funding::get_project(&store, p0).await.unwrap(), &on_p0);
}

#[tokio::test]
async fn test_contribution_events_carry_totals() {
    let store = setup();
    let id = create(&store, identity(1), 1000, 10).await;
    let env = Env::new(&store, identity(2));
    funding::contribute(&env, id, 40).await.unwrap();
    funding::contribute(&env, id, 60).await.unwrap();

    let log = events::list_events(&store, &EventFilter::Project(id)).await.unwrap();
    let kinds: Vec<&str> = log.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(
        kinds,
        vec!["project_created", "contribution_received", "contribution_received"]
    );
    assert_eq!(
        log[2].event,
        LedgerEvent::ContributionReceived {
            project: id,
            funder: identity(2),
            amount: 60,
            cumulative: 100,
            project_total: 100,
        }
    );
    assert!(log.windows(2).all(|w| w[0].seq < w[1].seq));
}

#[test]
fn test_error_codes_are_stable() {
    assert_eq!(Error::ProjectNotFound(0).code(), 1);
    assert_eq!(Error::ConcurrentUpdateConflict.code(), 8);
    assert!(Error::ConcurrentUpdateConflict.is_retryable());
    assert!(!Error::GoalNotMet(0).is_retryable());
    assert_eq!(ErrorKind::InactiveState.as_str(), "inactive_state");
    assert_eq!(Error::ProjectFullyFunded(0).code(), 11);
    assert_eq!(ErrorKind::FullyFunded.as_str(), "fully_funded");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_contributions_accumulate_per_funder(
        calls in proptest::collection::vec((0u8..4, 10u64..1_000), 1..40)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let store = setup();
            let id = create(&store, identity(0xff), 5_000, 10).await;
            let mut expected = [0u64; 4];
            let mut previous = funding::get_project(&store, id).await.unwrap();

            for (who, amount) in &calls {
                let env = Env::new(&store, identity(*who));
                funding::contribute(&env, id, *amount).await.unwrap();
                expected[*who as usize] += amount;

                let current = funding::get_project(&store, id).await.unwrap();
                assert_contribute_invariant(
                    previous.current_funding,
                    current.current_funding,
                    *amount,
                );
                assert_flag_monotonic(&previous, &current);
                assert_all_project_invariants(&current);
                previous = current;
            }

            let records = funding::list_contributions_for_project(&store, id).await.unwrap();
            assert_contributions_match(&previous, &records);
            for record in &records {
                let who = record.funder.as_bytes()[0] as usize;
                assert_eq!(record.amount, expected[who]);
            }
            let total: u64 = expected.iter().sum();
            assert_eq!(previous.current_funding, total);
            assert_eq!(previous.is_fully_funded, total >= 5_000);
        });
    }
}
