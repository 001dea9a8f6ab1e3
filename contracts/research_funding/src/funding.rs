//! # Funding ledger
//!
//! Project lifecycle and contribution accounting.
//!
//! ```text
//! create ──► active ──(contributions reach goal)──► active + fully funded ──► withdrawn
//!               └──(close)──► closed
//! ```
//!
//! `withdrawn` and `closed` are both `is_active == false`; neither accepts
//! further contributions or withdrawals. Only an under-funded project can be
//! closed; once the goal is met the balance can only leave through
//! [`withdraw`]. `is_fully_funded` flips once and
//! stays set, including after a withdrawal zeroes `current_funding`.
//!
//! A contribution touches two records, the project and the funder's
//! contribution, and commits them in one transaction keyed on both. Racing
//! writers to the same project are rejected with
//! [`Error::ConcurrentUpdateConflict`] rather than merged.

use tracing::{debug, info, warn};

use crate::address::derive_contribution_key;
use crate::env::Env;
use crate::events::LedgerEvent;
use crate::storage::{
    atomic_update, load_project, Record, RecordKey, RecordStore, ScanFilter, StoreError,
    Versioned,
};
use crate::types::{Contribution, Identity, Project, ProjectId, ProjectSpec, Withdrawal};
use crate::{Error, Result};

pub const MAX_TITLE_LEN: usize = 128;
pub const MAX_ABSTRACT_LEN: usize = 2048;
pub const MAX_CATEGORY_LEN: usize = 64;

/// Non-empty and at most `max` bytes.
pub(crate) fn validate_text(field: &str, value: &str, max: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidSpec(format!("{field} must not be empty")));
    }
    if value.len() > max {
        return Err(Error::InvalidSpec(format!(
            "{field} is {} bytes, limit is {max}",
            value.len()
        )));
    }
    Ok(())
}

fn validate_spec(spec: &ProjectSpec) -> Result<()> {
    validate_text("title", &spec.title, MAX_TITLE_LEN)?;
    validate_text("abstract", &spec.abstract_text, MAX_ABSTRACT_LEN)?;
    validate_text("category", &spec.category, MAX_CATEGORY_LEN)?;
    if spec.funding_goal == 0 {
        return Err(Error::InvalidSpec("funding goal must be positive".into()));
    }
    if spec.min_contribution == 0 || spec.min_contribution > spec.funding_goal {
        return Err(Error::InvalidSpec(format!(
            "minimum contribution must be in 1..={}",
            spec.funding_goal
        )));
    }
    Ok(())
}

fn log_conflict<T>(result: Result<T>, op: &'static str, project: ProjectId) -> Result<T> {
    if let Err(e) = &result {
        if e.is_retryable() {
            warn!(op, project, "concurrent update conflict");
        }
    }
    result
}

/// Register a new project owned by the invoker. Returns its id.
pub async fn create_project<S>(env: &Env<'_, S>, spec: ProjectSpec) -> Result<ProjectId>
where
    S: RecordStore + ?Sized,
{
    validate_spec(&spec)?;
    let creator = env.invoker();
    let created_at = env.timestamp();

    let id = atomic_update(env.store(), &[RecordKey::ProjectCount], created_at, |snap| {
        let id = snap.counter(&RecordKey::ProjectCount)?;
        let next = id
            .checked_add(1)
            .ok_or_else(|| Error::InvalidSpec("project id space exhausted".into()))?;
        snap.put(RecordKey::ProjectCount, Record::Counter(next));

        snap.emit(LedgerEvent::ProjectCreated {
            project: id,
            creator,
            funding_goal: spec.funding_goal,
            min_contribution: spec.min_contribution,
        });
        snap.put(
            RecordKey::Project(id),
            Record::Project(Project {
                id,
                creator,
                title: spec.title,
                abstract_text: spec.abstract_text,
                category: spec.category,
                funding_goal: spec.funding_goal,
                min_contribution: spec.min_contribution,
                current_funding: 0,
                is_active: true,
                is_fully_funded: false,
                created_at,
            }),
        );
        Ok(id)
    })
    .await?;

    info!(project = id, %creator, "project created");
    Ok(id)
}

/// Add `amount` from the invoker to `project_id`.
///
/// Returns the funder's updated cumulative record. The minimum applies to
/// this call's amount, not to the running total.
pub async fn contribute<S>(
    env: &Env<'_, S>,
    project_id: ProjectId,
    amount: u64,
) -> Result<Contribution>
where
    S: RecordStore + ?Sized,
{
    let funder = env.invoker();
    let now = env.timestamp();
    let key = derive_contribution_key(project_id, &funder);
    let keys = [RecordKey::Project(project_id), RecordKey::Contribution(key)];

    let result = atomic_update(env.store(), &keys, now, |snap| {
        let mut project = snap
            .project(project_id)?
            .ok_or(Error::ProjectNotFound(project_id))?;
        if !project.is_active {
            return Err(Error::ProjectInactive(project_id));
        }
        if amount == 0 || amount < project.min_contribution {
            return Err(Error::BelowMinimumContribution {
                amount,
                minimum: project.min_contribution,
            });
        }

        let mut contribution = snap.contribution(&key)?.unwrap_or(Contribution {
            key,
            project: project_id,
            funder,
            amount: 0,
            timestamp: now,
        });
        contribution.amount = contribution
            .amount
            .checked_add(amount)
            .ok_or(Error::FundingOverflow(project_id))?;
        contribution.timestamp = now;

        project.current_funding = project
            .current_funding
            .checked_add(amount)
            .ok_or(Error::FundingOverflow(project_id))?;
        let crossed = !project.is_fully_funded && project.current_funding >= project.funding_goal;
        if crossed {
            project.is_fully_funded = true;
        }

        snap.emit(LedgerEvent::ContributionReceived {
            project: project_id,
            funder,
            amount,
            cumulative: contribution.amount,
            project_total: project.current_funding,
        });
        if crossed {
            snap.emit(LedgerEvent::ProjectFullyFunded {
                project: project_id,
                total: project.current_funding,
            });
        }

        snap.put(RecordKey::Contribution(key), Record::Contribution(contribution.clone()));
        snap.put(RecordKey::Project(project_id), Record::Project(project));
        Ok(contribution)
    })
    .await;

    let contribution = log_conflict(result, "contribute", project_id)?;
    info!(
        project = project_id,
        %funder,
        amount,
        cumulative = contribution.amount,
        "contribution committed"
    );
    Ok(contribution)
}

/// Hand the whole balance to the creator and deactivate the project.
///
/// Requires the invoker to be the creator and the goal to have been met.
/// A second call fails with [`Error::ProjectInactive`].
pub async fn withdraw<S>(env: &Env<'_, S>, project_id: ProjectId) -> Result<Withdrawal>
where
    S: RecordStore + ?Sized,
{
    let caller = env.invoker();
    let result = atomic_update(
        env.store(),
        &[RecordKey::Project(project_id)],
        env.timestamp(),
        |snap| {
            let mut project = snap
                .project(project_id)?
                .ok_or(Error::ProjectNotFound(project_id))?;
            if project.creator != caller {
                return Err(Error::Unauthorized {
                    caller,
                    action: "withdraw project funds",
                });
            }
            if !project.is_active {
                return Err(Error::ProjectInactive(project_id));
            }
            if !project.is_fully_funded {
                return Err(Error::GoalNotMet(project_id));
            }

            let withdrawal = Withdrawal {
                project: project_id,
                recipient: project.creator,
                amount: project.current_funding,
            };
            project.current_funding = 0;
            project.is_active = false;

            snap.emit(LedgerEvent::FundsWithdrawn {
                project: project_id,
                recipient: withdrawal.recipient,
                amount: withdrawal.amount,
            });
            snap.put(RecordKey::Project(project_id), Record::Project(project));
            Ok(withdrawal)
        },
    )
    .await;

    let withdrawal = log_conflict(result, "withdraw", project_id)?;
    info!(project = project_id, amount = withdrawal.amount, "funds withdrawn");
    Ok(withdrawal)
}

/// Cancel an under-funded project without moving funds.
///
/// Fails with [`Error::ProjectFullyFunded`] once the goal has been met.
pub async fn close<S>(env: &Env<'_, S>, project_id: ProjectId) -> Result<Project>
where
    S: RecordStore + ?Sized,
{
    let caller = env.invoker();
    let result = atomic_update(
        env.store(),
        &[RecordKey::Project(project_id)],
        env.timestamp(),
        |snap| {
            let mut project = snap
                .project(project_id)?
                .ok_or(Error::ProjectNotFound(project_id))?;
            if project.creator != caller {
                return Err(Error::Unauthorized {
                    caller,
                    action: "close project",
                });
            }
            if !project.is_active {
                return Err(Error::ProjectInactive(project_id));
            }
            if project.is_fully_funded {
                return Err(Error::ProjectFullyFunded(project_id));
            }
            project.is_active = false;

            snap.emit(LedgerEvent::ProjectClosed {
                project: project_id,
                creator: caller,
                remaining_funding: project.current_funding,
            });
            snap.put(RecordKey::Project(project_id), Record::Project(project.clone()));
            Ok(project)
        },
    )
    .await;

    let project = log_conflict(result, "close", project_id)?;
    info!(project = project_id, "project closed");
    Ok(project)
}

// ── Queries ──────────────────────────────────────────────────────────

pub async fn get_project<S>(store: &S, id: ProjectId) -> Result<Project>
where
    S: RecordStore + ?Sized,
{
    load_project(store, id).await
}

/// All projects, by id.
pub async fn list_projects<S>(store: &S) -> Result<Vec<Project>>
where
    S: RecordStore + ?Sized,
{
    let mut projects: Vec<Project> = store
        .scan(&ScanFilter::Projects)
        .await?
        .into_iter()
        .filter_map(|r| match r {
            Record::Project(p) => Some(p),
            _ => None,
        })
        .collect();
    projects.sort_by_key(|p| p.id);
    debug!(count = projects.len(), "listed projects");
    Ok(projects)
}

/// Direct lookup through the derived key; no scan.
pub async fn get_contribution<S>(
    store: &S,
    project: ProjectId,
    funder: &Identity,
) -> Result<Option<Contribution>>
where
    S: RecordStore + ?Sized,
{
    let key = RecordKey::Contribution(derive_contribution_key(project, funder));
    match store.get(&key).await? {
        None => Ok(None),
        Some(Versioned {
            value: Record::Contribution(c),
            ..
        }) => Ok(Some(c)),
        Some(_) => Err(StoreError::Corrupt {
            key,
            expected: "contribution",
        }
        .into()),
    }
}

async fn scan_contributions<S>(store: &S, filter: ScanFilter) -> Result<Vec<Contribution>>
where
    S: RecordStore + ?Sized,
{
    let mut contributions: Vec<Contribution> = store
        .scan(&filter)
        .await?
        .into_iter()
        .filter_map(|r| match r {
            Record::Contribution(c) => Some(c),
            _ => None,
        })
        .collect();
    contributions.sort_by(|a, b| (a.project, a.funder).cmp(&(b.project, b.funder)));
    debug!(?filter, count = contributions.len(), "listed contributions");
    Ok(contributions)
}

/// Every funder's cumulative record for `project`, by funder.
pub async fn list_contributions_for_project<S>(
    store: &S,
    project: ProjectId,
) -> Result<Vec<Contribution>>
where
    S: RecordStore + ?Sized,
{
    scan_contributions(store, ScanFilter::ContributionsByProject(project)).await
}

/// Every project `funder` has backed, by project.
pub async fn list_contributions_for_funder<S>(
    store: &S,
    funder: &Identity,
) -> Result<Vec<Contribution>>
where
    S: RecordStore + ?Sized,
{
    scan_contributions(store, ScanFilter::ContributionsByFunder(*funder)).await
}
