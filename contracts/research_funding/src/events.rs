//! Ledger events.
//!
//! Events are staged by each operation and committed in the same transaction
//! as the records they describe, so an event is visible iff its state change
//! is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::{EventFilter, RecordStore};
use crate::types::{Identity, PeerReviewStatus, ProjectId, WorkId};
use crate::Result;

/// Everything the ledger announces to the outside world.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    ProjectCreated {
        project: ProjectId,
        creator: Identity,
        funding_goal: u64,
        min_contribution: u64,
    },
    ContributionReceived {
        project: ProjectId,
        funder: Identity,
        amount: u64,
        /// Funder's running total for this project.
        cumulative: u64,
        project_total: u64,
    },
    /// Emitted exactly once per project.
    ProjectFullyFunded {
        project: ProjectId,
        total: u64,
    },
    FundsWithdrawn {
        project: ProjectId,
        recipient: Identity,
        amount: u64,
    },
    ProjectClosed {
        project: ProjectId,
        creator: Identity,
        remaining_funding: u64,
    },
    WorkPublished {
        work: WorkId,
        owner: Identity,
        funding_source: Option<ProjectId>,
    },
    ReviewStatusUpdated {
        work: WorkId,
        reviewer: Identity,
        from: PeerReviewStatus,
        to: PeerReviewStatus,
    },
    AccessGranted {
        work: WorkId,
        accessor: Identity,
        authority: Identity,
    },
}

impl LedgerEvent {
    /// Short identifier suitable for storage and filtering.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectCreated { .. } => "project_created",
            Self::ContributionReceived { .. } => "contribution_received",
            Self::ProjectFullyFunded { .. } => "project_fully_funded",
            Self::FundsWithdrawn { .. } => "funds_withdrawn",
            Self::ProjectClosed { .. } => "project_closed",
            Self::WorkPublished { .. } => "work_published",
            Self::ReviewStatusUpdated { .. } => "review_status_updated",
            Self::AccessGranted { .. } => "access_granted",
        }
    }

    /// The project this event concerns. A published work reports its funding
    /// source here.
    pub fn project_id(&self) -> Option<ProjectId> {
        match self {
            Self::ProjectCreated { project, .. }
            | Self::ContributionReceived { project, .. }
            | Self::ProjectFullyFunded { project, .. }
            | Self::FundsWithdrawn { project, .. }
            | Self::ProjectClosed { project, .. } => Some(*project),
            Self::WorkPublished { funding_source, .. } => *funding_source,
            Self::ReviewStatusUpdated { .. } | Self::AccessGranted { .. } => None,
        }
    }

    pub fn work_id(&self) -> Option<WorkId> {
        match self {
            Self::WorkPublished { work, .. }
            | Self::ReviewStatusUpdated { work, .. }
            | Self::AccessGranted { work, .. } => Some(*work),
            _ => None,
        }
    }
}

/// A committed event with its position in the global log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// 1-based commit order across the whole store.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: LedgerEvent,
}

/// List committed events matching `filter`, oldest first.
pub async fn list_events<S>(store: &S, filter: &EventFilter) -> Result<Vec<EventRecord>>
where
    S: RecordStore + ?Sized,
{
    let mut events = store.events(filter).await?;
    events.sort_by_key(|e| e.seq);
    debug!(?filter, count = events.len(), "listed events");
    Ok(events)
}
