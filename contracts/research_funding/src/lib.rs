//! # Research Funding Ledger
//!
//! Funding ledger and access-gating state machine for research projects.
//! Creators register projects, many independent funders contribute, the
//! creator withdraws once the goal is met (or closes an under-funded project),
//! and published works gate their datasets behind peer review and access
//! grants.
//!
//! | Phase        | Operation(s)                                                  |
//! |--------------|---------------------------------------------------------------|
//! | Registration | [`funding::create_project`]                                   |
//! | Funding      | [`funding::contribute`]                                       |
//! | Settlement   | [`funding::withdraw`], [`funding::close`]                     |
//! | Publication  | [`review::publish_work`]                                      |
//! | Review       | [`review::update_review_status`]                              |
//! | Access       | [`review::grant_access`], [`review::has_access`]              |
//! | Queries      | `get_project`, `list_projects`, `list_contributions_for_*`        |
//! |              | `get_work`, `list_works`, [`events::list_events`]             |
//!
//! ## Architecture
//!
//! State lives in a [`RecordStore`]; every write goes through
//! [`storage::atomic_update`], which commits all touched records and emitted
//! events together or not at all. Contribution records are addressed by
//! [`address::derive_contribution_key`]. Operations receive an explicit
//! [`Env`] (store handle, invoker, timestamp) instead of ambient state.

#[macro_use]
mod types;

pub mod address;
pub mod env;
pub mod events;
pub mod funding;
pub mod memory;
pub mod retry;
pub mod review;
pub mod storage;

#[cfg(test)]
mod test_concurrency;
#[cfg(test)]
mod test_funding;

use serde::Serialize;
use thiserror::Error;

pub use address::{derive_contribution_key, ContributionKey};
pub use env::Env;
pub use events::{EventRecord, LedgerEvent};
pub use memory::MemoryStore;
pub use retry::{retry_on_conflict, RetryPolicy};
pub use storage::{EventFilter, RecordStore, StoreError};
pub use types::{
    AccessType, Contribution, Identity, ParseIdError, PeerReviewStatus, Project, ProjectId,
    ProjectSpec, Review, ReviewableWork, Withdrawal, WorkId, WorkMetadata,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),

    #[error("work {0} not found")]
    WorkNotFound(WorkId),

    #[error("{caller} is not authorized to {action}")]
    Unauthorized {
        caller: Identity,
        action: &'static str,
    },

    #[error("project {0} is not active")]
    ProjectInactive(ProjectId),

    #[error("contribution of {amount} is below the minimum of {minimum}")]
    BelowMinimumContribution { amount: u64, minimum: u64 },

    #[error("project {0} has not reached its funding goal")]
    GoalNotMet(ProjectId),

    #[error("project {0} is fully funded; withdraw instead of closing")]
    ProjectFullyFunded(ProjectId),

    #[error("lost a concurrent update race; re-read and retry")]
    ConcurrentUpdateConflict,

    #[error("funding overflow on project {0}")]
    FundingOverflow(ProjectId),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(_) => Self::ConcurrentUpdateConflict,
            other => Self::Store(other),
        }
    }
}

/// Error taxonomy surfaced to callers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidSpec,
    NotFound,
    Unauthorized,
    InactiveState,
    BelowMinimumContribution,
    GoalNotMet,
    FullyFunded,
    ConcurrentUpdateConflict,
    Overflow,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSpec => "invalid_spec",
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::InactiveState => "inactive_state",
            Self::BelowMinimumContribution => "below_minimum_contribution",
            Self::GoalNotMet => "goal_not_met",
            Self::FullyFunded => "fully_funded",
            Self::ConcurrentUpdateConflict => "concurrent_update_conflict",
            Self::Overflow => "overflow",
            Self::Storage => "storage",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSpec(_) => ErrorKind::InvalidSpec,
            Self::ProjectNotFound(_) | Self::WorkNotFound(_) => ErrorKind::NotFound,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::ProjectInactive(_) => ErrorKind::InactiveState,
            Self::BelowMinimumContribution { .. } => ErrorKind::BelowMinimumContribution,
            Self::GoalNotMet(_) => ErrorKind::GoalNotMet,
            Self::ProjectFullyFunded(_) => ErrorKind::FullyFunded,
            Self::ConcurrentUpdateConflict => ErrorKind::ConcurrentUpdateConflict,
            Self::FundingOverflow(_) => ErrorKind::Overflow,
            Self::Store(_) => ErrorKind::Storage,
        }
    }

    /// Stable numeric code.
    pub fn code(&self) -> u32 {
        match self {
            Self::ProjectNotFound(_) => 1,
            Self::WorkNotFound(_) => 2,
            Self::InvalidSpec(_) => 3,
            Self::Unauthorized { .. } => 4,
            Self::ProjectInactive(_) => 5,
            Self::BelowMinimumContribution { .. } => 6,
            Self::GoalNotMet(_) => 7,
            Self::ConcurrentUpdateConflict => 8,
            Self::FundingOverflow(_) => 9,
            Self::Store(_) => 10,
            Self::ProjectFullyFunded(_) => 11,
        }
    }

    /// Only a lost race is worth retrying; everything else needs different input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentUpdateConflict)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
