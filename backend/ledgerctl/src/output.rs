//! JSON shapes printed to stdout.

use research_funding::{
    Contribution, Error, ErrorKind, EventRecord, Project, ProjectId, ReviewableWork, Withdrawal,
    WorkId,
};
use serde::Serialize;

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: u64,
}

#[derive(Debug, Serialize)]
pub struct ProjectsResponse {
    pub count: usize,
    pub projects: Vec<Project>,
}

#[derive(Debug, Serialize)]
pub struct ContributionsResponse {
    pub count: usize,
    pub total: u64,
    pub contributions: Vec<Contribution>,
}

#[derive(Debug, Serialize)]
pub struct WorksResponse {
    pub count: usize,
    pub works: Vec<ReviewableWork>,
}

#[derive(Debug, Serialize)]
pub struct GrantResponse {
    pub work: WorkId,
    /// False when the accessor already held a grant.
    pub granted: bool,
}

#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub work: WorkId,
    pub accessor: String,
    pub has_access: bool,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_id: Option<WorkId>,
    pub count: usize,
    pub events: Vec<EventRecord>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub code: u32,
    pub error: String,
}

impl From<&Error> for ErrorResponse {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.kind(),
            code: e.code(),
            error: e.to_string(),
        }
    }
}

/// Any successful command result.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Output {
    Created(CreatedResponse),
    Project(Project),
    Projects(ProjectsResponse),
    Contribution(Option<Contribution>),
    Contributions(ContributionsResponse),
    Withdrawal(Withdrawal),
    Work(ReviewableWork),
    Works(WorksResponse),
    Grant(GrantResponse),
    Access(AccessResponse),
    Events(EventsResponse),
}

impl Output {
    pub fn contributions(contributions: Vec<Contribution>) -> Self {
        Self::Contributions(ContributionsResponse {
            count: contributions.len(),
            total: contributions.iter().map(|c| c.amount).sum(),
            contributions,
        })
    }
}
