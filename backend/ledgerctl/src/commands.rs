//! Command-line surface over the ledger operations.
//!
//! Mutating commands run as `--caller` (or `CALLER_ID`) and are retried on
//! conflict according to the configured [`RetryPolicy`]. Queries need no
//! caller.

use clap::{Subcommand, ValueEnum};
use research_funding::{
    events, funding, retry_on_conflict, review, AccessType, Env, EventFilter, Identity,
    PeerReviewStatus, ProjectId, ProjectSpec, RecordStore, RetryPolicy, WorkId, WorkMetadata,
};
use tracing::info;

use crate::errors::{CliError, Result};
use crate::output::{
    AccessResponse, CreatedResponse, EventsResponse, GrantResponse, Output, ProjectsResponse,
    WorksResponse,
};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register a new research project.
    CreateProject {
        #[arg(long)]
        title: String,
        #[arg(long = "abstract")]
        abstract_text: String,
        #[arg(long)]
        category: String,
        #[arg(long)]
        goal: u64,
        #[arg(long)]
        min_contribution: u64,
    },
    /// Contribute to a project as the caller.
    Contribute {
        project: ProjectId,
        amount: u64,
    },
    /// Withdraw a fully funded project's funds (creator only).
    Withdraw { project: ProjectId },
    /// Close a project to further contributions (creator only).
    Close { project: ProjectId },
    /// Show one project.
    Project { project: ProjectId },
    /// List all projects.
    Projects,
    /// Show contribution records by project, by funder, or for one pair.
    Contributions {
        #[arg(long, required_unless_present = "funder")]
        project: Option<ProjectId>,
        #[arg(long)]
        funder: Option<Identity>,
    },
    /// Publish a reviewable work.
    Publish {
        #[arg(long)]
        title: String,
        #[arg(long = "abstract")]
        abstract_text: String,
        #[arg(long)]
        category: String,
        /// Repeat for several authors.
        #[arg(long = "author", required = true)]
        authors: Vec<String>,
        #[arg(long)]
        data_hash: String,
        #[arg(long = "citation")]
        citations: Vec<String>,
        #[arg(long)]
        funding_source: Option<ProjectId>,
        #[arg(long, value_enum, default_value_t = Access::Open)]
        access: Access,
        /// Required with `--access paid`.
        #[arg(long, required_if_eq("access", "paid"))]
        price: Option<u64>,
        #[arg(long)]
        authority: Option<Identity>,
    },
    /// Record a peer-review verdict on a work.
    Review {
        work: WorkId,
        /// approved, revisions-required or rejected
        status: PeerReviewStatus,
        #[arg(long, default_value = "")]
        comments: String,
    },
    /// Grant data access on a work (access authority only).
    Grant { work: WorkId, accessor: Identity },
    /// Check whether an identity may access a work's data.
    Access { work: WorkId, accessor: Identity },
    /// Show one work.
    Work { work: WorkId },
    /// List all works.
    Works,
    /// List committed events, optionally for one project or work.
    Events {
        #[arg(long, conflicts_with = "work")]
        project: Option<ProjectId>,
        #[arg(long)]
        work: Option<WorkId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Access {
    Open,
    TokenGated,
    Paid,
}

impl Command {
    fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateProject { .. }
                | Self::Contribute { .. }
                | Self::Withdraw { .. }
                | Self::Close { .. }
                | Self::Publish { .. }
                | Self::Review { .. }
                | Self::Grant { .. }
        )
    }
}

/// Execute `command` against `store`.
pub async fn run<S>(
    command: Command,
    store: &S,
    caller: Option<Identity>,
    retry: RetryPolicy,
) -> Result<Output>
where
    S: RecordStore + ?Sized,
{
    if command.is_mutation() {
        let caller = caller.ok_or_else(|| {
            CliError::Config("this command needs --caller or CALLER_ID".to_string())
        })?;
        let env = Env::new(store, caller);
        return mutate(command, &env, retry).await;
    }
    query(command, store).await
}

async fn mutate<S>(command: Command, env: &Env<'_, S>, retry: RetryPolicy) -> Result<Output>
where
    S: RecordStore + ?Sized,
{
    let output = match command {
        Command::CreateProject {
            title,
            abstract_text,
            category,
            goal,
            min_contribution,
        } => {
            let spec = ProjectSpec {
                title,
                abstract_text,
                category,
                funding_goal: goal,
                min_contribution,
            };
            let id = retry_on_conflict(retry, move || funding::create_project(env, spec.clone()))
                .await?;
            info!(id, "project created");
            Output::Created(CreatedResponse { id })
        }
        Command::Contribute { project, amount } => {
            let record =
                retry_on_conflict(retry, move || funding::contribute(env, project, amount)).await?;
            Output::Contribution(Some(record))
        }
        Command::Withdraw { project } => {
            let withdrawal =
                retry_on_conflict(retry, move || funding::withdraw(env, project)).await?;
            info!(project, amount = withdrawal.amount, "funds withdrawn");
            Output::Withdrawal(withdrawal)
        }
        Command::Close { project } => {
            Output::Project(retry_on_conflict(retry, move || funding::close(env, project)).await?)
        }
        Command::Publish {
            title,
            abstract_text,
            category,
            authors,
            data_hash,
            citations,
            funding_source,
            access,
            price,
            authority,
        } => {
            let access_type = match access {
                Access::Open => AccessType::Open,
                Access::TokenGated => AccessType::TokenGated,
                Access::Paid => AccessType::Paid {
                    price: price.unwrap_or_default(),
                },
            };
            let metadata = WorkMetadata {
                title,
                abstract_text,
                category,
                authors,
                data_hash,
                citations,
                funding_source,
                access_type,
                authority,
            };
            let id =
                retry_on_conflict(retry, move || review::publish_work(env, metadata.clone()))
                    .await?;
            info!(id, "work published");
            Output::Created(CreatedResponse { id })
        }
        Command::Review {
            work,
            status,
            comments,
        } => Output::Work(
            retry_on_conflict(retry, move || {
                review::update_review_status(env, work, status, comments.clone())
            })
            .await?,
        ),
        Command::Grant { work, accessor } => {
            let granted =
                retry_on_conflict(retry, move || review::grant_access(env, work, accessor))
                    .await?;
            Output::Grant(GrantResponse { work, granted })
        }
        other => return query(other, env.store()).await,
    };
    Ok(output)
}

async fn query<S>(command: Command, store: &S) -> Result<Output>
where
    S: RecordStore + ?Sized,
{
    let output = match command {
        Command::Project { project } => {
            Output::Project(funding::get_project(store, project).await?)
        }
        Command::Projects => {
            let projects = funding::list_projects(store).await?;
            Output::Projects(ProjectsResponse {
                count: projects.len(),
                projects,
            })
        }
        Command::Contributions { project, funder } => match (project, funder) {
            (Some(project), Some(funder)) => {
                Output::Contribution(funding::get_contribution(store, project, &funder).await?)
            }
            (Some(project), None) => Output::contributions(
                funding::list_contributions_for_project(store, project).await?,
            ),
            (None, Some(funder)) => Output::contributions(
                funding::list_contributions_for_funder(store, &funder).await?,
            ),
            (None, None) => {
                return Err(CliError::Config(
                    "contributions needs --project or --funder".to_string(),
                ))
            }
        },
        Command::Access { work, accessor } => Output::Access(AccessResponse {
            work,
            accessor: accessor.to_string(),
            has_access: review::has_access(store, work, &accessor).await?,
        }),
        Command::Work { work } => Output::Work(review::get_work(store, work).await?),
        Command::Works => {
            let works = review::list_works(store).await?;
            Output::Works(WorksResponse {
                count: works.len(),
                works,
            })
        }
        Command::Events { project, work } => {
            let filter = match (project, work) {
                (Some(id), _) => EventFilter::Project(id),
                (None, Some(id)) => EventFilter::Work(id),
                (None, None) => EventFilter::All,
            };
            let events = events::list_events(store, &filter).await?;
            Output::Events(EventsResponse {
                project_id: project,
                work_id: work,
                count: events.len(),
                events,
            })
        }
        mutation => {
            return Err(CliError::Config(format!(
                "{mutation:?} is not a query"
            )))
        }
    };
    Ok(output)
}
