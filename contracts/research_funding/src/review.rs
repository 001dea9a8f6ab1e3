//! # Review & access gate
//!
//! Peer-review status transitions and dataset-access decisions for published
//! works.
//!
//! Any identity may review. Only the work's configured authority may grant
//! access, and grants are never revoked. Access is allowed to the owner, to
//! everyone for open works, and to grantees otherwise.

use tracing::{debug, info};

use crate::env::Env;
use crate::events::LedgerEvent;
use crate::funding::{validate_text, MAX_ABSTRACT_LEN, MAX_CATEGORY_LEN, MAX_TITLE_LEN};
use crate::storage::{
    atomic_update, load_project, load_work, Record, RecordKey, RecordStore, ScanFilter,
};
use crate::types::{
    AccessType, Identity, PeerReviewStatus, Review, ReviewableWork, WorkId, WorkMetadata,
};
use crate::{Error, Result};

pub const MAX_AUTHOR_LEN: usize = 128;
pub const MAX_COMMENTS_LEN: usize = 4096;
/// Room for a multihash CID or a prefixed hex digest.
pub const MAX_DATA_HASH_LEN: usize = 128;

fn validate_metadata(metadata: &WorkMetadata) -> Result<()> {
    validate_text("title", &metadata.title, MAX_TITLE_LEN)?;
    validate_text("abstract", &metadata.abstract_text, MAX_ABSTRACT_LEN)?;
    validate_text("category", &metadata.category, MAX_CATEGORY_LEN)?;
    validate_text("data hash", &metadata.data_hash, MAX_DATA_HASH_LEN)?;
    if metadata.authors.is_empty() {
        return Err(Error::InvalidSpec("a work needs at least one author".into()));
    }
    for author in &metadata.authors {
        validate_text("author", author, MAX_AUTHOR_LEN)?;
    }
    if let AccessType::Paid { price: 0 } = metadata.access_type {
        return Err(Error::InvalidSpec("paid access needs a positive price".into()));
    }
    Ok(())
}

/// Publish a work owned by the invoker, starting in `Pending` review.
pub async fn publish_work<S>(env: &Env<'_, S>, metadata: WorkMetadata) -> Result<WorkId>
where
    S: RecordStore + ?Sized,
{
    validate_metadata(&metadata)?;
    // Projects are never deleted, so existence checked now still holds at commit.
    if let Some(project) = metadata.funding_source {
        load_project(env.store(), project).await?;
    }

    let owner = env.invoker();
    let published_at = env.timestamp();
    let id = atomic_update(env.store(), &[RecordKey::WorkCount], published_at, |snap| {
        let id = snap.counter(&RecordKey::WorkCount)?;
        let next = id
            .checked_add(1)
            .ok_or_else(|| Error::InvalidSpec("work id space exhausted".into()))?;
        snap.put(RecordKey::WorkCount, Record::Counter(next));

        snap.emit(LedgerEvent::WorkPublished {
            work: id,
            owner,
            funding_source: metadata.funding_source,
        });
        snap.put(
            RecordKey::Work(id),
            Record::Work(ReviewableWork {
                id,
                owner,
                authority: metadata.authority.unwrap_or(owner),
                title: metadata.title,
                abstract_text: metadata.abstract_text,
                category: metadata.category,
                authors: metadata.authors,
                data_hash: metadata.data_hash,
                citations: metadata.citations,
                funding_source: metadata.funding_source,
                access_type: metadata.access_type,
                peer_review_status: PeerReviewStatus::Pending,
                reviews: Vec::new(),
                access_grants: Default::default(),
                published_at,
            }),
        );
        Ok(id)
    })
    .await?;

    info!(work = id, %owner, "work published");
    Ok(id)
}

/// Record the invoker's verdict and set the work's review status.
///
/// `Pending` is not a valid verdict.
pub async fn update_review_status<S>(
    env: &Env<'_, S>,
    work_id: WorkId,
    status: PeerReviewStatus,
    comments: String,
) -> Result<ReviewableWork>
where
    S: RecordStore + ?Sized,
{
    if status == PeerReviewStatus::Pending {
        return Err(Error::InvalidSpec(
            "a review cannot move a work back to pending".into(),
        ));
    }
    if comments.len() > MAX_COMMENTS_LEN {
        return Err(Error::InvalidSpec(format!(
            "review comments exceed {MAX_COMMENTS_LEN} bytes"
        )));
    }

    let reviewer = env.invoker();
    let now = env.timestamp();
    let work = atomic_update(env.store(), &[RecordKey::Work(work_id)], now, |snap| {
        let mut work = snap.work(work_id)?.ok_or(Error::WorkNotFound(work_id))?;
        let from = work.peer_review_status;
        work.peer_review_status = status;
        work.reviews.push(Review {
            reviewer,
            status,
            comments,
            timestamp: now,
        });

        snap.emit(LedgerEvent::ReviewStatusUpdated {
            work: work_id,
            reviewer,
            from,
            to: status,
        });
        snap.put(RecordKey::Work(work_id), Record::Work(work.clone()));
        Ok(work)
    })
    .await?;

    info!(work = work_id, %reviewer, %status, "review recorded");
    Ok(work)
}

/// Grant `accessor` access to the work's dataset.
///
/// Returns `false` when the grant already existed; nothing is written then.
pub async fn grant_access<S>(
    env: &Env<'_, S>,
    work_id: WorkId,
    accessor: Identity,
) -> Result<bool>
where
    S: RecordStore + ?Sized,
{
    let authority = env.invoker();
    let granted = atomic_update(
        env.store(),
        &[RecordKey::Work(work_id)],
        env.timestamp(),
        |snap| {
            let mut work = snap.work(work_id)?.ok_or(Error::WorkNotFound(work_id))?;
            if work.authority != authority {
                return Err(Error::Unauthorized {
                    caller: authority,
                    action: "grant data access",
                });
            }
            if !work.access_grants.insert(accessor) {
                return Ok(false);
            }

            snap.emit(LedgerEvent::AccessGranted {
                work: work_id,
                accessor,
                authority,
            });
            snap.put(RecordKey::Work(work_id), Record::Work(work));
            Ok(true)
        },
    )
    .await?;

    if granted {
        info!(work = work_id, %accessor, "access granted");
    } else {
        debug!(work = work_id, %accessor, "access already granted");
    }
    Ok(granted)
}

/// Whether `identity` may retrieve the work's dataset.
pub async fn has_access<S>(store: &S, work_id: WorkId, identity: &Identity) -> Result<bool>
where
    S: RecordStore + ?Sized,
{
    Ok(load_work(store, work_id).await?.has_access(identity))
}

pub async fn get_work<S>(store: &S, id: WorkId) -> Result<ReviewableWork>
where
    S: RecordStore + ?Sized,
{
    load_work(store, id).await
}

/// All works, by id.
pub async fn list_works<S>(store: &S) -> Result<Vec<ReviewableWork>>
where
    S: RecordStore + ?Sized,
{
    let mut works: Vec<ReviewableWork> = store
        .scan(&ScanFilter::Works)
        .await?
        .into_iter()
        .filter_map(|r| match r {
            Record::Work(w) => Some(w),
            _ => None,
        })
        .collect();
    works.sort_by_key(|w| w.id);
    debug!(count = works.len(), "listed works");
    Ok(works)
}
