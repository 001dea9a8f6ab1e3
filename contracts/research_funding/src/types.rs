//! # Types
//!
//! Shared data structures used across all modules of the research funding
//! ledger.
//!
//! ## Identifiers
//!
//! | Type              | Width    | Origin                                        |
//! |-------------------|----------|-----------------------------------------------|
//! | [`Identity`]      | 32 bytes | Supplied by the external signer layer         |
//! | [`ProjectId`]     | `u64`    | Sequential, allocated from `ProjectCount`     |
//! | [`WorkId`]        | `u64`    | Sequential, allocated from `WorkCount`        |
//! | `ContributionKey` | 32 bytes | Derived, see [`crate::address`]               |
//!
//! 32-byte identifiers render and parse as 64 lowercase hex characters.
//!
//! ## Review lifecycle
//!
//! ```text
//! Pending ──► Approved
//!     ├─────► RevisionsRequired
//!     └─────► Rejected
//! ```
//!
//! Nothing ever moves a work back to `Pending`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sequential project identifier.
pub type ProjectId = u64;

/// Sequential reviewable-work identifier.
pub type WorkId = u64;

/// Failure to parse a hex-encoded 32-byte identifier.
#[derive(Debug, Error)]
pub enum ParseIdError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("{what} must be 32 bytes, got {len}")]
    InvalidLength { what: &'static str, len: usize },
}

/// Hex `Display`/`FromStr`/serde plumbing for 32-byte newtypes.
macro_rules! hex_bytes32 {
    ($name:ident, $what:literal) => {
        impl $name {
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(&::hex::encode(self.0))
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}({}..)", stringify!($name), &::hex::encode(self.0)[..8])
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::types::ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = ::hex::decode(s.trim())?;
                let len = bytes.len();
                let array: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| $crate::types::ParseIdError::InvalidLength { what: $what, len })?;
                Ok(Self(array))
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.to_string()
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::types::ParseIdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

/// An already-authenticated caller, funder, owner or reviewer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Identity([u8; 32]);

hex_bytes32!(Identity, "identity");

// ── Projects ─────────────────────────────────────────────────────────

/// Creation parameters for a funding project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub title: String,
    pub abstract_text: String,
    pub category: String,
    /// Target amount in the smallest currency unit.
    pub funding_goal: u64,
    /// Lower bound for every individual contribution call.
    pub min_contribution: u64,
}

/// A funding campaign with a goal and a running total.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier (auto-incremented).
    pub id: ProjectId,
    /// Identity that registered the project and receives withdrawn funds.
    pub creator: Identity,
    pub title: String,
    pub abstract_text: String,
    pub category: String,
    pub funding_goal: u64,
    pub min_contribution: u64,
    /// Sum of committed contributions, zeroed by a withdrawal.
    pub current_funding: u64,
    /// False once closed or withdrawn. Terminal.
    pub is_active: bool,
    /// Set the first time `current_funding` reaches `funding_goal`. Never reset.
    pub is_fully_funded: bool,
    pub created_at: DateTime<Utc>,
}

/// The cumulative amount one funder has given to one project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub key: crate::address::ContributionKey,
    pub project: ProjectId,
    pub funder: Identity,
    pub amount: u64,
    /// Time of the last contribution from this funder.
    pub timestamp: DateTime<Utc>,
}

/// Payout instruction produced by a successful withdrawal. Moving the value
/// is left to the settlement layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub project: ProjectId,
    pub recipient: Identity,
    pub amount: u64,
}

// ── Reviewable works ─────────────────────────────────────────────────

/// Peer-review state of a published work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerReviewStatus {
    Pending,
    Approved,
    RevisionsRequired,
    Rejected,
}

impl PeerReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::RevisionsRequired => "revisions_required",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PeerReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeerReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "revisions_required" => Ok(Self::RevisionsRequired),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown peer review status: {other}")),
        }
    }
}

/// How the dataset behind a work is gated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AccessType {
    /// Anyone may retrieve the data.
    Open,
    /// Holders of the work's token; access is recorded as a grant.
    TokenGated,
    /// Paid access; the payment itself is settled outside the ledger and
    /// recorded as a grant.
    Paid { price: u64 },
}

/// Publication parameters for a reviewable work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkMetadata {
    pub title: String,
    pub abstract_text: String,
    pub category: String,
    pub authors: Vec<String>,
    /// Content digest of the dataset (e.g. an IPFS CID).
    pub data_hash: String,
    pub citations: Vec<String>,
    /// Project that financed the work, if any.
    pub funding_source: Option<ProjectId>,
    pub access_type: AccessType,
    /// Identity allowed to grant data access. Defaults to the publisher.
    pub authority: Option<Identity>,
}

/// One reviewer verdict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub reviewer: Identity,
    pub status: PeerReviewStatus,
    pub comments: String,
    pub timestamp: DateTime<Utc>,
}

/// A published research work whose dataset is access-gated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewableWork {
    pub id: WorkId,
    pub owner: Identity,
    pub authority: Identity,
    pub title: String,
    pub abstract_text: String,
    pub category: String,
    pub authors: Vec<String>,
    pub data_hash: String,
    pub citations: Vec<String>,
    pub funding_source: Option<ProjectId>,
    pub access_type: AccessType,
    pub peer_review_status: PeerReviewStatus,
    /// Verdict history, oldest first.
    pub reviews: Vec<Review>,
    /// Grows only; there is no revocation.
    pub access_grants: BTreeSet<Identity>,
    pub published_at: DateTime<Utc>,
}

impl ReviewableWork {
    /// True if `identity` owns the work, the work is open, or access was granted.
    pub fn has_access(&self, identity: &Identity) -> bool {
        self.owner == *identity
            || self.access_type == AccessType::Open
            || self.access_grants.contains(identity)
    }
}
