//! # Address derivation
//!
//! Contribution records live at a key derived from the `(project, funder)`
//! pair, so the "one record per pair" rule needs no lookup index and a caller
//! can compute the key before the record exists.
//!
//! ## Byte layout
//!
//! ```text
//! SHA-256( b"contribution"            12 bytes, ASCII namespace tag
//!        ‖ project_id.to_be_bytes()    8 bytes, big-endian u64
//!        ‖ funder                     32 bytes, raw identity )
//! ```
//!
//! Every component has a fixed width, so two distinct pairs never share a
//! pre-image. Any other implementation hashing the same 52 bytes derives the
//! same key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{Identity, ProjectId};

/// Namespace tag prepended to every contribution pre-image.
pub const CONTRIBUTION_SEED: &[u8] = b"contribution";

/// Deterministic storage key of a [`Contribution`](crate::types::Contribution).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContributionKey([u8; 32]);

hex_bytes32!(ContributionKey, "contribution key");

/// Derive the contribution key for `funder`'s record under `project`.
pub fn derive_contribution_key(project: ProjectId, funder: &Identity) -> ContributionKey {
    let mut hasher = Sha256::new();
    hasher.update(CONTRIBUTION_SEED);
    hasher.update(project.to_be_bytes());
    hasher.update(funder.as_bytes());
    ContributionKey(hasher.finalize().into())
}
