//! Core data model.
//!
//! An orphan is a work item that was reported complete through one channel
//! but not yet confirmed in its permanent store. It has identity (the item
//! key) and an opaque payload the oracle never looks at.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Keys are sampled from `0..KEY_SPACE`.
pub const KEY_SPACE: i64 = 1_000_000_000;

/// Issuer classifiers are sampled from `0..ISSUER_SPACE`.
pub const ISSUER_SPACE: i64 = 10;

/// Length of each random payload blob.
pub const BLOB_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Item Key
// ---------------------------------------------------------------------------

/// Newtype for orphan keys. Unique within a single workload run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(pub i64);

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ItemKey {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(ItemKey)
    }
}

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of durable work held in the orphan queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Identity. The only field the oracle inspects.
    pub key: ItemKey,

    /// Stand-in for the identifying certificate bytes.
    pub der: Vec<u8>,

    /// Stand-in for the attached status response bytes.
    pub status_resp: Vec<u8>,

    pub precert: bool,

    /// Small integer classifier in `0..ISSUER_SPACE`.
    pub issuer_id: i64,

    pub orphaned_at: DateTime<Utc>,
}

impl WorkItem {
    /// Generate a fresh item: OS-random blobs, key and issuer from `rng`.
    pub fn generate_with<R: Rng>(rng: &mut R) -> Result<Self> {
        Ok(Self {
            key: ItemKey(rng.gen_range(0..KEY_SPACE)),
            der: random_blob()?,
            status_resp: random_blob()?,
            precert: true,
            issuer_id: rng.gen_range(0..ISSUER_SPACE),
            orphaned_at: Utc::now(),
        })
    }

    /// Generate a fresh item using the thread-local RNG.
    pub fn generate() -> Result<Self> {
        Self::generate_with(&mut rand::thread_rng())
    }

    /// Serialize for storage in the queue.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a payload read from the queue.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn random_blob() -> Result<Vec<u8>> {
    let mut blob = vec![0u8; BLOB_LEN];
    OsRng
        .try_fill_bytes(&mut blob)
        .map_err(|e| Error::Other(format!("urandom error: {e}")))?;
    Ok(blob)
}
