//! Error types for orphanq.
//!
//! A lost item is not an error: it is reported through
//! [`Verdict::NotDurable`](crate::oracle::Verdict). Everything here means
//! the harness or the transcript itself is broken.

use thiserror::Error;

use crate::model::ItemKey;

/// Which structured transcript line was repeated for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionKind {
    /// Two `Writing orphan with ID k` lines.
    WriteAttempt,
    /// Two `Wrote orphan with ID k` lines.
    WriteConfirmation,
}

impl std::fmt::Display for CollisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollisionKind::WriteAttempt => f.write_str("orphan write attempts"),
            CollisionKind::WriteConfirmation => f.write_str("orphan write confirmations"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("queue is closed")]
    QueueClosed,

    #[error("short transcript write: wrote {written} of {expected} bytes")]
    ShortTranscriptWrite { written: usize, expected: usize },

    #[error("invalid transcript line {line_no}: {line:?}")]
    MalformedLine { line_no: usize, line: String },

    #[error("ID collision on {key} in {kind}")]
    KeyCollision { key: ItemKey, kind: CollisionKind },

    #[error("ID {0} was read before/without being written")]
    ObservedBeforeWritten(ItemKey),

    #[error("ID {0} was recovered from the queue without being written")]
    WritelessRecovery(ItemKey),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
