//! The persistent orphan queue.
//!
//! The oracle treats the queue as a black box behind [`OrphanQueue`]:
//! open, durable enqueue, non-destructive peek, peek-by-offset, destructive
//! dequeue, length, close. [`SqliteQueue`] is the engine shipped with the
//! harness; other engines can be plugged into the workload and verifier
//! through the same trait.

pub mod sqlite;

pub use sqlite::SqliteQueue;

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::WorkItem;

/// Name of the queue directory inside a workload or crashed-state directory.
pub const QUEUE_DIR_NAME: &str = "orphanqueue";

/// Resolve the queue location inside a workload or crashed-state directory.
pub fn queue_path(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(QUEUE_DIR_NAME)
}

/// A persistent, at-least-once FIFO queue of encoded orphans.
///
/// Implementations must be safe for concurrent enqueue/peek/dequeue from
/// independent tasks.
pub trait OrphanQueue: Send + Sync {
    /// Append a payload. A successful return promises the payload survives
    /// a crash occurring immediately afterward.
    fn enqueue(&self, payload: &[u8]) -> Result<()>;

    /// Read the head without removing it. `None` means the queue is empty.
    fn peek(&self) -> Result<Option<Vec<u8>>>;

    /// Read the payload `offset` places behind the head without removing it.
    fn peek_by_offset(&self, offset: u64) -> Result<Vec<u8>>;

    /// Remove and return the head. `None` means the queue is empty.
    fn dequeue(&self) -> Result<Option<Vec<u8>>>;

    /// Number of payloads currently queued.
    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Release the underlying resources. Later calls fail.
    fn close(&self) -> Result<()>;
}

/// Read every item still present in the queue, head first.
///
/// Uses peek-by-offset only, so scanning twice yields the same items.
pub fn scan<Q: OrphanQueue + ?Sized>(queue: &Q) -> Result<Vec<WorkItem>> {
    let length = queue.len()?;
    let mut items = Vec::with_capacity(length as usize);
    for offset in 0..length {
        let payload = queue.peek_by_offset(offset)?;
        items.push(WorkItem::decode(&payload)?);
    }
    Ok(items)
}
