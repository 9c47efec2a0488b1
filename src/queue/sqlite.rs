//! SQLite-backed orphan queue.
//!
//! One table, ordered by an autoincrement sequence number. WAL mode with
//! `synchronous=FULL`, so every enqueue is a committed and fsynced
//! transaction by the time it returns.
//!
//! The verifier never opens a crashed queue in place: SQLite writes to a
//! WAL database's side files even on a read-only connection. It copies the
//! files first and reads the copy (see [`SqliteQueue::open_snapshot`]).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use opentelemetry::KeyValue;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tempfile::TempDir;

use super::OrphanQueue;
use crate::error::{Error, Result};
use crate::telemetry::metrics;

/// File name of the database inside the queue directory.
const DB_FILE_NAME: &str = "queue.db";

/// Suffix of the write-ahead log SQLite keeps next to the database.
const WAL_SUFFIX: &str = "-wal";

/// Queue backend. Owns the SQLite connection until closed.
pub struct SqliteQueue {
    dir: PathBuf,
    conn: Mutex<Option<Connection>>,
    /// Private copy backing a snapshot. Declared after `conn` so the
    /// connection is dropped before the files are removed.
    scratch: Option<TempDir>,
}

impl SqliteQueue {
    /// Open or create a queue in the given directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let conn = Connection::open(dir.join(DB_FILE_NAME))?;
        init(&conn)?;
        Ok(Self {
            dir,
            conn: Mutex::new(Some(conn)),
            scratch: None,
        })
    }

    /// Open a read-only snapshot of the queue in `dir` without touching it.
    ///
    /// The database and its WAL are copied to a scratch directory and only
    /// the copy is opened, so recovery of committed WAL frames happens
    /// there. Returns `None` when `dir` holds no queue yet
    /// (no database file, or the table was never created).
    pub fn open_snapshot(dir: impl AsRef<Path>) -> Result<Option<Self>> {
        let dir = dir.as_ref().to_path_buf();
        let db_path = dir.join(DB_FILE_NAME);
        if !db_path.try_exists()? {
            return Ok(None);
        }

        let scratch = tempfile::Builder::new().prefix("orphanq-snapshot-").tempdir()?;
        let copy_path = scratch.path().join(DB_FILE_NAME);
        std::fs::copy(&db_path, &copy_path)?;
        // The shared-memory index is rebuilt from the WAL, so only the WAL
        // matters; a stale index copied from a dead process is skipped.
        let wal_path = with_suffix(&db_path, WAL_SUFFIX);
        if wal_path.try_exists()? {
            std::fs::copy(&wal_path, with_suffix(&copy_path, WAL_SUFFIX))?;
        }

        // Read-write on the copy so SQLite can recover the WAL normally;
        // `query_only` keeps our own statements from changing it.
        let conn = Connection::open_with_flags(
            &copy_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA query_only=ON;")?;
        let has_table: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'orphans')",
            [],
            |row| row.get(0),
        )?;
        if !has_table {
            conn.close().map_err(|(_, e)| Error::Storage(e))?;
            return Ok(None);
        }

        Ok(Some(Self {
            dir,
            conn: Mutex::new(Some(conn)),
            scratch: Some(scratch),
        }))
    }

    /// Directory holding the queue's files. For a snapshot, the directory
    /// it was taken from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_snapshot(&self) -> bool {
        self.scratch.is_some()
    }

    fn with_conn<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| Error::Other("queue connection mutex poisoned".to_string()))?;
        let conn = guard.as_mut().ok_or(Error::QueueClosed)?;
        let result = f(conn)?;
        metrics::queue_operations().add(1, &[KeyValue::new("operation", operation)]);
        Ok(result)
    }
}

fn with_suffix(db_path: &Path, suffix: &str) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA synchronous=FULL;")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS orphans (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            payload     BLOB NOT NULL
        );
        ",
    )?;

    Ok(())
}

impl OrphanQueue for SqliteQueue {
    fn enqueue(&self, payload: &[u8]) -> Result<()> {
        self.with_conn("enqueue", |conn| {
            conn.execute("INSERT INTO orphans (payload) VALUES (?1)", params![payload])?;
            Ok(())
        })
    }

    fn peek(&self) -> Result<Option<Vec<u8>>> {
        self.with_conn("peek", |conn| {
            let payload = conn
                .query_row(
                    "SELECT payload FROM orphans ORDER BY seq ASC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(payload)
        })
    }

    fn peek_by_offset(&self, offset: u64) -> Result<Vec<u8>> {
        self.with_conn("peek_by_offset", |conn| {
            conn.query_row(
                "SELECT payload FROM orphans ORDER BY seq ASC LIMIT 1 OFFSET ?1",
                params![offset as i64],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::Other(format!("queue offset {offset} is out of range")))
        })
    }

    fn dequeue(&self) -> Result<Option<Vec<u8>>> {
        self.with_conn("dequeue", |conn| {
            let tx = conn.transaction()?;
            let head: Option<(i64, Vec<u8>)> = tx
                .query_row(
                    "SELECT seq, payload FROM orphans ORDER BY seq ASC LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((seq, payload)) = head else {
                return Ok(None);
            };
            tx.execute("DELETE FROM orphans WHERE seq = ?1", params![seq])?;
            tx.commit()?;
            Ok(Some(payload))
        })
    }

    fn len(&self) -> Result<u64> {
        self.with_conn("len", |conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM orphans", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    fn close(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::Other("queue connection mutex poisoned".to_string()))?
            .take()
            .ok_or(Error::QueueClosed)?;
        conn.close().map_err(|(_, e)| Error::Storage(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dequeue_on_empty_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SqliteQueue::open(dir.path()).unwrap();
        assert!(queue.dequeue().unwrap().is_none());
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn peek_by_offset_past_end_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SqliteQueue::open(dir.path()).unwrap();
        queue.enqueue(b"one").unwrap();
        assert_eq!(queue.peek_by_offset(0).unwrap(), b"one");
        assert!(queue.peek_by_offset(1).is_err());
    }

    #[test]
    fn operations_after_close_fail() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SqliteQueue::open(dir.path()).unwrap();
        queue.close().unwrap();
        assert!(matches!(queue.enqueue(b"late"), Err(Error::QueueClosed)));
        assert!(matches!(queue.close(), Err(Error::QueueClosed)));
    }

    #[test]
    fn snapshot_of_missing_queue_is_none_and_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let queue_dir = dir.path().join("orphanqueue");
        assert!(SqliteQueue::open_snapshot(&queue_dir).unwrap().is_none());
        assert!(!queue_dir.exists());
    }

    #[test]
    fn snapshot_without_table_is_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DB_FILE_NAME), b"").unwrap();
        assert!(SqliteQueue::open_snapshot(dir.path()).unwrap().is_none());
    }

    #[test]
    fn snapshot_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SqliteQueue::open(dir.path()).unwrap();
        queue.enqueue(b"one").unwrap();
        queue.close().unwrap();

        let snapshot = SqliteQueue::open_snapshot(dir.path()).unwrap().unwrap();
        assert!(snapshot.is_snapshot());
        assert_eq!(snapshot.len().unwrap(), 1);
        assert!(matches!(snapshot.enqueue(b"two"), Err(Error::Storage(_))));
        snapshot.close().unwrap();
    }
}
