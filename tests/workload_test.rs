//! Integration tests for the workload generator.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

use orphanq::config::WorkloadConfig;
use orphanq::error::{Error, Result};
use orphanq::model::{ItemKey, WorkItem};
use orphanq::oracle::{self, Verdict};
use orphanq::queue::{self, OrphanQueue, SqliteQueue};
use orphanq::transcript::{Event, Transcript};
use orphanq::workload::{Workload, sqlite_workload};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Transcript sink the test can read back.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    fn events(&self) -> Vec<Event> {
        String::from_utf8(self.contents())
            .unwrap()
            .lines()
            .map(|line| Event::parse(line).unwrap_or_else(|| panic!("bad line {line:?}")))
            .collect()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// In-memory queue whose contents outlive each open/close cycle.
#[derive(Clone, Default)]
struct MemQueue {
    items: Arc<Mutex<VecDeque<Vec<u8>>>>,
    fail_enqueue: bool,
    fail_peek: bool,
    fail_dequeue: bool,
    /// Dequeue reports an empty queue even when items are present.
    lose_head: bool,
    fail_close: bool,
}

impl MemQueue {
    /// A queue already holding one encoded orphan with `key`.
    fn holding(key: i64) -> Self {
        let mut item = WorkItem::generate().unwrap();
        item.key = ItemKey(key);
        let q = MemQueue::default();
        q.enqueue(&item.encode().unwrap()).unwrap();
        q
    }
}

impl OrphanQueue for MemQueue {
    fn enqueue(&self, payload: &[u8]) -> Result<()> {
        if self.fail_enqueue {
            return Err(Error::Other("disk full".to_string()));
        }
        self.items.lock().unwrap().push_back(payload.to_vec());
        Ok(())
    }

    fn peek(&self) -> Result<Option<Vec<u8>>> {
        if self.fail_peek {
            return Err(Error::Other("peek failed".to_string()));
        }
        Ok(self.items.lock().unwrap().front().cloned())
    }

    fn peek_by_offset(&self, offset: u64) -> Result<Vec<u8>> {
        self.items
            .lock()
            .unwrap()
            .get(offset as usize)
            .cloned()
            .ok_or_else(|| Error::Other("out of range".to_string()))
    }

    fn dequeue(&self) -> Result<Option<Vec<u8>>> {
        if self.fail_dequeue {
            return Err(Error::Other("dequeue failed".to_string()));
        }
        if self.lose_head {
            return Ok(None);
        }
        Ok(self.items.lock().unwrap().pop_front())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.items.lock().unwrap().len() as u64)
    }

    fn close(&self) -> Result<()> {
        if self.fail_close {
            return Err(Error::Other("close failed".to_string()));
        }
        Ok(())
    }
}

fn config(restarts: usize, reads: usize, writes: usize, probability: f64) -> WorkloadConfig {
    WorkloadConfig {
        restarts,
        reads,
        writes,
        probability,
        empty_backoff_ms: 1,
    }
}

fn count(events: &[Event], wanted: &Event) -> usize {
    events.iter().filter(|e| *e == wanted).count()
}

// ---------------------------------------------------------------------------
// Real queue
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_run_verifies_clean() {
    let dir = tempfile::tempdir().unwrap();
    let buf = SharedBuf::default();
    let transcript = Arc::new(Transcript::new(buf.clone()));

    let summary = sqlite_workload(config(3, 10, 4, 0.25), transcript, dir.path().to_path_buf())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(summary.cycles, 3);
    assert_eq!(summary.written, 12);
    assert_eq!(summary.close_errors, 0);

    let events = buf.events();
    assert_eq!(count(&events, &Event::OpenedQueue), 3);
    assert_eq!(count(&events, &Event::ClosingQueue), 3);
    assert_eq!(count(&events, &Event::Restarting), 2);
    assert_eq!(events.first(), Some(&Event::OpenedQueue));

    let transcript_path = dir.path().join("stdout");
    std::fs::write(&transcript_path, buf.contents()).unwrap();
    let report = oracle::verify(dir.path(), &transcript_path).unwrap();
    assert_eq!(report.verdict, Verdict::Durable);
    assert_eq!(report.confirmed, 12);
    assert_eq!(report.replay.integrated + report.recovered, 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn certain_failure_leaves_every_item_queued() {
    let dir = tempfile::tempdir().unwrap();
    let buf = SharedBuf::default();
    let transcript = Arc::new(Transcript::new(buf.clone()));

    let summary = sqlite_workload(config(2, 15, 3, 1.0), transcript, dir.path().to_path_buf())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(summary.integrated, 0);
    assert_eq!(summary.left_behind + summary.empty_polls, 30);

    let events = buf.events();
    assert!(!events.iter().any(|e| matches!(e, Event::Integrated(_))));

    let q = SqliteQueue::open(queue::queue_path(dir.path())).unwrap();
    assert_eq!(q.len().unwrap(), 6);
}

// ---------------------------------------------------------------------------
// Protocol ordering
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_write_is_announced_before_it_is_confirmed() {
    let q = MemQueue::default();
    let buf = SharedBuf::default();
    let transcript = Arc::new(Transcript::new(buf.clone()));

    let opener = q.clone();
    let summary = Workload::new(config(4, 8, 6, 0.5), transcript, move || Ok(opener.clone()))
        .unwrap()
        .run()
        .await
        .unwrap();

    let events = buf.events();
    for (idx, event) in events.iter().enumerate() {
        if let Event::Wrote(key) = event {
            assert!(
                events[..idx].contains(&Event::Writing(*key)),
                "Wrote {key} before Writing"
            );
        }
        // The consumer may see an item before its producer confirms it,
        // but never before the write was announced.
        if let Event::Integrated(key) = event {
            assert!(
                events[..idx].contains(&Event::Writing(*key)),
                "Integrated {key} before Writing"
            );
        }
    }
    assert_eq!(summary.integrated + q.len().unwrap() as usize, summary.written);
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn close_failure_is_reported_but_not_fatal() {
    let q = MemQueue {
        fail_close: true,
        ..MemQueue::default()
    };
    let buf = SharedBuf::default();
    let transcript = Arc::new(Transcript::new(buf.clone()));

    let summary = Workload::new(config(2, 1, 1, 0.0), transcript, move || Ok(q.clone()))
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(summary.close_errors, 2);

    let events = buf.events();
    let closing_error = Event::error("closing queue");
    assert_eq!(count(&events, &closing_error), 2);
    let first_close = events.iter().position(|e| *e == Event::ClosingQueue).unwrap();
    assert_eq!(events[first_close + 1], closing_error);
}

#[tokio::test]
async fn enqueue_failure_is_fatal() {
    let q = MemQueue {
        fail_enqueue: true,
        ..MemQueue::default()
    };
    let buf = SharedBuf::default();
    let transcript = Arc::new(Transcript::new(buf.clone()));

    let result = Workload::new(config(3, 1, 1, 0.0), transcript, move || Ok(q.clone()))
        .unwrap()
        .run()
        .await;
    assert!(result.is_err());

    let events = buf.events();
    assert!(events.iter().any(|e| matches!(e, Event::Writing(_))));
    assert!(!events.iter().any(|e| matches!(e, Event::Wrote(_))));
    assert!(!events.contains(&Event::Restarting));
}

#[tokio::test]
async fn open_failure_is_fatal_before_any_transcript_line() {
    let buf = SharedBuf::default();
    let transcript = Arc::new(Transcript::new(buf.clone()));

    let result = Workload::new(config(1, 1, 1, 0.0), transcript, || -> Result<MemQueue> {
        Err(Error::Other("locked".to_string()))
    })
    .unwrap()
    .run()
    .await;
    assert!(result.is_err());
    assert!(buf.contents().is_empty());
}

#[tokio::test]
async fn undecodable_head_is_reported_each_iteration() {
    let q = MemQueue::default();
    q.enqueue(b"not an orphan").unwrap();
    let buf = SharedBuf::default();
    let transcript = Arc::new(Transcript::new(buf.clone()));

    let opener = q.clone();
    let summary = Workload::new(config(1, 4, 0, 0.0), transcript, move || Ok(opener.clone()))
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(summary.read_errors, 4);
    assert_eq!(count(&buf.events(), &Event::error("reading queue")), 4);
    assert_eq!(q.len().unwrap(), 1);

    // Error lines never confuse the replay.
    oracle::replay(&buf.contents()).unwrap();
}

#[tokio::test]
async fn peek_failure_is_reported_and_the_iteration_skipped() {
    let q = MemQueue {
        fail_peek: true,
        ..MemQueue::holding(6)
    };
    let buf = SharedBuf::default();
    let transcript = Arc::new(Transcript::new(buf.clone()));

    let opener = q.clone();
    let summary = Workload::new(config(1, 3, 0, 0.0), transcript, move || Ok(opener.clone()))
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(summary.read_errors, 3);
    assert_eq!(summary.integrated, 0);

    let events = buf.events();
    assert_eq!(count(&events, &Event::error("reading queue")), 3);
    assert_eq!(events.last(), Some(&Event::ClosingQueue));
    assert_eq!(q.len().unwrap(), 1);
}

#[tokio::test]
async fn dequeue_failure_after_integration_is_fatal() {
    let q = MemQueue {
        fail_dequeue: true,
        ..MemQueue::holding(6)
    };
    let buf = SharedBuf::default();
    let transcript = Arc::new(Transcript::new(buf.clone()));

    let result = Workload::new(config(2, 3, 0, 0.0), transcript, move || Ok(q.clone()))
        .unwrap()
        .run()
        .await;
    assert!(
        matches!(&result, Err(Error::Other(msg)) if msg == "dequeue failed"),
        "got {:?}",
        result.err()
    );

    let events = buf.events();
    assert_eq!(count(&events, &Event::Integrated(ItemKey(6))), 1);
    assert!(!events.contains(&Event::ClosingQueue));
    assert!(!events.contains(&Event::Restarting));
}

#[tokio::test]
async fn head_vanishing_between_peek_and_dequeue_is_fatal() {
    let q = MemQueue {
        lose_head: true,
        ..MemQueue::holding(6)
    };
    let buf = SharedBuf::default();
    let transcript = Arc::new(Transcript::new(buf.clone()));

    let result = Workload::new(config(1, 3, 0, 0.0), transcript, move || Ok(q.clone()))
        .unwrap()
        .run()
        .await;
    assert!(
        matches!(&result, Err(Error::Other(msg)) if msg.contains("vanished")),
        "got {:?}",
        result.err()
    );
    assert_eq!(count(&buf.events(), &Event::Integrated(ItemKey(6))), 1);
}

#[test]
fn invalid_probability_is_rejected() {
    let transcript = Arc::new(Transcript::new(SharedBuf::default()));
    let result = Workload::new(config(1, 1, 1, 1.5), transcript, || Ok(MemQueue::default()));
    assert!(matches!(result, Err(Error::Config(_))));
}
