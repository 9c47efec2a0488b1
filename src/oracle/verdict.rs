//! Durability verdict: combines a replayed ledger with the recovered queue.

use std::path::Path;

use opentelemetry::KeyValue;
use tracing::debug;

use super::replay::{Ledger, ReplayStats, replay_file};
use crate::error::Result;
use crate::model::{ItemKey, WorkItem};
use crate::queue::{self, OrphanQueue, SqliteQueue};
use crate::telemetry::{metrics, spans};

/// Binary outcome of a verifier run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Every confirmed write was integrated or is still queued.
    Durable,
    /// These keys were confirmed durable and then disappeared.
    NotDurable { lost: Vec<ItemKey> },
}

impl Verdict {
    pub fn is_durable(&self) -> bool {
        matches!(self, Verdict::Durable)
    }

    fn label(&self) -> &'static str {
        match self {
            Verdict::Durable => "durable",
            Verdict::NotDurable { .. } => "not_durable",
        }
    }
}

/// Verdict plus the counts behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub verdict: Verdict,
    pub replay: ReplayStats,
    /// Distinct keys seen in the transcript or the queue.
    pub keys: usize,
    pub attempted: usize,
    pub confirmed: usize,
    /// Items found in the recovered queue.
    pub recovered: usize,
}

/// Scan the recovered queue into `ledger` and decide.
///
/// The queue is only read through peek-by-offset.
pub fn check<Q: OrphanQueue + ?Sized>(ledger: Ledger, recovered_queue: &Q) -> Result<Report> {
    let recovered = queue::scan(recovered_queue)?;
    check_recovered(ledger, &recovered)
}

/// Decide from a ledger and the items found in the recovered queue.
pub fn check_recovered(mut ledger: Ledger, recovered: &[WorkItem]) -> Result<Report> {
    for item in recovered {
        ledger.record_recovered(item.key)?;
    }

    let lost = ledger.lost_keys();
    let verdict = if lost.is_empty() {
        Verdict::Durable
    } else {
        Verdict::NotDurable { lost }
    };

    Ok(Report {
        verdict,
        replay: ledger.stats().clone(),
        keys: ledger.len(),
        attempted: ledger.iter().filter(|(_, s)| s.attempted_write).count(),
        confirmed: ledger.iter().filter(|(_, s)| s.confirmed_durable).count(),
        recovered: recovered.len(),
    })
}

/// Verify a crashed state directory against its transcript.
///
/// Protocol violations come back as errors; a lost item comes back as
/// [`Verdict::NotDurable`].
pub fn verify(crashed_dir: &Path, transcript: &Path) -> Result<Report> {
    let span = spans::verify_span(transcript);
    let _entered = span.enter();

    let ledger = replay_file(transcript)?;
    let recovered = recovered_items(crashed_dir)?;
    let report = check_recovered(ledger, &recovered)?;

    span.record("verdict", report.verdict.label());
    metrics::verdicts().add(1, &[KeyValue::new("verdict", report.verdict.label())]);
    debug!(
        lines = report.replay.lines,
        fragment_dropped = report.replay.fragment_dropped,
        keys = report.keys,
        attempted = report.attempted,
        confirmed = report.confirmed,
        integrated = report.replay.integrated,
        recovered = report.recovered,
        "verification complete"
    );
    Ok(report)
}

/// Items left in the queue of a crashed state directory, read from a
/// snapshot so the crashed files are never opened in place.
///
/// A directory whose queue was never created recovers as empty.
pub fn recovered_items(crashed_dir: &Path) -> Result<Vec<WorkItem>> {
    let Some(snapshot) = SqliteQueue::open_snapshot(queue::queue_path(crashed_dir))? else {
        debug!(dir = %crashed_dir.display(), "no queue in crashed state");
        return Ok(Vec::new());
    };
    let items = queue::scan(&snapshot)?;
    snapshot.close()?;
    Ok(items)
}
