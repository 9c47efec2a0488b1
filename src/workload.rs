//! Workload generator: stresses the orphan queue across restart cycles.
//!
//! Each cycle opens the queue, runs `writes` producers and one consumer
//! concurrently, waits for all of them, then closes the queue. Every
//! durability-relevant step is announced on the transcript so the verifier
//! can replay it after a crash.

use std::path::PathBuf;
use std::sync::Arc;

use rand::Rng;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkloadConfig;
use crate::error::{Error, Result};
use crate::model::{ItemKey, WorkItem};
use crate::queue::{OrphanQueue, SqliteQueue};
use crate::telemetry::{metrics, spans};
use crate::transcript::{Event, Transcript};

/// Counters for a whole workload run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: usize,
    /// Orphans whose durable write returned success.
    pub written: usize,
    /// Orphans the consumer integrated and dequeued.
    pub integrated: usize,
    /// Peeked orphans deliberately left in the queue.
    pub left_behind: usize,
    pub empty_polls: usize,
    pub read_errors: usize,
    pub close_errors: usize,
}

/// What a single task of a cycle accomplished.
enum TaskOutcome {
    Produced,
    Consumed(RunSummary),
}

/// Result of one consumer iteration.
enum Integration {
    Empty,
    Integrated(ItemKey),
    LeftBehind(ItemKey),
    /// Peek or decode failed. Reported, then the iteration is skipped.
    Unreadable(&'static str, Error),
}

/// The workload driver. Opens a fresh queue handle per cycle via `open_queue`.
pub struct Workload<F> {
    config: WorkloadConfig,
    transcript: Arc<Transcript>,
    open_queue: F,
    run_id: Uuid,
}

impl<Q, F> Workload<F>
where
    Q: OrphanQueue + 'static,
    F: FnMut() -> Result<Q>,
{
    pub fn new(config: WorkloadConfig, transcript: Arc<Transcript>, open_queue: F) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transcript,
            open_queue,
            run_id: Uuid::new_v4(),
        })
    }

    /// Run every restart cycle. Any error is fatal to the run.
    pub async fn run(mut self) -> Result<RunSummary> {
        info!(run_id = %self.run_id, config = ?self.config, "workload starting");
        let mut summary = RunSummary::default();
        for cycle in 0..self.config.restarts {
            if cycle != 0 {
                self.transcript.emit(&Event::Restarting)?;
            }
            let span = spans::cycle_span(&self.run_id, cycle);
            let cycle_summary = self.run_once().instrument(span).await?;
            summary.absorb(&cycle_summary);
            summary.cycles += 1;
        }
        info!(?summary, "workload finished");
        Ok(summary)
    }

    async fn run_once(&mut self) -> Result<RunSummary> {
        let queue = Arc::new((self.open_queue)().inspect_err(|e| {
            error!("opening queue failed: {e}");
        })?);
        self.transcript.emit(&Event::OpenedQueue)?;
        info!("opened queue");

        let mut tasks = JoinSet::new();
        tasks.spawn(
            consume(
                Arc::clone(&queue),
                Arc::clone(&self.transcript),
                self.config.clone(),
            )
            .in_current_span(),
        );
        for _ in 0..self.config.writes {
            tasks.spawn(produce(Arc::clone(&queue), Arc::clone(&self.transcript)).in_current_span());
        }

        // Returning early drops the set, which aborts the remaining tasks.
        let mut summary = RunSummary::default();
        while let Some(joined) = tasks.join_next().await {
            let outcome =
                joined.map_err(|e| Error::Other(format!("workload task failed: {e}")))??;
            match outcome {
                TaskOutcome::Produced => summary.written += 1,
                TaskOutcome::Consumed(consumer) => summary.absorb(&consumer),
            }
        }

        self.transcript.emit(&Event::ClosingQueue)?;
        if let Err(e) = queue.close() {
            error!("closing queue failed: {e}");
            self.transcript.emit(&Event::error("closing queue"))?;
            summary.close_errors += 1;
        }
        info!(written = summary.written, integrated = summary.integrated, "closed queue");
        Ok(summary)
    }
}

impl RunSummary {
    fn absorb(&mut self, other: &RunSummary) {
        self.written += other.written;
        self.integrated += other.integrated;
        self.left_behind += other.left_behind;
        self.empty_polls += other.empty_polls;
        self.read_errors += other.read_errors;
        self.close_errors += other.close_errors;
    }
}

/// Workload against the SQLite queue kept in `<dir>/orphanqueue`.
pub fn sqlite_workload(
    config: WorkloadConfig,
    transcript: Arc<Transcript>,
    dir: PathBuf,
) -> Result<Workload<impl FnMut() -> Result<SqliteQueue>>> {
    let queue_dir = crate::queue::queue_path(dir);
    Workload::new(config, transcript, move || SqliteQueue::open(&queue_dir))
}

/// Run a blocking queue call off the async workers.
async fn blocking<Q, T>(queue: &Arc<Q>, f: impl FnOnce(&Q) -> Result<T> + Send + 'static) -> Result<T>
where
    Q: OrphanQueue + 'static,
    T: Send + 'static,
{
    let queue = Arc::clone(queue);
    tokio::task::spawn_blocking(move || f(&queue))
        .await
        .map_err(|e| Error::Other(format!("queue call panicked: {e}")))?
}

/// One producer: generate an orphan, announce it, write it durably, confirm.
async fn produce<Q: OrphanQueue + 'static>(
    queue: Arc<Q>,
    transcript: Arc<Transcript>,
) -> Result<TaskOutcome> {
    let item = WorkItem::generate()?;
    let key = item.key;
    let payload = item.encode()?;

    transcript.emit(&Event::Writing(key))?;
    blocking(&queue, move |q| q.enqueue(&payload))
        .await
        .inspect_err(|e| error!(%key, "writing to queue failed: {e}"))?;
    transcript.emit(&Event::Wrote(key))?;

    debug!(%key, issuer_id = item.issuer_id, "wrote orphan");
    Ok(TaskOutcome::Produced)
}

/// The consumer: `reads` iterations of peek, maybe integrate, dequeue.
async fn consume<Q: OrphanQueue + 'static>(
    queue: Arc<Q>,
    transcript: Arc<Transcript>,
    config: WorkloadConfig,
) -> Result<TaskOutcome> {
    let mut summary = RunSummary::default();
    for _ in 0..config.reads {
        match integrate_one(&queue, &transcript, config.probability).await? {
            Integration::Empty => {
                summary.empty_polls += 1;
                tokio::time::sleep(config.empty_backoff()).await;
            }
            Integration::Integrated(key) => {
                debug!(%key, "integrated orphan");
                summary.integrated += 1;
            }
            Integration::LeftBehind(key) => {
                debug!(%key, "synthetic integration failure, leaving orphan queued");
                metrics::synthetic_integration_failures().add(1, &[]);
                summary.left_behind += 1;
            }
            Integration::Unreadable(context, e) => {
                warn!("{context}: {e}");
                transcript.emit(&Event::error("reading queue"))?;
                summary.read_errors += 1;
            }
        }
    }
    Ok(TaskOutcome::Consumed(summary))
}

async fn integrate_one<Q: OrphanQueue + 'static>(
    queue: &Arc<Q>,
    transcript: &Transcript,
    failure_chance: f64,
) -> Result<Integration> {
    let payload = match blocking(queue, |q| q.peek()).await {
        Ok(Some(payload)) => payload,
        Ok(None) => return Ok(Integration::Empty),
        Err(e) => return Ok(Integration::Unreadable("failed to peek into orphan queue", e)),
    };
    let item = match WorkItem::decode(&payload) {
        Ok(item) => item,
        Err(e) => return Ok(Integration::Unreadable("failed to decode orphan", e)),
    };

    let left_behind = rand::thread_rng().gen_bool(failure_chance);
    if left_behind {
        return Ok(Integration::LeftBehind(item.key));
    }

    transcript.emit(&Event::Integrated(item.key))?;
    let removed = blocking(queue, |q| q.dequeue())
        .await
        .inspect_err(|e| error!(key = %item.key, "dequeueing integrated orphan failed: {e}"))?;
    if removed.is_none() {
        return Err(Error::Other(format!(
            "orphan {} vanished between peek and dequeue",
            item.key
        )));
    }
    Ok(Integration::Integrated(item.key))
}
