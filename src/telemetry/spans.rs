//! Span helpers for workload cycles and verifier runs.

use tracing::Span;
use uuid::Uuid;

/// Start a span for one restart cycle of the workload.
pub fn cycle_span(run_id: &Uuid, cycle: usize) -> Span {
    tracing::info_span!("workload.cycle", "run.id" = %run_id, cycle = cycle)
}

/// Start a span for one verifier invocation.
///
/// The `verdict` field is declared empty and filled in once known.
pub fn verify_span(transcript: &std::path::Path) -> Span {
    tracing::info_span!(
        "verifier.run",
        transcript = %transcript.display(),
        verdict = tracing::field::Empty,
    )
}
