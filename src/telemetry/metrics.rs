//! Metric instrument factories for orphanq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"orphanq"` meter.

use opentelemetry::metrics::{Counter, Meter};

/// Returns the shared meter for orphanq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("orphanq")
}

/// Counter: queue-level operations (enqueue, peek, dequeue, ...).
/// Labels: `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("orphanq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: transcript lines emitted.
/// Labels: `event`.
pub fn transcript_events() -> Counter<u64> {
    meter()
        .u64_counter("orphanq.transcript.events")
        .with_description("Number of transcript lines emitted")
        .build()
}

/// Counter: peeked items the consumer deliberately left in the queue.
pub fn synthetic_integration_failures() -> Counter<u64> {
    meter()
        .u64_counter("orphanq.consumer.synthetic_failures")
        .with_description("Peeked orphans deliberately left in the queue")
        .build()
}

/// Counter: verifier outcomes.
/// Labels: `verdict` ("durable" | "not_durable").
pub fn verdicts() -> Counter<u64> {
    meter()
        .u64_counter("orphanq.verifier.verdicts")
        .with_description("Verifier verdicts")
        .build()
}
