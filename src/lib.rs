//! # orphanq
//!
//! Crash-consistency oracle for a persistent, at-least-once orphan queue.
//!
//! The workload stresses the queue with concurrent producers and a
//! consumer, narrating every durability-relevant step on a line-oriented
//! transcript. After a (simulated) crash, the oracle replays the possibly
//! truncated transcript, scans the recovered queue, and reports whether
//! every write that was confirmed durable survived.

pub mod config;
pub mod error;
pub mod model;
pub mod oracle;
pub mod queue;
pub mod telemetry;
pub mod transcript;
pub mod workload;
