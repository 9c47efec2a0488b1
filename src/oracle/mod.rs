//! The durability oracle: transcript replay plus recovered-queue check.

pub mod replay;
pub mod verdict;

pub use replay::{ItemState, Ledger, ReplayStats, replay, replay_file, replay_reader};
pub use verdict::{Report, Verdict, check, check_recovered, recovered_items, verify};
