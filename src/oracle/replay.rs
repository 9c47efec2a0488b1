//! Transcript replay: rebuilds per-item lifecycle state.
//!
//! The transcript may have been cut at any byte by the crash driver. An
//! unterminated final segment is always dropped, since even a segment that
//! parses may be a prefix of a longer key. A malformed final line is taken
//! as the crash point. A malformed line anywhere else is fatal.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::error::{CollisionKind, Error, Result};
use crate::model::ItemKey;
use crate::transcript::Event;

/// Reconstructed lifecycle of one item key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemState {
    /// A `Writing` line was seen: the enqueue was invoked.
    pub attempted_write: bool,
    /// A `Wrote` line was seen: the enqueue returned success.
    pub confirmed_durable: bool,
    /// Integrated during the run, or present in the recovered queue.
    pub observed_afterward: bool,
}

impl ItemState {
    /// Promised durable but never seen again.
    pub fn is_lost(&self) -> bool {
        self.confirmed_durable && !self.observed_afterward
    }
}

/// Line-level counters from a replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Lines applied to the ledger.
    pub lines: usize,
    pub integrated: usize,
    /// `Error ...` lines seen.
    pub error_lines: usize,
    /// Whether a crash fragment at the end of the transcript was dropped.
    pub fragment_dropped: bool,
}

/// Per-key state for one verifier run.
#[derive(Debug, Default)]
pub struct Ledger {
    states: BTreeMap<ItemKey, ItemState>,
    stats: ReplayStats,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one transcript event.
    pub fn apply(&mut self, event: &Event) -> Result<()> {
        self.stats.lines += 1;
        match *event {
            Event::Writing(key) => {
                let state = self.states.entry(key).or_default();
                if state.attempted_write {
                    return Err(Error::KeyCollision {
                        key,
                        kind: CollisionKind::WriteAttempt,
                    });
                }
                state.attempted_write = true;
            }
            Event::Wrote(key) => {
                let state = self.states.entry(key).or_default();
                if state.confirmed_durable {
                    return Err(Error::KeyCollision {
                        key,
                        kind: CollisionKind::WriteConfirmation,
                    });
                }
                state.confirmed_durable = true;
            }
            Event::Integrated(key) => {
                let state = self.states.entry(key).or_default();
                if !state.attempted_write {
                    return Err(Error::ObservedBeforeWritten(key));
                }
                state.observed_afterward = true;
                self.stats.integrated += 1;
            }
            Event::Error(_) => self.stats.error_lines += 1,
            Event::OpenedQueue | Event::ClosingQueue | Event::Restarting => {}
        }
        Ok(())
    }

    /// Record that `key` is still present in the recovered queue.
    pub fn record_recovered(&mut self, key: ItemKey) -> Result<()> {
        match self.states.get_mut(&key) {
            Some(state) if state.attempted_write => {
                state.observed_afterward = true;
                Ok(())
            }
            _ => Err(Error::WritelessRecovery(key)),
        }
    }

    pub fn get(&self, key: ItemKey) -> Option<&ItemState> {
        self.states.get(&key)
    }

    /// All tracked keys in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (ItemKey, &ItemState)> {
        self.states.iter().map(|(key, state)| (*key, state))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Keys promised durable and never observed afterward, ascending.
    pub fn lost_keys(&self) -> Vec<ItemKey> {
        self.iter()
            .filter(|(_, state)| state.is_lost())
            .map(|(key, _)| key)
            .collect()
    }

    pub fn stats(&self) -> &ReplayStats {
        &self.stats
    }
}

/// Replay a (possibly truncated) transcript.
pub fn replay(transcript: &[u8]) -> Result<Ledger> {
    let mut ledger = Ledger::new();

    let mut lines: Vec<&[u8]> = transcript.split(|&b| b == b'\n').collect();
    // The final segment is empty when the transcript ends with a newline.
    if let Some(tail) = lines.pop()
        && !tail.is_empty()
    {
        debug!(fragment = %String::from_utf8_lossy(tail), "dropping unterminated final line");
        ledger.stats.fragment_dropped = true;
    }

    let terminal = if ledger.stats.fragment_dropped {
        None
    } else {
        lines.len().checked_sub(1)
    };

    for (idx, raw) in lines.iter().enumerate() {
        let event = std::str::from_utf8(raw).ok().and_then(Event::parse);
        match event {
            Some(event) => ledger.apply(&event)?,
            None if Some(idx) == terminal => {
                debug!(line = %String::from_utf8_lossy(raw), "dropping malformed final line");
                ledger.stats.fragment_dropped = true;
            }
            None => {
                return Err(Error::MalformedLine {
                    line_no: idx + 1,
                    line: String::from_utf8_lossy(raw).into_owned(),
                });
            }
        }
    }

    Ok(ledger)
}

/// Replay a transcript from any reader, to end of stream.
pub fn replay_reader(mut reader: impl Read) -> Result<Ledger> {
    let mut transcript = Vec::new();
    reader.read_to_end(&mut transcript)?;
    replay(&transcript)
}

/// Replay a transcript file.
pub fn replay_file(path: &Path) -> Result<Ledger> {
    replay_reader(std::fs::File::open(path)?)
}
