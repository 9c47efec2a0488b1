//! Transcript protocol shared by the workload and the verifier.
//!
//! One event per newline-terminated line, appended to a single sink shared
//! by every task. The external crash driver may cut the transcript at any
//! byte, so a line must reach the sink in one write: a split line would be
//! indistinguishable from a crash artifact.

use std::fs::File;
use std::io::Write;
use std::os::fd::AsFd;
use std::sync::Mutex;

use opentelemetry::KeyValue;

use crate::error::{Error, Result};
use crate::model::ItemKey;
use crate::telemetry::metrics;

const WRITING_PREFIX: &str = "Writing orphan with ID ";
const WROTE_PREFIX: &str = "Wrote orphan with ID ";
const INTEGRATED_PREFIX: &str = "Integrated orphan with ID ";
const ERROR_PREFIX: &str = "Error ";

const OPENED_QUEUE: &str = "Opened queue";
const CLOSING_QUEUE: &str = "Closing queue";
const RESTARTING: &str = "Restarting";

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One transcript line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A producer is about to attempt a durable write. Emitted before the call.
    Writing(ItemKey),
    /// The durable write returned success. Emitted after the call.
    Wrote(ItemKey),
    /// The consumer peeked the item and is about to remove it.
    Integrated(ItemKey),
    OpenedQueue,
    ClosingQueue,
    Restarting,
    /// A local failure that is not itself a durability violation.
    /// Holds the text after `Error `.
    Error(String),
}

impl Event {
    /// Build an `Error ...` event. Newlines would split the line, so they
    /// are flattened to spaces.
    pub fn error(detail: impl Into<String>) -> Self {
        Event::Error(detail.into().replace(['\n', '\r'], " "))
    }

    /// Parse one line (without its terminator). `None` if it matches no
    /// known form.
    pub fn parse(line: &str) -> Option<Self> {
        if let Some(rest) = line.strip_prefix(WRITING_PREFIX) {
            return parse_key(rest).map(Event::Writing);
        }
        if let Some(rest) = line.strip_prefix(WROTE_PREFIX) {
            return parse_key(rest).map(Event::Wrote);
        }
        if let Some(rest) = line.strip_prefix(INTEGRATED_PREFIX) {
            return parse_key(rest).map(Event::Integrated);
        }
        if let Some(rest) = line.strip_prefix(ERROR_PREFIX) {
            return Some(Event::Error(rest.to_string()));
        }
        match line {
            OPENED_QUEUE => Some(Event::OpenedQueue),
            CLOSING_QUEUE => Some(Event::ClosingQueue),
            RESTARTING => Some(Event::Restarting),
            _ => None,
        }
    }

    /// The item this event is about, if any.
    pub fn key(&self) -> Option<ItemKey> {
        match self {
            Event::Writing(key) | Event::Wrote(key) | Event::Integrated(key) => Some(*key),
            _ => None,
        }
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Writing(_) => "writing",
            Event::Wrote(_) => "wrote",
            Event::Integrated(_) => "integrated",
            Event::OpenedQueue => "opened_queue",
            Event::ClosingQueue => "closing_queue",
            Event::Restarting => "restarting",
            Event::Error(_) => "error",
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Writing(key) => write!(f, "{WRITING_PREFIX}{key}"),
            Event::Wrote(key) => write!(f, "{WROTE_PREFIX}{key}"),
            Event::Integrated(key) => write!(f, "{INTEGRATED_PREFIX}{key}"),
            Event::OpenedQueue => f.write_str(OPENED_QUEUE),
            Event::ClosingQueue => f.write_str(CLOSING_QUEUE),
            Event::Restarting => f.write_str(RESTARTING),
            Event::Error(detail) => write!(f, "{ERROR_PREFIX}{detail}"),
        }
    }
}

/// Keys are plain decimal digits. No sign, no whitespace.
fn parse_key(s: &str) -> Option<ItemKey> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Append-only transcript sink shared by all tasks of a run.
pub struct Transcript {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl Transcript {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Mutex::new(Box::new(sink)),
        }
    }

    /// Transcript written straight to a file descriptor.
    ///
    /// The descriptor is duplicated and wrapped in a `File`, which has no
    /// userspace buffer: each `write` is one `write(2)`, so a short write
    /// surfaces to [`Transcript::emit`] instead of being finished later.
    pub fn from_fd(fd: impl AsFd) -> Result<Self> {
        let file = File::from(fd.as_fd().try_clone_to_owned()?);
        Ok(Self::new(file))
    }

    /// Transcript on the process's standard output, bypassing the
    /// line-buffered `Stdout` handle.
    pub fn stdout() -> Result<Self> {
        Self::from_fd(std::io::stdout())
    }

    /// Append one event as a complete line.
    ///
    /// The line goes out in a single `write`; a short write is fatal.
    pub fn emit(&self, event: &Event) -> Result<()> {
        let line = format!("{event}\n");
        let mut sink = self
            .sink
            .lock()
            .map_err(|_| Error::Other("transcript mutex poisoned".to_string()))?;
        let written = sink.write(line.as_bytes())?;
        if written != line.len() {
            return Err(Error::ShortTranscriptWrite {
                written,
                expected: line.len(),
            });
        }
        sink.flush()?;
        metrics::transcript_events().add(1, &[KeyValue::new("event", event.kind())]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_lines_parse() {
        assert_eq!(
            Event::parse("Writing orphan with ID 12"),
            Some(Event::Writing(ItemKey(12)))
        );
        assert_eq!(
            Event::parse("Wrote orphan with ID 0"),
            Some(Event::Wrote(ItemKey(0)))
        );
        assert_eq!(
            Event::parse("Integrated orphan with ID 999999999"),
            Some(Event::Integrated(ItemKey(999_999_999)))
        );
    }

    #[test]
    fn lifecycle_and_error_lines_parse() {
        assert_eq!(Event::parse("Opened queue"), Some(Event::OpenedQueue));
        assert_eq!(Event::parse("Closing queue"), Some(Event::ClosingQueue));
        assert_eq!(Event::parse("Restarting"), Some(Event::Restarting));
        assert_eq!(
            Event::parse("Error closing queue"),
            Some(Event::Error("closing queue".to_string()))
        );
    }

    #[test]
    fn fragments_and_noise_do_not_parse() {
        for line in [
            "",
            "Writ",
            "Writing orphan with ID ",
            "Writing orphan with ID -3",
            "Writing orphan with ID +3",
            "Writing orphan with ID 3 ",
            "Wrote orphan with ID 99999999999999999999",
            "Opened que",
            "Error",
            "Restarting now",
        ] {
            assert_eq!(Event::parse(line), None, "{line:?} should not parse");
        }
    }

    #[test]
    fn display_round_trips_through_parse() {
        for event in [
            Event::Writing(ItemKey(5)),
            Event::Wrote(ItemKey(5)),
            Event::Integrated(ItemKey(5)),
            Event::OpenedQueue,
            Event::ClosingQueue,
            Event::Restarting,
            Event::error("reading queue"),
        ] {
            assert_eq!(Event::parse(&event.to_string()), Some(event));
        }
    }

    #[test]
    fn error_detail_cannot_split_a_line() {
        let event = Event::error("bad\nthing");
        assert_eq!(event.to_string(), "Error bad thing");
    }

    /// Accepts at most `limit` bytes per write.
    struct Trickle {
        limit: usize,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len().min(self.limit))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn fd_sink_writes_each_line_through() {
        use std::io::{Read, Seek, SeekFrom};

        let mut file = tempfile::tempfile().unwrap();
        let transcript = Transcript::from_fd(&file).unwrap();
        transcript.emit(&Event::Writing(ItemKey(3))).unwrap();
        transcript.emit(&Event::Restarting).unwrap();

        // Read through the original handle while the transcript is alive.
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "Writing orphan with ID 3\nRestarting\n");
    }

    #[test]
    fn stdout_sink_opens() {
        assert!(Transcript::stdout().is_ok());
    }

    /// A line-buffered writer reports a partial line as fully written.
    #[test]
    fn line_buffering_would_hide_a_short_write() {
        let mut buffered = std::io::LineWriter::new(Trickle { limit: 4 });
        assert_eq!(buffered.write(b"Restarting\n").unwrap(), 11);
    }

    #[test]
    fn short_write_is_fatal() {
        let transcript = Transcript::new(Trickle { limit: 4 });
        let err = transcript.emit(&Event::Restarting).unwrap_err();
        assert!(
            matches!(err, Error::ShortTranscriptWrite { written: 4, expected: 11 }),
            "got {err:?}"
        );
    }
}
