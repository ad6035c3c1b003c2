//! Structured event stream for `trialkit`.
//!
//! Discrete, typed events emitted while a session runs. Events are
//! serialized as newline-delimited JSON (JSONL) and carry a monotonically
//! increasing sequence number, so a consumer can rebuild the exact order
//! of phase changes and responses.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::trial::outcome::{InputSource, Termination};
use crate::trial::state::Phase;

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted during a session.
///
/// Each variant is tagged with `"type"` when serialized to JSON.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A session has started.
    SessionStarted {
        /// When the session started.
        timestamp: DateTime<Utc>,
        /// Session identifier.
        session_id: String,
        /// Configured experiment name.
        experiment: String,
        /// Number of trials in the timeline.
        trial_count: usize,
    },

    /// A trial left `Pending`.
    TrialStarted {
        /// When the trial started.
        timestamp: DateTime<Utc>,
        /// Position of the trial.
        trial_index: usize,
        /// Trial label, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// A trial entered a new phase.
    PhaseEntered {
        /// When the transition occurred.
        timestamp: DateTime<Utc>,
        /// Position of the trial.
        trial_index: usize,
        /// Phase that was entered.
        phase: Phase,
        /// Milliseconds since trial start.
        elapsed_ms: u64,
    },

    /// A response was recorded.
    ResponseRecorded {
        /// When the response was recorded.
        timestamp: DateTime<Utc>,
        /// Position of the trial.
        trial_index: usize,
        /// Device the response came from.
        source: InputSource,
        /// Milliseconds since trial start.
        elapsed_ms: u64,
        /// Whether the response became the authoritative one.
        primary: bool,
    },

    /// A trial reached `Completed`.
    TrialCompleted {
        /// When the trial completed.
        timestamp: DateTime<Utc>,
        /// Position of the trial.
        trial_index: usize,
        /// What ended the trial.
        terminated_by: Termination,
        /// Milliseconds from start to completion.
        elapsed_ms: u64,
        /// Number of recorded responses.
        responses: usize,
    },

    /// The timeline finished (or was ended).
    SessionFinished {
        /// When the session finished.
        timestamp: DateTime<Utc>,
        /// Session identifier.
        session_id: String,
        /// Number of completed trials.
        trials_completed: usize,
        /// Whether the session was ended before the last trial.
        ended_early: bool,
    },

    /// One submission attempt finished.
    SubmissionAttempt {
        /// When the attempt finished.
        timestamp: DateTime<Utc>,
        /// Deduplication key of the job.
        dedupe_key: String,
        /// One-based attempt number.
        attempt: u32,
        /// Whether the attempt succeeded.
        success: bool,
        /// Failure description for unsuccessful attempts.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A submission job settled.
    SubmissionSettled {
        /// When the job settled.
        timestamp: DateTime<Utc>,
        /// Deduplication key of the job.
        dedupe_key: String,
        /// `delivered`, `already_settled` or `exhausted`.
        result: String,
        /// Attempts spent.
        attempts: u32,
    },
}

// ---------------------------------------------------------------------------
// Envelope (adds sequence number via serde flatten)
// ---------------------------------------------------------------------------

/// Wraps an [`Event`] with a monotonically increasing sequence number.
#[derive(Debug, Serialize)]
struct EventEnvelope {
    /// Zero-based, monotonically increasing sequence counter.
    sequence: u64,
    /// The wrapped event (flattened into the same JSON object).
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Each call to [`emit`](Self::emit) increments the sequence counter,
/// writes one JSON line and flushes. Serialization or I/O failures are
/// dropped; a broken event sink never ends a session.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stderr.
    ///
    /// Stdout carries the session JSON in dry-run mode.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        if let Ok(mut w) = self.writer.lock() {
            if let Ok(line) = serde_json::to_string(&envelope) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }

    /// Returns the number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
