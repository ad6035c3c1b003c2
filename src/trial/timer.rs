//! Cancelable one-shot timers for a single trial.
//!
//! The timer service does not run callbacks itself. Expirations are
//! handed back to the owner one at a time through [`TimerService::pop_due`],
//! which lets the owner cancel every remaining timer from inside the
//! handling of an expiration (a cancelled entry can never be popped).

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::time::Instant;

/// Handle identifying one scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl std::fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Deadline-ordered set of pending timers carrying a payload each.
///
/// Entries are ordered by deadline and, for equal deadlines, by the
/// order in which they were scheduled.
pub struct TimerService<T> {
    queue: BTreeMap<(Instant, u64), T>,
    deadlines: HashMap<TimerHandle, Instant>,
    next_seq: u64,
}

impl<T> TimerService<T> {
    /// Creates an empty timer service.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Schedules `payload` to expire `delay` from now.
    pub fn schedule(&mut self, delay: Duration, payload: T) -> TimerHandle {
        self.schedule_at(Instant::now() + delay, payload)
    }

    /// Schedules `payload` to expire at `deadline`.
    pub fn schedule_at(&mut self, deadline: Instant, payload: T) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        let handle = TimerHandle(seq);
        self.queue.insert((deadline, seq), payload);
        self.deadlines.insert(handle, deadline);
        handle
    }

    /// Cancels a pending timer.
    ///
    /// Returns `false` if the handle already expired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let Some(deadline) = self.deadlines.remove(&handle) else {
            return false;
        };
        self.queue.remove(&(deadline, handle.0)).is_some()
    }

    /// Cancels every pending timer and returns how many were removed.
    ///
    /// Safe to call repeatedly; later calls return 0.
    pub fn cancel_all(&mut self) -> usize {
        let removed = self.queue.len();
        self.queue.clear();
        self.deadlines.clear();
        removed
    }

    /// Number of timers still pending.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Returns whether `handle` is still pending.
    #[must_use]
    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.deadlines.contains_key(&handle)
    }

    /// Earliest pending deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Removes and returns the earliest timer whose deadline is at or
    /// before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerHandle, T)> {
        let (&(deadline, seq), _) = self.queue.first_key_value()?;
        if deadline > now {
            return None;
        }
        let payload = self.queue.remove(&(deadline, seq))?;
        let handle = TimerHandle(seq);
        self.deadlines.remove(&handle);
        Some((handle, payload))
    }

    /// Sleeps until the earliest pending deadline.
    ///
    /// Never resolves while no timer is pending, so it can sit in a
    /// `select!` next to other event sources.
    pub async fn wait_due(&self) {
        match self.next_deadline() {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }
}

impl<T> Default for TimerService<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for TimerService<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerService")
            .field("pending", &self.pending())
            .field("next_deadline", &self.next_deadline())
            .finish_non_exhaustive()
    }
}
