//! Cancellable timers.
//!
//! Two shapes are used by the core:
//!
//! - [`Deadline`] is a one-shot timer owned by a piece of matcher state and
//!   observed lazily by its owner. Re-arming always replaces the previous
//!   deadline, so there is never more than one pending expiry.
//! - [`TimerHandle`] owns a spawned task (a repeating injection loop). The task
//!   is aborted when the handle is cancelled or dropped, so a handle going out
//!   of scope can never leave an orphaned timer behind.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// One-shot deadline, armed relative to now and checked on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// Arm the deadline `after` from now, replacing any previous one.
    pub fn arm(&mut self, after: Duration) {
        self.at = Some(Instant::now() + after);
    }

    pub fn cancel(&mut self) {
        self.at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    /// True while armed and not yet expired.
    pub fn is_pending(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() < at)
    }

    /// Consume an expired deadline. Returns true exactly once per expiry.
    pub fn take_expired(&mut self) -> bool {
        match self.at {
            Some(at) if Instant::now() >= at => {
                self.at = None;
                true
            }
            _ => false,
        }
    }
}

/// Leading-edge pulse: triggering while already pulsing does not extend it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pulse {
    until: Deadline,
}

impl Pulse {
    pub const DURATION: Duration = Duration::from_secs(1);

    pub fn trigger(&mut self) {
        if !self.until.is_pending() {
            self.until.arm(Self::DURATION);
        }
    }

    pub fn is_active(&self) -> bool {
        self.until.is_pending()
    }
}

/// Handle to a spawned timer task. Aborts the task on cancel or drop.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            task: tokio::spawn(future),
        }
    }

    pub fn cancel(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
