//! Cooperative cancellation for the framers.
//!
//! A framer never interrupts an I/O attempt. When an attempt times out it
//! asks its [`Abort`] predicate whether to give up; if so the operation fails
//! with `ConnectionClosed`, otherwise the attempt is retried.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancellation predicate polled after each timed-out I/O attempt.
pub trait Abort {
    fn aborted(&self) -> bool;
}

impl<F> Abort for F
where
    F: Fn() -> bool,
{
    fn aborted(&self) -> bool {
        self()
    }
}

/// Never cancels. Timeouts are retried forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverAbort;

impl Abort for NeverAbort {
    fn aborted(&self) -> bool {
        false
    }
}

/// Shared flag that lets another thread or task close a framer.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Takes effect at the next timed-out attempt.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Abort for AbortHandle {
    fn aborted(&self) -> bool {
        self.is_aborted()
    }
}

/// Cancels once a point in time has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    /// A deadline `duration` from now, or `None` if that instant is not
    /// representable on this platform.
    pub fn after(duration: Duration) -> Option<Self> {
        Instant::now().checked_add(duration).map(Self::at)
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn has_passed(&self) -> bool {
        Instant::now() >= self.at
    }
}

impl Abort for Deadline {
    fn aborted(&self) -> bool {
        self.has_passed()
    }
}
