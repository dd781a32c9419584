//! Cancellation and deadline propagation for storage calls.
//!
//! # Responsibility
//! - Carry a shared cancel flag and an optional deadline into every
//!   executor/repository call.
//! - Report why a call was abandoned (`Cancelled` vs `DeadlineExceeded`).
//!
//! # Invariants
//! - Clones share the same cancel flag; cancelling one cancels all.
//! - Derived contexts never extend the parent deadline.

use crate::error::{RepoError, RepoResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancellable, deadline-bearing call context.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Context {
    /// Context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a context sharing this cancel flag that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a context sharing this cancel flag that expires at `deadline`.
    ///
    /// The earlier of the existing and the requested deadline wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(deadline),
        }
    }

    /// Cancels this context and every clone derived from it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` once the context is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Returns the error describing why the context is done, if it is.
    pub fn err(&self) -> Option<RepoError> {
        if self.is_cancelled() {
            return Some(RepoError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(RepoError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Fails fast when the context is already done.
    pub fn check(&self) -> RepoResult<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
