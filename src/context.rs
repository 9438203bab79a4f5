use std::sync::Arc;

use tokio::time::{Duration, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Why an [`ExecutionContext`] is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneCause {
    Cancelled,
    DeadlineExceeded,
}

/// Cancellation scope handed to every job body.
///
/// Cancellation is advisory: the pool stops waiting on a job whose context is
/// done, but the body keeps running until it checks the context itself.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    name: Arc<str>,
}

impl ExecutionContext {
    /// Derives a child scope of `parent`. With a timeout the deadline starts
    /// counting now, so time spent queued counts against the job.
    pub(crate) fn new(
        parent: &CancellationToken,
        timeout: Option<Duration>,
        name: Arc<str>,
    ) -> (Self, Release) {
        let token = parent.child_token();
        let release = Release(token.clone().drop_guard());
        let ctx = Self {
            token,
            deadline: timeout.map(|t| Instant::now() + t),
            name,
        };
        (ctx, release)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn cause(&self) -> Option<DoneCause> {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(DoneCause::DeadlineExceeded);
        }
        if self.token.is_cancelled() {
            return Some(DoneCause::Cancelled);
        }
        None
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.cause().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}

/// Releases the resources tied to one [`ExecutionContext`].
///
/// Consumed by [`Release::release`]; dropping it has the same effect, so a
/// job discarded before running is released too.
pub(crate) struct Release(DropGuard);

impl Release {
    pub(crate) fn release(self) {
        drop(self.0);
    }
}
