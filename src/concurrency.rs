//! Cancellation, fetch limiting and ordered hand-off for concurrent runs
//!
//! A build or sync run fans out one task per child document. The tasks
//! share the cancellation flag, which is checked only at document
//! boundaries, and the fetch limiter, which bounds the number of requests
//! in flight against the upstream host. A [`Turn`] serializes the short
//! section of each task that must happen in reference order.

use crate::error::MirrorError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore, SemaphorePermit};

/// Cooperative cancellation flag shared by every task of a run
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Documents already being persisted finish.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with `Cancelled` if cancellation was requested.
    pub fn check(&self) -> Result<(), MirrorError> {
        if self.is_cancelled() {
            Err(MirrorError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Upper bound on concurrent upstream fetches
#[derive(Debug, Clone)]
pub struct FetchLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl FetchLimiter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Wait for a free fetch slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, MirrorError> {
        self.semaphore
            .acquire()
            .await
            .map_err(|_| MirrorError::ConfigError("Fetch limiter closed".to_string()))
    }
}

/// Ordered hand-off between concurrently running tasks.
///
/// Turns created by [`Turn::split`] become due one after another in the
/// order they were created, however the tasks holding them are scheduled.
/// Dropping a turn passes it on.
#[derive(Debug, Default)]
pub struct Turn {
    wait: Option<oneshot::Receiver<()>>,
    done: Option<oneshot::Sender<()>>,
}

impl Turn {
    /// A turn that is due immediately and hands off to nobody.
    pub fn first() -> Self {
        Self::default()
    }

    /// Split into `n` consecutive turns. The first is due when this turn
    /// is; this turn passes once the last of them has.
    ///
    /// With `n == 0` use [`Turn::hand_off`] instead, so the next turn still
    /// waits for this one.
    pub fn split(mut self, n: usize) -> Vec<Turn> {
        let mut turns = Vec::with_capacity(n);
        let mut wait = self.wait.take();
        for i in 0..n {
            let (done, next) = if i + 1 == n {
                (self.done.take(), None)
            } else {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            };
            turns.push(Turn { wait, done });
            wait = next;
        }
        turns
    }

    /// Wait until every earlier turn has passed.
    pub async fn wait(&mut self) {
        if let Some(wait) = self.wait.as_mut() {
            // a dropped sender counts as passed
            let _ = wait.await;
            self.wait = None;
        }
    }

    /// Let the next turn proceed.
    pub fn pass(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }

    /// Wait for this turn and pass it on without doing anything.
    pub async fn hand_off(mut self) {
        self.wait().await;
        self.pass();
    }
}
