//! Tracked background tasks.
//!
//! Cache writes run after the response has been handed back, but they are
//! never detached: every task lives in a shared `JoinSet` until it finishes,
//! and [`BackgroundWrites::drain`] is the join point the daemon awaits before
//! exiting. Dropping the last handle aborts whatever is still running.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Handle to the set of outstanding background writes. Cheap to clone.
#[derive(Clone, Default)]
pub struct BackgroundWrites {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `task` in the background. Must be called within a tokio runtime.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.lock();
        // reap finished tasks so the set doesn't grow with traffic
        while let Some(done) = tasks.try_join_next() {
            log_failure(done);
        }
        tasks.spawn(task);
    }

    /// Tasks spawned and not yet reaped (finished ones count until the next
    /// `spawn` or `drain`).
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Wait until every write spawned so far, and any spawned meanwhile, has
    /// finished.
    pub async fn drain(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                return;
            }
            debug!(pending = batch.len(), "draining background writes");
            while let Some(done) = batch.join_next().await {
                log_failure(done);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log_failure(done: Result<(), tokio::task::JoinError>) {
    if let Err(e) = done {
        warn!(error = %e, "background write failed");
    }
}
