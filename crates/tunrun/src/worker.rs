//! Bounded pool of tokio tasks for invocation work.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self { permits: Arc::new(Semaphore::new(max_workers.max(1))) }
    }

    /// Waits for a free worker slot, then runs `work` on its own task.
    ///
    /// Callers queue here rather than as spawned tasks, so at most `max_workers`
    /// tasks exist at once. The slot is held until `work` completes (or unwinds).
    /// Yields `None` only if the pool has been shut down.
    pub async fn spawn<F, T>(&self, work: F) -> Option<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.permits.clone().acquire_owned().await.ok()?;
        Some(tokio::spawn(async move {
            let _permit = permit;
            work.await
        }))
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
