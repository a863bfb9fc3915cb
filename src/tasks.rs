//! Fire-and-forget work owned by the gateway rather than the request
//!
//! Async hooks and circuit-breaker recordings must finish even when the
//! client disconnects and the request future is dropped. They are spawned
//! here and tracked so shutdown (and tests) can wait for them to drain.

use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::metrics::{self, BackgroundTask, Metrics};

#[derive(Clone)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    metrics: Arc<Metrics>,
}

impl BackgroundTasks {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            metrics,
        }
    }

    /// Spawn a task that outlives the calling request
    ///
    /// Panics inside the task are caught, logged and counted.
    pub fn spawn<F>(&self, task: BackgroundTask, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let metrics = self.metrics.clone();
        let handle = tokio::spawn(async move {
            if AssertUnwindSafe(future).catch_unwind().await.is_err() {
                tracing::error!(task = task.as_str(), "Background task panicked");
                if let Err(e) = metrics.record_background_task_failure(task) {
                    metrics::log_recording_failure("record_background_task_failure", e);
                }
            }
        });

        let mut handles = self.handles.lock();
        handles.retain(|handle| !handle.is_finished());
        handles.push(handle);
    }

    /// Number of tasks that have not finished yet
    pub fn pending(&self) -> usize {
        let mut handles = self.handles.lock();
        handles.retain(|handle| !handle.is_finished());
        handles.len()
    }

    /// Wait until every spawned task, including ones spawned while waiting, has finished
    pub async fn wait_idle(&self) {
        loop {
            let drained = std::mem::take(&mut *self.handles.lock());
            if drained.is_empty() {
                return;
            }
            for handle in drained {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "Background task did not complete");
                }
            }
        }
    }
}
