use crate::geometry::GeometryService;
use crate::models::JobArgument;
use crate::utils::workspace::Heartbeat;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

/// Decides whether a dispatched batch produced every result it owes.
pub struct CompletionTracker {
    engine: Arc<dyn GeometryService>,
}

impl CompletionTracker {
    pub fn new(engine: Arc<dyn GeometryService>) -> Self {
        Self { engine }
    }

    /// The result table exists and carries the job's field.
    pub fn is_complete(&self, job: &JobArgument) -> bool {
        if !job.result_table.exists() {
            return false;
        }
        match self.engine.list_fields(&job.result_table) {
            Ok(fields) => fields.iter().any(|f| *f == job.field_name()),
            Err(e) => {
                debug!(job = %job.key, error = %e, "result table unreadable");
                false
            }
        }
    }

    pub fn pending<'a>(&self, jobs: &'a [JobArgument]) -> Vec<&'a JobArgument> {
        jobs.iter().filter(|job| !self.is_complete(job)).collect()
    }

    /// All-or-nothing: a batch with any missing result is not ready.
    pub fn is_ready(&self, jobs: &[JobArgument]) -> bool {
        jobs.iter().all(|job| self.is_complete(job))
    }
}

/// How waiting on a batch ended.
#[derive(Debug)]
pub enum BatchWait<T> {
    Finished(Result<T, JoinError>),
    /// The heartbeat went quiet; the handle is returned so the caller can cancel and join it
    Stalled(JoinHandle<T>),
}

/// Wait for a batch, polling the heartbeat every `poll`.
///
/// Gives up once the heartbeat has been idle for longer than `inactivity`.
pub async fn wait_for_batch<T>(
    mut handle: JoinHandle<T>,
    heartbeat: &Heartbeat,
    poll: Duration,
    inactivity: Duration,
) -> BatchWait<T> {
    loop {
        match tokio::time::timeout(poll, &mut handle).await {
            Ok(result) => return BatchWait::Finished(result),
            Err(_) => {
                let idle = heartbeat.idle_for();
                debug!(idle_secs = idle.as_secs(), "batch still running");
                if idle > inactivity {
                    return BatchWait::Stalled(handle);
                }
            }
        }
    }
}
