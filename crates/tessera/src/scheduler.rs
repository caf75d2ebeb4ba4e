use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl JobError {
    pub fn failed(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Failed(Box::new(cause))
    }
}

/// A unit of repeatable work. `execute` reports whether backlog remains; the
/// scheduler drains backlog by re-running the job without waiting for the
/// next tick.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn execute(&self) -> Result<bool, JobError>;
}

/// Runs jobs on a repeating schedule.
///
/// Each run is bounded by `timeout`; a run that exceeds it is cancelled and
/// the job goes back to waiting for the next tick. Failed runs are logged and
/// retried on the next tick as well.
#[derive(Debug, Clone, Default)]
pub struct Scheduler;

impl Scheduler {
    pub fn new() -> Self {
        Self
    }

    pub fn schedule_many_times(
        &self,
        repeat_schedule: Duration,
        timeout: Duration,
        job: Arc<dyn Job>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match tokio::time::timeout(timeout, job.execute()).await {
                    Ok(Ok(true)) => continue,
                    Ok(Ok(false)) => {}
                    Ok(Err(err)) => {
                        warn!(job = job.name(), error = %err, "job failed; retrying on next tick");
                    }
                    Err(_) => {
                        warn!(
                            job = job.name(),
                            timeout_ms = timeout.as_millis() as u64,
                            "job timed out; retrying on next tick"
                        );
                    }
                }
                tokio::time::sleep(repeat_schedule).await;
            }
        })
    }
}
