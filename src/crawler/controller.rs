use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, info, warn};

use super::context::{ContextFactory, RunSummary};
use super::task::JobDescriptor;
use crate::error::{HarvestError, HarvestResult};
use crate::storage::{Database, ProcessStatus, ScraperConfig};

/// How a job process ended, as reported to its own process record
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunSummary),
    Failed(String),
    /// The record had already ended (usually stopped) before the run began
    Skipped(ProcessStatus),
}

/// Executes one job descriptor inside a job process.
///
/// Nothing raised by the execution context escapes `run_descriptor`: errors
/// and panics are logged at fatal level and the record is marked failed.
pub struct JobRunner {
    db: Database,
    factory: Arc<dyn ContextFactory>,
}

impl JobRunner {
    pub fn new(db: Database, factory: Arc<dyn ContextFactory>) -> Self {
        Self { db, factory }
    }

    pub async fn run_descriptor(&self, path: &Path) -> RunOutcome {
        let (job_id, snapshot) = match Self::load(path).await {
            Ok(loaded) => loaded,
            Err((job_id, e)) => {
                let message = format!("ConfigurationError: {}", e);
                let job_id = job_id.unwrap_or_else(|| path.display().to_string());
                self.db.logger().fatal(&job_id, &message).await;
                self.finish(&job_id, ProcessStatus::Failed, &message).await;
                return RunOutcome::Failed(message);
            }
        };

        match self.db.processes().get(&job_id).await {
            Ok(process) if process.status.is_terminal() => {
                info!("Job {} is already {}, not running it", job_id, process.status);
                return RunOutcome::Skipped(process.status);
            }
            Ok(_) => {}
            Err(e) => warn!("Could not read the record of job {}: {}", job_id, e),
        }

        info!("Running job {} for config {}", job_id, snapshot.id);

        let result = AssertUnwindSafe(self.execute(&job_id, snapshot))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(summary)) => {
                let detail = format!(
                    "records={} submitted={} failed={} skipped={}",
                    summary.records_found, summary.submitted, summary.failed, summary.skipped
                );
                self.finish(&job_id, ProcessStatus::Completed, &detail).await;
                RunOutcome::Completed(summary)
            }
            Ok(Err(e)) => {
                let message = format!("Job failed: {}", e);
                self.db
                    .logger()
                    .fatal(&job_id, &format!("{}\n{:?}", message, e))
                    .await;
                self.finish(&job_id, ProcessStatus::Failed, &message).await;
                RunOutcome::Failed(message)
            }
            Err(panic) => {
                let message = format!("Job panicked: {}", panic_message(panic.as_ref()));
                let trace = std::backtrace::Backtrace::force_capture();
                self.db
                    .logger()
                    .fatal(&job_id, &format!("{}\n{}", message, trace))
                    .await;
                self.finish(&job_id, ProcessStatus::Failed, &message).await;
                RunOutcome::Failed(message)
            }
        }
    }

    /// Read and decode a descriptor. Errors carry the job id when it could be recovered.
    async fn load(path: &Path) -> Result<(String, ScraperConfig), (Option<String>, HarvestError)> {
        let descriptor = JobDescriptor::read_from(path)
            .await
            .map_err(|e| (JobDescriptor::job_id_from_path(path), e))?;

        match descriptor.snapshot() {
            Ok(snapshot) => Ok((descriptor.job_id, snapshot)),
            Err(e) => Err((Some(descriptor.job_id), e)),
        }
    }

    async fn execute(&self, job_id: &str, snapshot: ScraperConfig) -> anyhow::Result<RunSummary> {
        let mut context = self.factory.create(job_id, snapshot).await?;
        context.run().await
    }

    async fn finish(&self, job_id: &str, status: ProcessStatus, detail: &str) {
        let result: HarvestResult<bool> = self.db.processes().finish(job_id, status, Some(detail)).await;
        match result {
            Ok(true) => debug!("Job {} marked {}", job_id, status),
            Ok(false) => debug!("Job {} already terminal, keeping its status", job_id),
            Err(e) => tracing::error!("Failed to record final status of job {}: {}", job_id, e),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
