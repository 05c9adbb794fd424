use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::spawner::JobSpawner;
use super::task::JobDescriptor;
use crate::error::{HarvestError, HarvestResult};
use crate::storage::configs::ConfigSummary;
use crate::storage::{
    ConfigFilter, Database, LogEntry, NewScraperConfig, ProcessStatus, ScraperConfig, ScraperProcess,
};

pub const DEFAULT_LOG_LIMIT: u32 = 100;
const VANISHED_DETAIL: &str = "process exited without reporting a status";

/// Returned by `start_scraper` once the job process is running
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartedJob {
    pub job_id: String,
    pub pid: u32,
}

/// Result of a stop request; unknown and finished jobs are not errors
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopOutcome {
    pub job_id: String,
    /// Whether this call moved the job to `stopped`
    pub stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProcessStatus>,
    pub message: String,
}

/// Process record plus the name of the config it was started from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessDetails {
    #[serde(flatten)]
    pub process: ScraperProcess,
    pub config_name: Option<String>,
}

/// Launches job processes and answers queries about them.
///
/// State lives only in the database; job processes update their own
/// records, and the scheduler reconciles records whose process vanished.
pub struct JobScheduler {
    db: Database,
    spawner: Arc<dyn JobSpawner>,
    jobs_dir: PathBuf,
}

impl JobScheduler {
    pub fn new(db: Database, spawner: Arc<dyn JobSpawner>, jobs_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            spawner,
            jobs_dir: jobs_dir.into(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn list_configs(&self, filter: &ConfigFilter) -> HarvestResult<Vec<ConfigSummary>> {
        self.db.configs().list(filter).await
    }

    pub async fn get_config(&self, id: i64) -> HarvestResult<ScraperConfig> {
        self.db.configs().get(id).await
    }

    pub async fn create_config(&self, new: &NewScraperConfig) -> HarvestResult<ScraperConfig> {
        let config = self.db.configs().create(new).await?;
        info!("Created config {} ({})", config.id, config.name);
        Ok(config)
    }

    pub async fn delete_config(&self, id: i64) -> HarvestResult<()> {
        self.db.configs().delete(id).await?;
        info!("Deleted config {}", id);
        Ok(())
    }

    pub async fn duplicate_config(&self, id: i64) -> HarvestResult<ScraperConfig> {
        let copy = self.db.configs().duplicate(id).await?;
        info!("Duplicated config {} as {}", id, copy.id);
        Ok(copy)
    }

    /// Snapshot the config, persist its descriptor and launch a detached job process.
    ///
    /// Inactive configs may be started. Returns as soon as the process is running.
    pub async fn start_scraper(&self, config_id: i64) -> HarvestResult<StartedJob> {
        let config = self.db.configs().get(config_id).await?;
        let job_id = Uuid::new_v4().to_string();

        let processes = self.db.processes();
        processes.create(&job_id, config.id).await?;

        let launched = self.launch(&job_id, &config).await;
        let pid = match launched {
            Ok(pid) => pid,
            Err(e) => {
                let detail = format!("failed to launch job: {}", e);
                if let Err(mark_err) = processes.finish(&job_id, ProcessStatus::Failed, Some(&detail)).await {
                    warn!("Could not mark job {} failed: {}", job_id, mark_err);
                }
                self.db.logger().error(&job_id, &detail).await;
                return Err(match e {
                    HarvestError::Spawn(_) => e,
                    other => HarvestError::Spawn(other.to_string()),
                });
            }
        };

        self.record_launch(&job_id, &config, pid).await;
        Ok(StartedJob { job_id, pid })
    }

    /// Bookkeeping after a successful spawn. The process is already running,
    /// so failures here are logged rather than returned.
    async fn record_launch(&self, job_id: &str, config: &ScraperConfig, pid: u32) {
        let processes = self.db.processes();
        match processes.mark_running(job_id, pid).await {
            Ok(true) => {}
            Ok(false) => match processes.get(job_id).await {
                // Stopped before the pid was known; the signal was never sent
                Ok(process) if process.status == ProcessStatus::Stopped => {
                    info!("Job {} was stopped while starting, terminating pid {}", job_id, pid);
                    if let Err(e) = self.spawner.terminate(pid) {
                        warn!("Could not terminate pid {} of stopped job {}: {}", pid, job_id, e);
                    }
                }
                Ok(_) => debug!("Job {} reported before it was marked running", job_id),
                Err(e) => warn!("Could not re-read job {}: {}", job_id, e),
            },
            Err(e) => warn!("Could not mark job {} running as pid {}: {}", job_id, pid, e),
        }

        if let Err(e) = self.db.configs().touch_last_run(config.id, Utc::now()).await {
            warn!("Could not record last run of config {}: {}", config.id, e);
        }
        self.db
            .logger()
            .info(job_id, &format!("Started config {} ({}) as pid {}", config.id, config.name, pid))
            .await;
    }

    async fn launch(&self, job_id: &str, config: &ScraperConfig) -> HarvestResult<u32> {
        let descriptor = JobDescriptor::new(job_id, config)?;
        let path = descriptor.write_to(&self.jobs_dir).await?;
        self.spawner.spawn(job_id, &path).await
    }

    /// Signal a job's process and mark it stopped. Idempotent.
    ///
    /// A job still `starting` has no pid yet; it is marked stopped here and
    /// `record_launch` terminates the process once the spawn returns.
    pub async fn stop_scraper(&self, job_id: &str) -> HarvestResult<StopOutcome> {
        let processes = self.db.processes();

        let process = match processes.get(job_id).await {
            Ok(process) => process,
            Err(e) if e.is_not_found() => {
                return Ok(StopOutcome {
                    job_id: job_id.to_string(),
                    stopped: false,
                    status: None,
                    message: format!("No job {}", job_id),
                })
            }
            Err(e) => return Err(e),
        };

        if process.status.is_terminal() {
            return Ok(StopOutcome {
                job_id: job_id.to_string(),
                stopped: false,
                status: Some(process.status),
                message: format!("Job already {}", process.status),
            });
        }

        if let Some(pid) = process.pid.and_then(|pid| u32::try_from(pid).ok()) {
            self.spawner.terminate(pid)?;
        }

        let stopped = processes
            .finish(job_id, ProcessStatus::Stopped, Some("stopped by operator"))
            .await?;

        if stopped {
            self.db.logger().warning(job_id, "Stopped by operator").await;
            return Ok(StopOutcome {
                job_id: job_id.to_string(),
                stopped: true,
                status: Some(ProcessStatus::Stopped),
                message: "Job stopped".to_string(),
            });
        }

        // The job finished between our read and the update
        let current = processes.get(job_id).await?;
        Ok(StopOutcome {
            job_id: job_id.to_string(),
            stopped: false,
            status: Some(current.status),
            message: format!("Job already {}", current.status),
        })
    }

    pub async fn get_process(&self, job_id: &str) -> HarvestResult<ScraperProcess> {
        let process = self.db.processes().get(job_id).await?;
        self.reconcile(process).await
    }

    pub async fn get_process_details(&self, job_id: &str) -> HarvestResult<ProcessDetails> {
        let process = self.get_process(job_id).await?;

        let config_name = match self.db.configs().get(process.config_id).await {
            Ok(config) => Some(config.name),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        Ok(ProcessDetails { process, config_name })
    }

    /// Every non-terminal record whose process is still alive
    pub async fn get_running_processes(&self) -> HarvestResult<Vec<ScraperProcess>> {
        let mut running = Vec::new();
        for process in self.db.processes().list_active().await? {
            let process = self.reconcile(process).await?;
            if !process.status.is_terminal() {
                running.push(process);
            }
        }
        Ok(running)
    }

    /// Most recent `limit` entries, oldest first
    pub async fn get_process_logs(&self, job_id: &str, limit: u32) -> HarvestResult<Vec<LogEntry>> {
        self.db.processes().get(job_id).await?;
        self.db.logger().recent(job_id, limit).await
    }

    /// Mark a live record failed when its process is gone without having reported
    async fn reconcile(&self, process: ScraperProcess) -> HarvestResult<ScraperProcess> {
        if process.status.is_terminal() {
            return Ok(process);
        }

        let Some(pid) = process.pid.and_then(|pid| u32::try_from(pid).ok()) else {
            return Ok(process);
        };

        if self.spawner.is_alive(pid) {
            return Ok(process);
        }

        let processes = self.db.processes();
        if processes
            .finish(&process.job_id, ProcessStatus::Failed, Some(VANISHED_DETAIL))
            .await?
        {
            warn!("Job {} (pid {}) {}", process.job_id, pid, VANISHED_DETAIL);
            self.db.logger().error(&process.job_id, VANISHED_DETAIL).await;
        }

        processes.get(&process.job_id).await
    }
}
