use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::debug;

use crate::error::{HarvestError, HarvestResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ProcessStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// One scraping run, bound to the config snapshot it was launched with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScraperProcess {
    pub job_id: String,
    pub config_id: i64,
    pub pid: Option<i64>,
    pub status: ProcessStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_detail: Option<String>,
}

/// Repository for job process records
#[derive(Clone)]
pub struct ProcessRepository {
    pool: Pool<Sqlite>,
}

impl ProcessRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Insert a fresh record in `starting`
    pub async fn create(&self, job_id: &str, config_id: i64) -> HarvestResult<ScraperProcess> {
        let process = ScraperProcess {
            job_id: job_id.to_string(),
            config_id,
            pid: None,
            status: ProcessStatus::Starting,
            started_at: Utc::now(),
            ended_at: None,
            exit_detail: None,
        };

        sqlx::query(
            "INSERT INTO scraper_processes (job_id, config_id, pid, status, started_at, ended_at, exit_detail)
             VALUES (?, ?, NULL, ?, ?, NULL, NULL)",
        )
        .bind(&process.job_id)
        .bind(process.config_id)
        .bind(process.status)
        .bind(process.started_at)
        .execute(&self.pool)
        .await?;

        debug!("Created process record for job {}", job_id);
        Ok(process)
    }

    pub async fn get(&self, job_id: &str) -> HarvestResult<ScraperProcess> {
        sqlx::query_as::<_, ScraperProcess>("SELECT * FROM scraper_processes WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| HarvestError::not_found("process", job_id))
    }

    /// Record the OS pid and move `starting` to `running`
    pub async fn mark_running(&self, job_id: &str, pid: u32) -> HarvestResult<bool> {
        let result = sqlx::query(
            "UPDATE scraper_processes SET pid = ?, status = ? WHERE job_id = ? AND status = ?",
        )
        .bind(i64::from(pid))
        .bind(ProcessStatus::Running)
        .bind(job_id)
        .bind(ProcessStatus::Starting)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a live record to a terminal state.
    ///
    /// Terminal states are sticky: returns false when the record had already ended.
    pub async fn finish(
        &self,
        job_id: &str,
        status: ProcessStatus,
        detail: Option<&str>,
    ) -> HarvestResult<bool> {
        debug_assert!(status.is_terminal());

        let result = sqlx::query(
            "UPDATE scraper_processes SET status = ?, ended_at = ?, exit_detail = ?
             WHERE job_id = ? AND status IN ('starting', 'running')",
        )
        .bind(status)
        .bind(Utc::now())
        .bind(detail)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All records not yet in a terminal state, oldest first
    pub async fn list_active(&self) -> HarvestResult<Vec<ScraperProcess>> {
        let rows = sqlx::query_as::<_, ScraperProcess>(
            "SELECT * FROM scraper_processes WHERE status IN ('starting', 'running') ORDER BY started_at, job_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[tokio::test]
    async fn test_lifecycle() {
        let db = Database::in_memory().await;
        let repo = db.processes();

        let created = repo.create("job-1", 3).await.unwrap();
        assert_eq!(created.status, ProcessStatus::Starting);

        assert!(repo.mark_running("job-1", 4242).await.unwrap());
        let running = repo.get("job-1").await.unwrap();
        assert_eq!(running.status, ProcessStatus::Running);
        assert_eq!(running.pid, Some(4242));

        assert!(repo.finish("job-1", ProcessStatus::Completed, None).await.unwrap());
        let done = repo.get("job-1").await.unwrap();
        assert_eq!(done.status, ProcessStatus::Completed);
        assert!(done.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_states_are_sticky() {
        let db = Database::in_memory().await;
        let repo = db.processes();

        repo.create("job-2", 1).await.unwrap();
        repo.mark_running("job-2", 10).await.unwrap();
        assert!(repo.finish("job-2", ProcessStatus::Stopped, Some("stopped by operator")).await.unwrap());
        assert!(!repo.finish("job-2", ProcessStatus::Completed, None).await.unwrap());

        let record = repo.get("job-2").await.unwrap();
        assert_eq!(record.status, ProcessStatus::Stopped);
        assert_eq!(record.exit_detail.as_deref(), Some("stopped by operator"));
    }

    #[tokio::test]
    async fn test_list_active_excludes_terminal() {
        let db = Database::in_memory().await;
        let repo = db.processes();

        repo.create("a", 1).await.unwrap();
        repo.create("b", 1).await.unwrap();
        repo.create("c", 2).await.unwrap();
        repo.finish("b", ProcessStatus::Failed, Some("boom")).await.unwrap();

        let active: Vec<_> = repo
            .list_active()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.job_id)
            .collect();
        assert_eq!(active.len(), 2);
        assert!(active.contains(&"a".to_string()));
        assert!(active.contains(&"c".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let db = Database::in_memory().await;
        assert!(db.processes().get("missing").await.unwrap_err().is_not_found());
    }
}
