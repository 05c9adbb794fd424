use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{debug, error, info, warn};

use crate::error::HarvestResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LogEntry {
    pub job_id: String,
    pub logged_at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Append-only per-job log sink.
///
/// Every entry is persisted and mirrored to `tracing`. The convenience
/// helpers never fail: a storage error is reported through `tracing` and
/// the job carries on.
#[derive(Clone)]
pub struct JobLogger {
    pool: Pool<Sqlite>,
}

impl JobLogger {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn append(&self, job_id: &str, level: LogLevel, message: &str) -> HarvestResult<()> {
        self.append_entry(&LogEntry {
            job_id: job_id.to_string(),
            logged_at: Utc::now(),
            level,
            message: message.to_string(),
        })
        .await
    }

    pub async fn append_entry(&self, entry: &LogEntry) -> HarvestResult<()> {
        match entry.level {
            LogLevel::Debug => debug!(job_id = %entry.job_id, "{}", entry.message),
            LogLevel::Info => info!(job_id = %entry.job_id, "{}", entry.message),
            LogLevel::Warning => warn!(job_id = %entry.job_id, "{}", entry.message),
            LogLevel::Error | LogLevel::Fatal => {
                error!(job_id = %entry.job_id, level = ?entry.level, "{}", entry.message)
            }
        }

        sqlx::query("INSERT INTO job_logs (job_id, logged_at, level, message) VALUES (?, ?, ?, ?)")
            .bind(&entry.job_id)
            .bind(entry.logged_at)
            .bind(entry.level)
            .bind(&entry.message)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn log(&self, job_id: &str, level: LogLevel, message: &str) {
        if let Err(e) = self.append(job_id, level, message).await {
            error!(job_id = %job_id, "Failed to persist job log entry: {}", e);
        }
    }

    pub async fn info(&self, job_id: &str, message: &str) {
        self.log(job_id, LogLevel::Info, message).await
    }

    pub async fn warning(&self, job_id: &str, message: &str) {
        self.log(job_id, LogLevel::Warning, message).await
    }

    pub async fn error(&self, job_id: &str, message: &str) {
        self.log(job_id, LogLevel::Error, message).await
    }

    pub async fn fatal(&self, job_id: &str, message: &str) {
        self.log(job_id, LogLevel::Fatal, message).await
    }

    /// The most recent `limit` entries of a job, oldest first
    pub async fn recent(&self, job_id: &str, limit: u32) -> HarvestResult<Vec<LogEntry>> {
        let mut entries = sqlx::query_as::<_, LogEntry>(
            "SELECT job_id, logged_at, level, message FROM job_logs
             WHERE job_id = ? ORDER BY logged_at DESC, id DESC LIMIT ?",
        )
        .bind(job_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        entries.reverse();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use chrono::Duration;

    fn entry(job_id: &str, at: DateTime<Utc>, message: &str) -> LogEntry {
        LogEntry {
            job_id: job_id.to_string(),
            logged_at: at,
            level: LogLevel::Info,
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_recent_is_oldest_first_regardless_of_insert_order() {
        let db = Database::in_memory().await;
        let logger = db.logger();
        let base = Utc::now();

        for (offset, message) in [(3, "d"), (0, "a"), (2, "c"), (1, "b")] {
            logger
                .append_entry(&entry("job", base + Duration::seconds(offset), message))
                .await
                .unwrap();
        }

        let entries = logger.recent("job", 10).await.unwrap();
        let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["a", "b", "c", "d"]);
        assert!(entries.windows(2).all(|w| w[0].logged_at <= w[1].logged_at));
    }

    #[tokio::test]
    async fn test_recent_keeps_latest_entries() {
        let db = Database::in_memory().await;
        let logger = db.logger();
        let base = Utc::now();

        for i in 0..5 {
            logger
                .append_entry(&entry("job", base + Duration::seconds(i), &format!("m{}", i)))
                .await
                .unwrap();
        }
        logger.info("other-job", "unrelated").await;

        let entries = logger.recent("job", 2).await.unwrap();
        let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn test_levels_round_trip() {
        let db = Database::in_memory().await;
        let logger = db.logger();

        logger.fatal("job", "crashed").await;
        let entries = logger.recent("job", 1).await.unwrap();
        assert_eq!(entries[0].level, LogLevel::Fatal);
        assert_eq!(entries[0].message, "crashed");
    }
}
