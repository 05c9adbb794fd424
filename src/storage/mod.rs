pub mod configs;
pub mod logs;
pub mod processes;
pub mod settings;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::debug;

// Re-export common types
pub use configs::{ConfigFilter, ConfigRepository, ConfigStatus, NewScraperConfig, ScraperConfig, SourceKind};
pub use logs::{JobLogger, LogEntry, LogLevel};
pub use processes::{ProcessRepository, ProcessStatus, ScraperProcess};
pub use settings::SettingsStore;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS scraper_configs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        source_kind TEXT NOT NULL,
        website_url TEXT,
        url_pattern TEXT,
        page_start INTEGER,
        page_end INTEGER,
        page_count INTEGER,
        xml_link TEXT,
        max_properties INTEGER,
        enable_upload BOOLEAN NOT NULL DEFAULT 0,
        testing_mode BOOLEAN NOT NULL DEFAULT 0,
        output_folder TEXT,
        output_filename TEXT,
        adapter_path TEXT,
        owned_by TEXT,
        contact_person TEXT,
        phone TEXT,
        email TEXT,
        listing_id_prefix TEXT,
        status TEXT NOT NULL DEFAULT 'active',
        last_run_at TIMESTAMP,
        created_by TEXT,
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS scraper_processes (
        job_id TEXT PRIMARY KEY,
        config_id INTEGER NOT NULL,
        pid INTEGER,
        status TEXT NOT NULL,
        started_at TIMESTAMP NOT NULL,
        ended_at TIMESTAMP,
        exit_detail TEXT
    )",
    "CREATE TABLE IF NOT EXISTS job_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL,
        logged_at TIMESTAMP NOT NULL,
        level TEXT NOT NULL,
        message TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_job_logs_job ON job_logs (job_id, logged_at)",
    "CREATE TABLE IF NOT EXISTS settings (
        category TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (category, key)
    )",
];

/// Handle on the shared store used by the scheduler, the control API and every job process
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to the store and make sure every table exists
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .context(format!("Invalid database url: {}", url))?
            .create_if_missing(true);

        let filename = options.clone().get_filename();
        if let Some(parent) = filename.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context(format!("Failed to create database directory: {}", parent.display()))?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context(format!("Failed to connect to database: {}", url))?;

        let db = Self { pool };
        db.ensure_schema().await?;
        debug!("Connected to database: {}", url);

        Ok(db)
    }

    /// Private in-memory store, used by tests
    #[cfg(test)]
    pub async fn in_memory() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        let db = Self { pool };
        db.ensure_schema().await.expect("schema");
        db
    }

    async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to create schema")?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn configs(&self) -> ConfigRepository {
        ConfigRepository::new(self.pool.clone())
    }

    pub fn processes(&self) -> ProcessRepository {
        ProcessRepository::new(self.pool.clone())
    }

    pub fn logger(&self) -> JobLogger {
        JobLogger::new(self.pool.clone())
    }

    pub fn settings(&self) -> SettingsStore {
        SettingsStore::new(self.pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_creates_file_store_and_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("harvester.db");
        let url = format!("sqlite://{}", path.display());

        let db = Database::connect(&url).await.unwrap();
        assert!(path.exists());
        assert!(db.configs().list(&ConfigFilter::default()).await.unwrap().is_empty());

        // Reconnecting to an existing store keeps the schema intact
        let again = Database::connect(&url).await.unwrap();
        assert!(again.processes().get("missing").await.is_err());
    }
}
