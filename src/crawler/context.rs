use async_trait::async_trait;
use serde::Serialize;

use crate::storage::ScraperConfig;

/// Counters reported by an execution context when a job finishes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub records_found: usize,
    pub records_written: usize,
    pub submitted: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Per-source scraping logic executed inside a job process
#[async_trait]
pub trait ExecutionContext: Send {
    async fn run(&mut self) -> anyhow::Result<RunSummary>;
}

/// Builds the execution context for a job from its config snapshot
#[async_trait]
pub trait ContextFactory: Send + Sync {
    async fn create(
        &self,
        job_id: &str,
        snapshot: ScraperConfig,
    ) -> anyhow::Result<Box<dyn ExecutionContext>>;
}
