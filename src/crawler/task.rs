use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HarvestError, HarvestResult};
use crate::storage::ScraperConfig;

const DESCRIPTOR_SUFFIX: &str = ".job.json";

/// Hand-off unit between the scheduler and a job process.
///
/// Carries the job id and a base64-encoded JSON snapshot of the config as it
/// was at launch; later edits to the config never reach a running job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: String,
    pub payload: String,
}

impl JobDescriptor {
    pub fn new(job_id: &str, config: &ScraperConfig) -> HarvestResult<Self> {
        let json = serde_json::to_vec(config)
            .map_err(|e| HarvestError::Configuration(format!("failed to serialize config snapshot: {}", e)))?;

        Ok(Self {
            job_id: job_id.to_string(),
            payload: STANDARD.encode(json),
        })
    }

    /// Decode the embedded config snapshot
    pub fn snapshot(&self) -> HarvestResult<ScraperConfig> {
        let bytes = STANDARD
            .decode(self.payload.trim())
            .map_err(|e| HarvestError::Configuration(format!("snapshot is not valid base64: {}", e)))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| HarvestError::Configuration(format!("snapshot is not a valid config: {}", e)))
    }

    pub fn path_in(dir: &Path, job_id: &str) -> PathBuf {
        dir.join(format!("{}{}", job_id, DESCRIPTOR_SUFFIX))
    }

    /// Job id encoded in a descriptor file name, if it follows the naming scheme
    pub fn job_id_from_path(path: &Path) -> Option<String> {
        path.file_name()?
            .to_str()?
            .strip_suffix(DESCRIPTOR_SUFFIX)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    /// Persist the descriptor under `dir`, returning its path
    pub async fn write_to(&self, dir: &Path) -> HarvestResult<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = Self::path_in(dir, &self.job_id);
        let contents = serde_json::to_vec_pretty(self)
            .map_err(|e| HarvestError::Configuration(format!("failed to serialize descriptor: {}", e)))?;

        tokio::fs::write(&path, contents).await?;
        debug!("Wrote job descriptor: {}", path.display());

        Ok(path)
    }

    pub async fn read_from(path: &Path) -> HarvestResult<Self> {
        let contents = tokio::fs::read(path).await?;
        serde_json::from_slice(&contents)
            .map_err(|e| HarvestError::Configuration(format!("descriptor is not valid JSON: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::configs::tests::website_config;
    use crate::storage::Database;

    #[tokio::test]
    async fn test_snapshot_survives_descriptor_file() {
        let db = Database::in_memory().await;
        let config = db.configs().create(&website_config("Snapshot")).await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let descriptor = JobDescriptor::new("job-42", &config).unwrap();
        let path = descriptor.write_to(dir.path()).await.unwrap();
        assert_eq!(JobDescriptor::job_id_from_path(&path).as_deref(), Some("job-42"));

        let loaded = JobDescriptor::read_from(&path).await.unwrap();
        assert_eq!(loaded.job_id, "job-42");
        assert_eq!(loaded.snapshot().unwrap(), config);
    }

    #[test]
    fn test_bad_payloads_are_configuration_errors() {
        let not_base64 = JobDescriptor {
            job_id: "j".to_string(),
            payload: "%%%".to_string(),
        };
        assert!(matches!(not_base64.snapshot(), Err(HarvestError::Configuration(_))));

        let not_config = JobDescriptor {
            job_id: "j".to_string(),
            payload: STANDARD.encode(b"{\"name\": 5}"),
        };
        assert!(matches!(not_config.snapshot(), Err(HarvestError::Configuration(_))));
    }

    #[test]
    fn test_job_id_from_path() {
        assert_eq!(
            JobDescriptor::job_id_from_path(Path::new("/tmp/jobs/abc.job.json")).as_deref(),
            Some("abc")
        );
        assert!(JobDescriptor::job_id_from_path(Path::new("/tmp/jobs/abc.json")).is_none());
    }
}
