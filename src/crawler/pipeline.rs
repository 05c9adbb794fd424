use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::context::{ContextFactory, ExecutionContext, RunSummary};
use super::extract::{extract_json_ld, extract_xml_records};
use crate::cli::config::ApiSettings;
use crate::delivery::{ApiClientConfig, DeliveryClient};
use crate::storage::{Database, JobLogger, ScraperConfig, SourceKind};

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const USER_AGENT: &str = concat!("listing-harvester/", env!("CARGO_PKG_VERSION"));

/// Fields that may carry a listing's source identifier
const ID_FIELDS: &[&str] = &["listing_id", "id", "reference", "identifier", "sku"];

/// Generic execution context: collect records, cap, tag, write, deliver
pub struct ListingPipeline {
    job_id: String,
    config: ScraperConfig,
    logger: JobLogger,
    delivery: DeliveryClient,
    fetcher: Client,
}

impl ListingPipeline {
    pub fn new(job_id: &str, config: ScraperConfig, logger: JobLogger, delivery: DeliveryClient) -> Result<Self> {
        let fetcher = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build page fetcher")?;

        Ok(Self {
            job_id: job_id.to_string(),
            config,
            logger,
            delivery,
            fetcher,
        })
    }

    fn cap(&self) -> Option<usize> {
        self.config
            .max_properties
            .filter(|cap| *cap > 0)
            .map(|cap| cap as usize)
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .fetcher
            .get(url)
            .send()
            .await
            .context(format!("Failed to fetch {}", url))?
            .error_for_status()
            .context(format!("Bad response from {}", url))?;

        response
            .text()
            .await
            .context(format!("Failed to read body of {}", url))
    }

    async fn collect_website(&self, summary: &mut RunSummary) -> Vec<Value> {
        let mut records = Vec::new();

        for url in self.config.page_urls() {
            if self.cap().map_or(false, |cap| records.len() >= cap) {
                break;
            }

            match self.fetch_text(&url).await {
                Ok(html) => {
                    summary.pages_fetched += 1;
                    let found = extract_json_ld(&html);
                    self.logger
                        .info(&self.job_id, &format!("Page {} yielded {} listings", url, found.len()))
                        .await;

                    for mut record in found {
                        if let Value::Object(object) = &mut record {
                            object
                                .entry("source_url")
                                .or_insert_with(|| Value::String(url.clone()));
                        }
                        records.push(record);
                    }
                }
                Err(e) => {
                    summary.pages_failed += 1;
                    self.logger
                        .warning(&self.job_id, &format!("Skipping page: {:#}", e))
                        .await;
                }
            }
        }

        records
    }

    async fn collect_xml(&self, summary: &mut RunSummary) -> Result<Vec<Value>> {
        let link = self
            .config
            .xml_link
            .as_deref()
            .context("XML config has no xml_link")?;

        let xml = self.fetch_text(link).await?;
        summary.pages_fetched += 1;

        Ok(extract_xml_records(&xml))
    }

    /// Add owner metadata and the prefixed listing id
    fn tag_record(&self, index: usize, record: &mut Value) {
        let Value::Object(object) = record else {
            return;
        };

        if let Some(prefix) = self.config.listing_id_prefix.as_deref() {
            let source_id = ID_FIELDS
                .iter()
                .find_map(|field| match object.get(*field) {
                    Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                    Some(Value::Number(n)) => Some(n.to_string()),
                    _ => None,
                })
                .unwrap_or_else(|| (index + 1).to_string());

            let listing_id = if source_id.starts_with(prefix) {
                source_id
            } else {
                format!("{}{}", prefix, source_id)
            };
            object.insert("listing_id".to_string(), Value::String(listing_id));
        }

        let owner_fields = [
            ("owned_by", &self.config.owned_by),
            ("contact_person", &self.config.contact_person),
            ("phone", &self.config.phone),
            ("email", &self.config.email),
        ];
        for (key, value) in owner_fields {
            if let Some(value) = value {
                object
                    .entry(key)
                    .or_insert_with(|| Value::String(value.clone()));
            }
        }
    }

    fn output_path(&self) -> Option<PathBuf> {
        match (&self.config.output_folder, &self.config.output_filename) {
            (Some(folder), Some(file)) if !folder.is_empty() && !file.is_empty() => {
                Some(PathBuf::from(folder).join(file))
            }
            _ => None,
        }
    }

    async fn write_output(&self, records: &[Value]) -> Result<bool> {
        let Some(path) = self.output_path() else {
            return Ok(false);
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context(format!("Failed to create output directory: {}", parent.display()))?;
        }

        let contents = serde_json::to_vec_pretty(records).context("Failed to serialize records")?;
        tokio::fs::write(&path, contents)
            .await
            .context(format!("Failed to write output file: {}", path.display()))?;

        self.logger
            .info(&self.job_id, &format!("Wrote {} records to {}", records.len(), path.display()))
            .await;
        Ok(true)
    }

    async fn deliver(&self, records: &[Value], summary: &mut RunSummary) {
        let stats = self.delivery.stats();

        if !self.config.enable_upload {
            self.logger.info(&self.job_id, "Upload disabled; records not sent").await;
            return;
        }

        if self.config.testing_mode {
            for record in records {
                stats.record_skipped().await;
                summary.skipped += 1;
                self.logger
                    .info(
                        &self.job_id,
                        &format!("Testing mode, not uploading {}", listing_label(record)),
                    )
                    .await;
            }
            return;
        }

        for record in records {
            let label = listing_label(record);
            let result = self.delivery.submit_property(record).await;
            stats.record_delivery(result.success).await;

            if result.success {
                summary.submitted += 1;
                self.logger
                    .info(
                        &self.job_id,
                        &format!("Uploaded {} after {} attempt(s)", label, result.attempts),
                    )
                    .await;
            } else {
                summary.failed += 1;
                self.logger
                    .error(
                        &self.job_id,
                        &format!(
                            "Failed to upload {} after {} attempt(s): {}",
                            label,
                            result.attempts,
                            result.error.as_deref().unwrap_or("unknown error")
                        ),
                    )
                    .await;
            }
        }
    }
}

fn listing_label(record: &Value) -> String {
    record
        .get("listing_id")
        .or_else(|| record.get("name"))
        .or_else(|| record.get("title"))
        .and_then(Value::as_str)
        .unwrap_or("<unnamed listing>")
        .to_string()
}

#[async_trait]
impl ExecutionContext for ListingPipeline {
    async fn run(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        self.logger
            .info(
                &self.job_id,
                &format!(
                    "Starting {} job for config {} ({})",
                    self.config.source_kind, self.config.id, self.config.name
                ),
            )
            .await;

        let mut records = match self.config.source_kind {
            SourceKind::Website => self.collect_website(&mut summary).await,
            SourceKind::Xml => self.collect_xml(&mut summary).await?,
        };

        if let Some(cap) = self.cap() {
            records.truncate(cap);
        }
        summary.records_found = records.len();

        for (index, record) in records.iter_mut().enumerate() {
            self.tag_record(index, record);
        }

        if self.write_output(&records).await? {
            summary.records_written = records.len();
        }

        self.deliver(&records, &mut summary).await;

        let metrics = self.delivery.stats().snapshot().await;
        self.logger
            .info(
                &self.job_id,
                &format!(
                    "Finished: pages={} page_errors={} records={} {}",
                    summary.pages_fetched,
                    summary.pages_failed,
                    summary.records_found,
                    metrics.summary()
                ),
            )
            .await;

        Ok(summary)
    }
}

/// Builds a `ListingPipeline` wired to the shared store and the listing API
pub struct PipelineFactory {
    db: Database,
    api_fallback: ApiSettings,
}

impl PipelineFactory {
    pub fn new(db: Database, api_fallback: ApiSettings) -> Self {
        Self { db, api_fallback }
    }
}

#[async_trait]
impl ContextFactory for PipelineFactory {
    async fn create(&self, job_id: &str, snapshot: ScraperConfig) -> Result<Box<dyn ExecutionContext>> {
        let api = ApiClientConfig::load(&self.db.settings(), &self.api_fallback, None).await;
        let delivery = DeliveryClient::new(api).context("Failed to build delivery client")?;

        if let Some(adapter) = snapshot.adapter_path.as_deref() {
            debug!("Config {} names adapter {}; using the generic pipeline", snapshot.id, adapter);
        }

        let pipeline = ListingPipeline::new(job_id, snapshot, self.db.logger(), delivery)?;
        Ok(Box::new(pipeline))
    }
}
