use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::{self, AppState};
use crate::cli::config::AppConfig;
use crate::crawler::{CommandSpawner, JobRunner, JobScheduler, PipelineFactory, RunOutcome};
use crate::delivery::{outcome_error, ApiClientConfig, DeliveryClient};
use crate::storage::{ConfigFilter, Database, NewScraperConfig, SourceKind};

async fn open_database(config: &AppConfig) -> Result<Database> {
    Database::connect(&config.database.url).await
}

async fn scheduler(config: &AppConfig) -> Result<JobScheduler> {
    let db = open_database(config).await?;
    let spawner = CommandSpawner::for_current_exe(config.source.as_deref(), &config.jobs.dir)
        .context("Failed to locate the harvester executable")?;

    Ok(JobScheduler::new(db, Arc::new(spawner), &config.jobs.dir))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to format output")?);
    Ok(())
}

/// Run the control API until interrupted
pub async fn serve(config: &AppConfig, bind: &str) -> Result<()> {
    if config.server.api_token.trim().is_empty() {
        bail!("server.api_token must be set before serving the control API");
    }

    let scheduler = scheduler(config).await?;
    api::serve(bind, AppState::new(scheduler, &config.server.api_token)).await
}

/// Start a job for a config
pub async fn start(config: &AppConfig, config_id: i64) -> Result<()> {
    let scheduler = scheduler(config).await?;
    let started = scheduler.start_scraper(config_id).await?;

    println!("Job ID: {}", started.job_id);
    println!("PID: {}", started.pid);
    info!("Use `harvester status {}` to check the job status", started.job_id);

    Ok(())
}

/// Stop a job
pub async fn stop(config: &AppConfig, job_id: &str) -> Result<()> {
    let scheduler = scheduler(config).await?;
    let outcome = scheduler.stop_scraper(job_id).await?;

    if !outcome.stopped {
        warn!("{}", outcome.message);
    }
    println!("{}", outcome.message);

    Ok(())
}

/// Show the process record of a job
pub async fn status(config: &AppConfig, job_id: &str) -> Result<()> {
    let scheduler = scheduler(config).await?;
    let details = scheduler.get_process_details(job_id).await?;
    let process = &details.process;

    println!("Job ID: {}", process.job_id);
    println!(
        "Config: {} ({})",
        process.config_id,
        details.config_name.as_deref().unwrap_or("deleted")
    );
    println!("Status: {}", process.status);
    if let Some(pid) = process.pid {
        println!("PID: {}", pid);
    }
    println!("Started: {}", process.started_at);
    if let Some(ended) = process.ended_at {
        println!("Ended: {}", ended);
    }
    if let Some(detail) = &process.exit_detail {
        println!("Detail: {}", detail);
    }

    Ok(())
}

/// Show the most recent log entries of a job
pub async fn logs(config: &AppConfig, job_id: &str, limit: u32) -> Result<()> {
    let scheduler = scheduler(config).await?;

    for entry in scheduler.get_process_logs(job_id, limit).await? {
        println!(
            "{} [{:?}] {}",
            entry.logged_at.format("%Y-%m-%d %H:%M:%S"),
            entry.level,
            entry.message
        );
    }

    Ok(())
}

/// List unfinished jobs
pub async fn running(config: &AppConfig) -> Result<()> {
    let scheduler = scheduler(config).await?;
    let processes = scheduler.get_running_processes().await?;

    if processes.is_empty() {
        println!("No running jobs");
        return Ok(());
    }

    println!("Running jobs:");
    for process in processes {
        println!(
            "  - {} config={} status={} pid={} started={}",
            process.job_id,
            process.config_id,
            process.status,
            process.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            process.started_at
        );
    }

    Ok(())
}

pub async fn list_configs(config: &AppConfig, kind: Option<SourceKind>, search: Option<String>) -> Result<()> {
    let db = open_database(config).await?;
    let configs = db.configs().list(&ConfigFilter { kind, search }).await?;

    println!("Scraper configs:");
    for summary in configs {
        println!(
            "  - [{}] {} ({}, {:?}) last run: {}",
            summary.id,
            summary.name,
            summary.source_kind,
            summary.status,
            summary
                .last_run_at
                .map(|at| at.to_string())
                .unwrap_or_else(|| "never".to_string())
        );
    }

    Ok(())
}

pub async fn show_config(config: &AppConfig, id: i64) -> Result<()> {
    let db = open_database(config).await?;
    let scraper_config = db.configs().get(id).await?;

    let yaml = serde_yaml::to_string(&scraper_config).context("Failed to format config")?;
    println!("{}", yaml);

    Ok(())
}

pub async fn delete_config(config: &AppConfig, id: i64) -> Result<()> {
    let db = open_database(config).await?;
    db.configs().delete(id).await?;
    println!("Deleted config {}", id);
    Ok(())
}

pub async fn duplicate_config(config: &AppConfig, id: i64) -> Result<()> {
    let db = open_database(config).await?;
    let copy = db.configs().duplicate(id).await?;
    println!("Created config {} ({}) from {}", copy.id, copy.name, id);
    Ok(())
}

/// Create a config from a YAML document
pub async fn import_config(config: &AppConfig, file: &Path) -> Result<()> {
    let contents = tokio::fs::read_to_string(file)
        .await
        .context(format!("Failed to read config file: {}", file.display()))?;
    let new: NewScraperConfig = serde_yaml::from_str(&contents)
        .context(format!("Failed to parse config file: {}", file.display()))?;

    let db = open_database(config).await?;
    let created = db.configs().create(&new).await?;
    println!("Created config {} ({})", created.id, created.name);

    Ok(())
}

/// Delivery client resolved from the settings store, the app config and an optional domain
pub async fn delivery_client(config: &AppConfig, domain: Option<&str>) -> Result<DeliveryClient> {
    let db = open_database(config).await?;
    let api = ApiClientConfig::load(&db.settings(), &config.api, domain).await;
    info!("Using listing API at {}", api.base_domain);
    Ok(DeliveryClient::new(api)?)
}

/// Print the full report, then exit with an error when the lookup failed
pub async fn property_get(client: &DeliveryClient, id: &str) -> Result<()> {
    let lookup = client.fetch_property_by_id(id).await;
    print_json(&lookup.clone().into_report())?;
    lookup.into_result(id)?;
    Ok(())
}

pub async fn property_links(client: &DeliveryClient, owner: &str, start: Option<u32>, end: Option<u32>) -> Result<()> {
    let links = client.fetch_owner_links(owner, start, end).await;
    print_json(&links)?;
    if !links.success {
        let message = links.error.unwrap_or_else(|| "links lookup failed".to_string());
        return Err(outcome_error(links.http_code, message).into());
    }
    Ok(())
}

pub async fn property_draft(client: &DeliveryClient, listing_id: &str) -> Result<()> {
    let draft = client.update_listing_to_draft(listing_id).await;
    print_json(&draft)?;
    if !draft.success {
        let message = draft.message.unwrap_or_else(|| "draft update failed".to_string());
        return Err(outcome_error(draft.http_code, message).into());
    }
    Ok(())
}

/// Worker entry point. Always returns Ok once the descriptor has been handled,
/// so a failed job still exits normally.
pub async fn run_job(config: &AppConfig, descriptor: &Path) -> Result<()> {
    let db = open_database(config).await?;
    let factory = PipelineFactory::new(db.clone(), config.api.clone());
    let runner = JobRunner::new(db, Arc::new(factory));

    match runner.run_descriptor(descriptor).await {
        RunOutcome::Completed(summary) => info!("Job completed: {:?}", summary),
        RunOutcome::Failed(message) => warn!("Job failed: {}", message),
        RunOutcome::Skipped(status) => warn!("Job not run, record already {}", status),
    }

    Ok(())
}
