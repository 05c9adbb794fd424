pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use crate::crawler::DEFAULT_LOG_LIMIT;
use crate::storage::SourceKind;
use config::AppConfig;

#[derive(Parser)]
#[command(name = "harvester", author, version, about, long_about = None)]
pub struct Cli {
    /// Application config file (YAML); defaults to the platform config dir
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control API
    Serve {
        /// Listen address, overriding server.bind
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Start a job for a scraper config
    Start {
        #[arg(required = true)]
        config_id: i64,
    },

    /// Stop a running job
    Stop {
        #[arg(required = true)]
        job_id: String,
    },

    /// Show a job's process record
    Status {
        #[arg(required = true)]
        job_id: String,
    },

    /// Show the most recent log entries of a job, oldest first
    Logs {
        #[arg(required = true)]
        job_id: String,

        /// Number of entries to show
        #[arg(short, long, default_value_t = DEFAULT_LOG_LIMIT)]
        limit: u32,
    },

    /// List jobs that have not finished
    Running,

    /// Manage scraper configs
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Query the listing API directly
    Property {
        /// Listing API domain, overriding stored and file settings
        #[arg(long)]
        domain: Option<String>,

        #[command(subcommand)]
        action: PropertyCommands,
    },

    /// Execute a job descriptor (spawned by the scheduler)
    #[command(hide = true)]
    RunJob {
        #[arg(required = true)]
        descriptor: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// List configs, ordered by name
    List {
        /// Only configs of this source kind (website, xml)
        #[arg(short, long)]
        kind: Option<SourceKind>,

        /// Substring of the name or source URL
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Show one config
    Get { id: i64 },

    /// Delete a config
    Delete { id: i64 },

    /// Copy a config under a new id
    Duplicate { id: i64 },

    /// Create a config from a YAML file
    Import { file: PathBuf },
}

#[derive(Subcommand)]
enum PropertyCommands {
    /// Fetch one listing by id
    Get { id: String },

    /// List the links already published for an owner
    Links {
        owner: String,

        #[arg(long)]
        start: Option<u32>,

        #[arg(long)]
        end: Option<u32>,
    },

    /// Move a listing back to draft
    Draft { listing_id: String },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            info!("Starting control API on {}", bind);
            commands::serve(&config, &bind).await
        }
        Commands::Start { config_id } => {
            info!("Starting job for config {}", config_id);
            commands::start(&config, config_id).await
        }
        Commands::Stop { job_id } => commands::stop(&config, &job_id).await,
        Commands::Status { job_id } => commands::status(&config, &job_id).await,
        Commands::Logs { job_id, limit } => commands::logs(&config, &job_id, limit).await,
        Commands::Running => commands::running(&config).await,
        Commands::Config { action } => match action {
            ConfigCommands::List { kind, search } => commands::list_configs(&config, kind, search).await,
            ConfigCommands::Get { id } => commands::show_config(&config, id).await,
            ConfigCommands::Delete { id } => commands::delete_config(&config, id).await,
            ConfigCommands::Duplicate { id } => commands::duplicate_config(&config, id).await,
            ConfigCommands::Import { file } => commands::import_config(&config, &file).await,
        },
        Commands::Property { domain, action } => {
            let client = commands::delivery_client(&config, domain.as_deref()).await?;
            match action {
                PropertyCommands::Get { id } => commands::property_get(&client, &id).await,
                PropertyCommands::Links { owner, start, end } => {
                    commands::property_links(&client, &owner, start, end).await
                }
                PropertyCommands::Draft { listing_id } => commands::property_draft(&client, &listing_id).await,
            }
        }
        Commands::RunJob { descriptor } => {
            info!("Running job descriptor {}", descriptor.display());
            commands::run_job(&config, &descriptor).await
        }
    }
}
