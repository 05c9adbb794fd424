use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::fs;
use tracing::{info, debug, error};

/// Main application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub jobs: JobSettings,
    pub server: ServerSettings,
    /// Static fallback for the delivery client settings
    pub api: ApiSettings,

    /// File this configuration was loaded from, handed to spawned jobs
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Shared store settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub url: String,
}

/// Job descriptor and output capture settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobSettings {
    pub dir: PathBuf,
}

/// Control API settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerSettings {
    pub bind: String,
    pub api_token: String,
}

/// Listing API settings used when the settings store has no value
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiSettings {
    pub base_domain: String,
    pub token: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub debug: bool,
    pub properties_endpoint: String,
    pub links_endpoint: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_domain: "http://localhost:8000/api".to_string(),
            token: String::new(),
            max_retries: 3,
            timeout_secs: 300,
            connect_timeout_secs: 30,
            debug: false,
            properties_endpoint: "/properties".to_string(),
            links_endpoint: "/links".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = Self::data_dir();
        Self {
            database: DatabaseSettings {
                url: format!("sqlite://{}?mode=rwc", data_dir.join("harvester.db").display()),
            },
            jobs: JobSettings {
                dir: data_dir.join("jobs"),
            },
            server: ServerSettings {
                bind: "127.0.0.1:8080".to_string(),
                api_token: "change-me".to_string(),
            },
            api: ApiSettings::default(),
            source: None,
        }
    }
}

impl AppConfig {
    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "listing-harvester", "listing-harvester")
    }

    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let path = if let Some(proj_dirs) = Self::project_dirs() {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        path
    }

    /// Get the path to the data directory (database, job files)
    pub fn data_dir() -> PathBuf {
        if let Some(proj_dirs) = Self::project_dirs() {
            proj_dirs.data_dir().to_path_buf()
        } else {
            PathBuf::from("./data")
        }
    }

    /// Load the configuration from an explicit path, or the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load_default(),
        }
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self> {
        let config_path = Self::config_dir().join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            info!("Default configuration not found. Creating...");
            let mut config = Self::default();
            config.save_to_file(&config_path)?;
            config.source = Some(config_path);
            Ok(config)
        }
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let mut config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;
        config.source = Some(path.to_path_buf());

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_defaults() {
        let api = ApiSettings::default();
        assert_eq!(api.max_retries, 3);
        assert_eq!(api.timeout_secs, 300);
        assert_eq!(api.connect_timeout_secs, 30);
        assert_eq!(api.properties_endpoint, "/properties");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("app.yaml");

        let mut config = AppConfig::default();
        config.server.api_token = "secret".to_string();
        config.api.base_domain = "https://listings.example".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.server.api_token, "secret");
        assert_eq!(loaded.api.base_domain, "https://listings.example");
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load(Some(&dir.path().join("absent.yaml"))).is_err());
    }
}
