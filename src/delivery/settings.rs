use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cli::config::ApiSettings;
use crate::storage::settings::{SettingsStore, API_CATEGORY};

pub const KEY_BASE_DOMAIN: &str = "api_base_domain";
pub const KEY_TOKEN: &str = "api_token";
pub const KEY_MAX_RETRIES: &str = "api_max_retries";
pub const KEY_TIMEOUT: &str = "api_timeout";
pub const KEY_CONNECT_TIMEOUT: &str = "api_connect_timeout";
pub const KEY_DEBUG: &str = "api_debug";
pub const KEY_PROPERTIES_ENDPOINT: &str = "api_properties_endpoint";
pub const KEY_LINKS_ENDPOINT: &str = "api_links_endpoint";

/// Effective settings of a delivery client, built once at construction
#[derive(Debug, Clone, PartialEq)]
pub struct ApiClientConfig {
    pub base_domain: String,
    pub properties_endpoint: String,
    pub links_endpoint: String,
    pub token: String,
    /// Total attempts per submission, never below one
    pub max_retries: u32,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub debug: bool,
}

impl ApiClientConfig {
    /// Resolve settings: store values first, the static fallback for anything
    /// the store lacks, then the domain override on top.
    pub fn resolve(
        store: Option<&HashMap<String, String>>,
        fallback: &ApiSettings,
        domain_override: Option<&str>,
    ) -> Self {
        let lookup = |key: &str| -> Option<&str> {
            store
                .and_then(|values| values.get(key))
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
        };

        let parsed = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.parse::<u64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring non-numeric setting {}={}", key, raw);
                    None
                }
            }
        };

        let mut config = Self {
            base_domain: lookup(KEY_BASE_DOMAIN)
                .map(str::to_string)
                .unwrap_or_else(|| fallback.base_domain.clone()),
            properties_endpoint: lookup(KEY_PROPERTIES_ENDPOINT)
                .map(str::to_string)
                .unwrap_or_else(|| fallback.properties_endpoint.clone()),
            links_endpoint: lookup(KEY_LINKS_ENDPOINT)
                .map(str::to_string)
                .unwrap_or_else(|| fallback.links_endpoint.clone()),
            token: lookup(KEY_TOKEN)
                .map(str::to_string)
                .unwrap_or_else(|| fallback.token.clone()),
            max_retries: parsed(KEY_MAX_RETRIES)
                .map(|v| v.min(u64::from(u32::MAX)) as u32)
                .unwrap_or(fallback.max_retries)
                .max(1),
            timeout: Duration::from_secs(parsed(KEY_TIMEOUT).unwrap_or(fallback.timeout_secs)),
            connect_timeout: Duration::from_secs(
                parsed(KEY_CONNECT_TIMEOUT).unwrap_or(fallback.connect_timeout_secs),
            ),
            debug: lookup(KEY_DEBUG).map(parse_flag).unwrap_or(fallback.debug),
        };

        if let Some(domain) = domain_override.map(str::trim).filter(|d| !d.is_empty()) {
            config.base_domain = domain.to_string();
        }

        config
    }

    /// Resolve against the persisted store; an unreachable store falls back to the static source
    pub async fn load(
        store: &SettingsStore,
        fallback: &ApiSettings,
        domain_override: Option<&str>,
    ) -> Self {
        let values = match store.category(API_CATEGORY).await {
            Ok(values) => {
                debug!("Loaded {} api settings from store", values.len());
                Some(values)
            }
            Err(e) => {
                warn!("Settings store unavailable, using static api settings: {}", e);
                None
            }
        };

        Self::resolve(values.as_ref(), fallback, domain_override)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
