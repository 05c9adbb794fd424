use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::result::{DeliveryResult, DraftResult, OwnerLinks, PropertyLookup};
use super::settings::ApiClientConfig;
use crate::error::{HarvestError, HarvestResult};
use crate::utils::metrics::{DeliveryStats, RequestTimer};

/// Read-only lookups use short timeouts
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);
const LOOKUP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Backoff never exceeds this many units
const MAX_BACKOFF_FACTOR: u32 = 10;

/// Delay between attempt `attempt` and the next one: `min(10, 2^attempt)` units
pub fn backoff_delay(attempt: u32, unit: Duration) -> Duration {
    let factor = 2u32
        .checked_pow(attempt)
        .unwrap_or(u32::MAX)
        .min(MAX_BACKOFF_FACTOR);
    unit * factor
}

/// URLs derived from the base domain
#[derive(Debug, Clone, PartialEq)]
struct Endpoints {
    properties: String,
    links: String,
}

impl Endpoints {
    fn derive(base_domain: &str, config: &ApiClientConfig) -> Self {
        Self {
            properties: join_url(base_domain, &config.properties_endpoint),
            links: join_url(base_domain, &config.links_endpoint),
        }
    }

    fn property(&self, id: &str) -> String {
        format!("{}/{}", self.properties, id)
    }

    fn draft(&self, listing_id: &str) -> String {
        format!("{}/{}/draft", self.properties, listing_id)
    }
}

fn join_url(base: &str, path: &str) -> String {
    let path = path.trim();
    if path.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base, path.trim_start_matches('/'))
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('/').to_string()
}

/// Client for the central listing API.
///
/// No call ever returns an error: transport and remote failures come back
/// as result values. Submissions are not idempotent; a retry after a
/// timeout the remote already accepted can create a duplicate listing.
pub struct DeliveryClient {
    config: ApiClientConfig,
    base_domain: String,
    endpoints: Endpoints,
    http: Client,
    lookup_http: Client,
    backoff_unit: Duration,
    stats: DeliveryStats,
}

impl DeliveryClient {
    pub fn new(config: ApiClientConfig) -> HarvestResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| HarvestError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        let lookup_http = Client::builder()
            .timeout(LOOKUP_TIMEOUT.min(config.timeout))
            .connect_timeout(LOOKUP_CONNECT_TIMEOUT.min(config.connect_timeout))
            .build()
            .map_err(|e| HarvestError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        let base_domain = normalize_domain(&config.base_domain);
        let endpoints = Endpoints::derive(&base_domain, &config);

        Ok(Self {
            config,
            base_domain,
            endpoints,
            http,
            lookup_http,
            backoff_unit: Duration::from_secs(1),
            stats: DeliveryStats::new(),
        })
    }

    /// Scale the backoff schedule; one unit is a second by default
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn config(&self) -> &ApiClientConfig {
        &self.config
    }

    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }

    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    /// Point the client at another domain; every derived endpoint follows
    pub fn set_base_domain(&mut self, domain: &str) {
        self.base_domain = normalize_domain(domain);
        self.endpoints = Endpoints::derive(&self.base_domain, &self.config);
        info!("Listing API base domain set to {}", self.base_domain);
    }

    pub fn submit_url(&self) -> &str {
        &self.endpoints.properties
    }

    pub fn links_url(&self) -> &str {
        &self.endpoints.links
    }

    pub fn draft_url(&self, listing_id: &str) -> String {
        self.endpoints.draft(listing_id)
    }

    /// Submit one record as a single-element batch, retrying with capped exponential backoff
    pub async fn submit_property(&self, record: &Value) -> DeliveryResult {
        let body = json!({ "properties": [record] });
        let max_attempts = self.config.max_retries.max(1);
        let started = RequestTimer::start();

        if self.config.debug {
            debug!("Submitting to {}: {}", self.endpoints.properties, body);
        }

        let mut last_error = None;
        let mut last_status = None;
        let mut last_raw = None;

        for attempt in 1..=max_attempts {
            let timer = RequestTimer::start();
            let sent = self
                .http
                .post(&self.endpoints.properties)
                .bearer_auth(&self.config.token)
                .json(&body)
                .send()
                .await;

            match sent {
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await;
                    let elapsed = timer.end();

                    match text {
                        Ok(text) if status.is_success() => {
                            self.stats.record_attempt(true, elapsed, Some(status.as_u16())).await;
                            let parsed = serde_json::from_str::<Value>(&text)
                                .unwrap_or_else(|_| Value::String(text));

                            debug!("Property accepted on attempt {}/{} ({})", attempt, max_attempts, status);
                            return DeliveryResult {
                                success: true,
                                attempts: attempt,
                                duration: started.elapsed(),
                                response: Some(parsed),
                                http_code: Some(status.as_u16()),
                                error: None,
                                raw_response: None,
                            };
                        }
                        Ok(text) => {
                            self.stats.record_attempt(false, elapsed, Some(status.as_u16())).await;
                            warn!("Attempt {}/{} rejected with HTTP {}", attempt, max_attempts, status);
                            last_error = Some(format!("HTTP {}", status.as_u16()));
                            last_status = Some(status.as_u16());
                            last_raw = Some(text);
                        }
                        Err(e) => {
                            self.stats.record_attempt(false, elapsed, Some(status.as_u16())).await;
                            warn!("Attempt {}/{} failed reading response: {}", attempt, max_attempts, e);
                            last_error = Some(format!("Failed to read response: {}", e));
                            last_status = Some(status.as_u16());
                            last_raw = None;
                        }
                    }
                }
                Err(e) => {
                    self.stats.record_attempt(false, timer.end(), None).await;
                    warn!("Attempt {}/{} failed: {}", attempt, max_attempts, e);
                    last_error = Some(describe_transport_error(&e));
                    last_status = None;
                    last_raw = None;
                }
            }

            if attempt < max_attempts {
                let delay = backoff_delay(attempt, self.backoff_unit);
                debug!("Backing off {:?} before attempt {}", delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }
        }

        DeliveryResult {
            success: false,
            attempts: max_attempts,
            duration: started.elapsed(),
            response: None,
            http_code: last_status,
            error: last_error,
            raw_response: last_raw,
        }
    }

    /// Look up one listing; a single attempt with short timeouts
    pub async fn fetch_property_by_id(&self, id: &str) -> PropertyLookup {
        let url = self.endpoints.property(id);
        debug!("Fetching property {}", url);

        let response = match self
            .lookup_http
            .get(&url)
            .bearer_auth(&self.config.token)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return PropertyLookup::Transport(describe_transport_error(&e)),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return PropertyLookup::Transport(describe_transport_error(&e)),
        };

        match status {
            StatusCode::NOT_FOUND => PropertyLookup::NotFound,
            StatusCode::UNAUTHORIZED => PropertyLookup::Unauthorized,
            s if s.is_success() => match serde_json::from_str::<Value>(&body) {
                Ok(data) => PropertyLookup::Found(data),
                Err(_) => PropertyLookup::InvalidJson { raw: body },
            },
            s => PropertyLookup::Http {
                status: s.as_u16(),
                body,
            },
        }
    }

    /// Links already published for an owner. Unauthenticated.
    pub async fn fetch_owner_links(
        &self,
        owner: &str,
        start: Option<u32>,
        end: Option<u32>,
    ) -> OwnerLinks {
        let mut query: Vec<(&str, String)> = vec![("owner", owner.to_string())];
        if let Some(start) = start {
            query.push(("start", start.to_string()));
        }
        if let Some(end) = end {
            query.push(("end", end.to_string()));
        }

        let response = match self
            .lookup_http
            .get(&self.endpoints.links)
            .query(&query)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return OwnerLinks::failure(describe_transport_error(&e), None),
        };

        let status = response.status();
        let body = match response.json::<Value>().await {
            Ok(body) => body,
            Err(e) => {
                return OwnerLinks::failure(
                    format!("Invalid links response: {}", e),
                    Some(status.as_u16()),
                )
            }
        };

        if !status.is_success() {
            return OwnerLinks::failure(format!("HTTP error {}", status.as_u16()), Some(status.as_u16()));
        }

        let Some(links) = body.get("links").and_then(Value::as_array) else {
            return OwnerLinks::failure("Response does not contain a links array", Some(status.as_u16()));
        };

        OwnerLinks {
            success: true,
            count: links.len(),
            links: links.clone(),
            total: body.get("total").and_then(Value::as_u64),
            pagination: body.get("pagination").cloned(),
            http_code: Some(status.as_u16()),
            error: None,
        }
    }

    /// Move a listing back to draft. Needs HTTP 200 and a truthy `success` in the body.
    pub async fn update_listing_to_draft(&self, listing_id: &str) -> DraftResult {
        let url = self.endpoints.draft(listing_id);

        let response = match self
            .lookup_http
            .put(&url)
            .bearer_auth(&self.config.token)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return DraftResult {
                    success: false,
                    message: Some(describe_transport_error(&e)),
                    http_code: None,
                    response: None,
                }
            }
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .ok()
            .and_then(|text| serde_json::from_str::<Value>(&text).ok());

        let confirmed = body
            .as_ref()
            .and_then(|b| b.get("success"))
            .map_or(false, is_truthy);
        let server_message = body
            .as_ref()
            .and_then(|b| b.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let success = status == StatusCode::OK && confirmed;
        let message = if success {
            server_message
        } else {
            Some(server_message.unwrap_or_else(|| "Unknown error".to_string()))
        };

        DraftResult {
            success,
            message,
            http_code: Some(status.as_u16()),
            response: body,
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    }
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("Request timed out: {}", e)
    } else if e.is_connect() {
        format!("Connection failed: {}", e)
    } else {
        e.to_string()
    }
}
