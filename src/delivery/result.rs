use std::time::Duration;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::HarvestError;

/// Error for a failed delivery outcome: no status means the request never got a response
pub fn outcome_error(http_code: Option<u16>, message: impl Into<String>) -> HarvestError {
    match http_code {
        Some(status) => HarvestError::Remote {
            status,
            message: message.into(),
        },
        None => HarvestError::Transport(message.into()),
    }
}

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Outcome of a property submission
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    pub success: bool,
    pub attempts: u32,
    #[serde(rename = "duration_secs", serialize_with = "as_secs")]
    pub duration: Duration,
    /// Parsed body of the accepting response, or the raw text when it was not JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Body of the last failed attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

/// Classified outcome of a single-listing lookup
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyLookup {
    Found(Value),
    NotFound,
    Unauthorized,
    InvalidJson { raw: String },
    Http { status: u16, body: String },
    Transport(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct LookupReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl PropertyLookup {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn http_code(&self) -> Option<u16> {
        match self {
            Self::Found(_) | Self::InvalidJson { .. } => Some(200),
            Self::NotFound => Some(404),
            Self::Unauthorized => Some(401),
            Self::Http { status, .. } => Some(*status),
            Self::Transport(_) => None,
        }
    }

    pub fn error(&self) -> Option<String> {
        match self {
            Self::Found(_) => None,
            Self::NotFound => Some("Property not found".to_string()),
            Self::Unauthorized => Some("Unauthorized: invalid or missing API token".to_string()),
            Self::InvalidJson { .. } => Some("Invalid JSON response".to_string()),
            Self::Http { status, .. } => Some(format!("HTTP error {}", status)),
            Self::Transport(e) => Some(format!("Request failed: {}", e)),
        }
    }

    /// The listing body, or the failure as a `HarvestError`
    pub fn into_result(self, id: &str) -> Result<Value, HarvestError> {
        match self {
            Self::Found(data) => Ok(data),
            Self::NotFound => Err(HarvestError::not_found("listing", id)),
            Self::Transport(e) => Err(HarvestError::Transport(e)),
            other => {
                let message = other.error().unwrap_or_default();
                Err(outcome_error(other.http_code(), message))
            }
        }
    }

    pub fn into_report(self) -> LookupReport {
        let success = self.is_success();
        let http_code = self.http_code();
        let error = self.error();
        let (data, raw_response) = match self {
            Self::Found(data) => (Some(data), None),
            Self::InvalidJson { raw } => (None, Some(raw)),
            Self::Http { body, .. } => (None, Some(body)),
            _ => (None, None),
        };

        LookupReport {
            success,
            data,
            error,
            http_code,
            raw_response,
        }
    }
}

/// Links already published for an owner
#[derive(Debug, Clone, Default, Serialize)]
pub struct OwnerLinks {
    pub success: bool,
    pub links: Vec<Value>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OwnerLinks {
    pub fn failure(error: impl Into<String>, http_code: Option<u16>) -> Self {
        Self {
            success: false,
            http_code,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Outcome of moving a listing back to draft
#[derive(Debug, Clone, Serialize)]
pub struct DraftResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_not_found_report() {
        let report = serde_json::to_value(PropertyLookup::NotFound.into_report()).unwrap();
        assert_eq!(
            report,
            json!({"success": false, "error": "Property not found", "http_code": 404})
        );
    }

    #[test]
    fn test_found_report_carries_data() {
        let report = PropertyLookup::Found(json!({"id": 7})).into_report();
        assert!(report.success);
        assert_eq!(report.data, Some(json!({"id": 7})));
        assert!(report.error.is_none());
    }

    #[test]
    fn test_lookup_failures_map_to_errors() {
        assert_eq!(PropertyLookup::Found(json!({"id": 7})).into_result("7").unwrap(), json!({"id": 7}));
        assert!(PropertyLookup::NotFound.into_result("7").unwrap_err().is_not_found());
        assert!(matches!(
            PropertyLookup::Transport("timed out".to_string()).into_result("7"),
            Err(HarvestError::Transport(_))
        ));
        assert!(matches!(
            PropertyLookup::Unauthorized.into_result("7"),
            Err(HarvestError::Remote { status: 401, .. })
        ));
        assert!(matches!(
            PropertyLookup::Http { status: 503, body: String::new() }.into_result("7"),
            Err(HarvestError::Remote { status: 503, .. })
        ));
        assert!(matches!(outcome_error(None, "refused"), HarvestError::Transport(_)));
    }

    #[test]
    fn test_owner_links_failure_shape() {
        let value = serde_json::to_value(OwnerLinks::failure("bad shape", Some(200))).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["links"], json!([]));
        assert_eq!(value["count"], json!(0));
    }

    #[test]
    fn test_delivery_result_duration_in_seconds() {
        let result = DeliveryResult {
            success: true,
            attempts: 1,
            duration: Duration::from_millis(1500),
            response: None,
            http_code: Some(201),
            error: None,
            raw_response: None,
        };
        let value = serde_json::to_value(result).unwrap();
        assert_eq!(value["duration_secs"], json!(1.5));
        assert!(value.get("error").is_none());
    }
}
