pub mod client;
pub mod result;
pub mod settings;

// Re-export common types
pub use client::{backoff_delay, DeliveryClient};
pub use result::{outcome_error, DeliveryResult, DraftResult, LookupReport, OwnerLinks, PropertyLookup};
pub use settings::ApiClientConfig;
