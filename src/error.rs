use thiserror::Error;

/// Errors raised by the scheduler, storage and job runner.
///
/// Delivery client calls never surface these directly: their failures are
/// folded into result values, which the CLI converts with `into_result`
/// and `outcome_error`.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Bad or undecodable configuration snapshot, or an invalid config record.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network failure or timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx status, or a 2xx body that did not confirm success.
    #[error("remote error (status {status}): {message}")]
    Remote { status: u16, message: String },

    /// Unknown config, process or listing id.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The job process could not be launched or signalled.
    #[error("spawn error: {0}")]
    Spawn(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type HarvestResult<T> = std::result::Result<T, HarvestError>;
