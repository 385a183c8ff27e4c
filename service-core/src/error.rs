use thiserror::Error;

/// Infrastructure errors shared by every crate in the workspace.
///
/// Domain-level failures (quota, rate limit) live in the service crates and
/// wrap this type when a collaborator fails underneath them.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}
