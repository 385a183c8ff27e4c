//! Metering error taxonomy.

use crate::models::MetricType;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeteringError {
    /// The rate limiter declined the call. Nothing was recorded.
    #[error("Rate limit exceeded for tenant {tenant_id} on {metric}")]
    RateLimitExceeded {
        tenant_id: String,
        metric: MetricType,
    },

    /// The usage would pass a hard limit. Nothing was recorded.
    #[error(
        "Quota exceeded for tenant {tenant_id} on {metric}: current={current}, requested={requested}, limit={limit}"
    )]
    QuotaExceeded {
        tenant_id: String,
        metric: MetricType,
        current: u64,
        requested: u64,
        limit: u64,
    },

    #[error("Invalid metric type: {0}")]
    InvalidMetric(String),

    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    /// The usage store failed; never reported as a quota decision.
    #[error("Usage store error: {0}")]
    Store(#[source] AppError),

    #[error("Rate limiter error: {0}")]
    RateLimiter(#[source] AppError),
}

impl MeteringError {
    /// Only rate-limit rejections clear up by waiting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MeteringError::RateLimitExceeded { .. })
    }

    /// Short label used for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            MeteringError::RateLimitExceeded { .. } => "rate_limited",
            MeteringError::QuotaExceeded { .. } => "quota_exceeded",
            MeteringError::InvalidMetric(_) => "invalid_metric",
            MeteringError::UnknownPlan(_) => "unknown_plan",
            MeteringError::Store(_) => "store_error",
            MeteringError::RateLimiter(_) => "rate_limiter_error",
        }
    }
}

impl From<AppError> for MeteringError {
    fn from(err: AppError) -> Self {
        MeteringError::Store(err)
    }
}
