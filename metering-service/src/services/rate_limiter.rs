//! Rate limiter port and its `governor` adapter.

use crate::models::{MetricType, RateLimit};
use async_trait::async_trait;
use dashmap::DashMap;
use service_core::error::AppError;
use service_core::rate_limit::{
    check_rate_limit, create_keyed_rate_limiters, create_unkeyed_rate_limiter, KeyedRateLimiters,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Short-window admission control, independent of cumulative quota.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Take one admission for (tenant, metric).
    async fn allow(&self, tenant_id: &str, metric: MetricType) -> Result<bool, AppError>;

    /// Replace the tenant's per-metric limits. Called whenever a quota is set
    /// or loaded, so implementations must tolerate repeated identical calls.
    async fn configure(
        &self,
        _tenant_id: &str,
        _rate_limits: &HashMap<MetricType, RateLimit>,
    ) -> Result<(), AppError> {
        Ok(())
    }

    /// Refill the bucket for (tenant, metric).
    async fn reset(&self, _tenant_id: &str, _metric: MetricType) -> Result<(), AppError> {
        Ok(())
    }
}

type LimitKey = (String, MetricType);

/// Buckets are keyed by the rate they were built with, so a bucket created
/// from a superseded limit is never consulted again.
type LimiterKey = (String, MetricType, RateLimit);

/// In-process token buckets per (tenant, metric).
///
/// Metrics without a configured [`RateLimit`] are always admitted.
#[derive(Clone)]
pub struct GovernorRateLimiter {
    limits: Arc<DashMap<LimitKey, RateLimit>>,
    limiters: KeyedRateLimiters<LimiterKey>,
}

impl Default for GovernorRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl GovernorRateLimiter {
    pub fn new() -> Self {
        Self {
            limits: Arc::new(DashMap::new()),
            limiters: create_keyed_rate_limiters(),
        }
    }
}

#[async_trait]
impl RateLimiter for GovernorRateLimiter {
    async fn allow(&self, tenant_id: &str, metric: MetricType) -> Result<bool, AppError> {
        let Some(limit) = self
            .limits
            .get(&(tenant_id.to_string(), metric))
            .map(|l| *l)
        else {
            return Ok(true);
        };
        let key = (tenant_id.to_string(), metric, limit);

        // Release the shard read guard before taking the entry write guard
        let existing = self.limiters.get(&key).map(|l| l.clone());
        let limiter = match existing {
            Some(existing) => existing,
            None => {
                let created =
                    create_unkeyed_rate_limiter(limit.requests_per_second, limit.burst_size)?;
                self.limiters.entry(key).or_insert(created).clone()
            }
        };

        match check_rate_limit(&limiter) {
            Ok(()) => Ok(true),
            Err(wait) => {
                tracing::debug!(
                    tenant_id = tenant_id,
                    metric = %metric,
                    retry_after_ms = wait.as_millis() as u64,
                    "Rate limit token not available"
                );
                Ok(false)
            }
        }
    }

    /// Buckets whose rate is unchanged keep their state, so repeating a
    /// configuration does not refill them.
    async fn configure(
        &self,
        tenant_id: &str,
        rate_limits: &HashMap<MetricType, RateLimit>,
    ) -> Result<(), AppError> {
        if let Some((metric, _)) = rate_limits
            .iter()
            .find(|(_, limit)| limit.requests_per_second == 0)
        {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "requests_per_second must be positive for {}",
                metric
            )));
        }

        self.limits
            .retain(|(tenant, metric), _| tenant != tenant_id || rate_limits.contains_key(metric));
        for (metric, limit) in rate_limits {
            self.limits.insert((tenant_id.to_string(), *metric), *limit);
        }
        self.limiters.retain(|(tenant, metric, limit), _| {
            tenant != tenant_id || rate_limits.get(metric) == Some(limit)
        });

        tracing::debug!(
            tenant_id = tenant_id,
            metrics = rate_limits.len(),
            "Rate limits configured"
        );
        Ok(())
    }

    async fn reset(&self, tenant_id: &str, metric: MetricType) -> Result<(), AppError> {
        self.limiters
            .retain(|(tenant, m, _), _| tenant != tenant_id || *m != metric);
        Ok(())
    }
}
