//! Tenant quota model.

use super::{MetricType, Period};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cap on the cumulative value of a metric within one billing period.
///
/// Stored and serialised as an `i64` where any negative value (canonically
/// `-1`) means unlimited, so rows written by other services read back
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Limit {
    Unlimited,
    Limited(u64),
}

impl Limit {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }

    /// Strictly below the cap; sitting exactly at the cap is not within quota.
    pub fn is_within(&self, usage: u64) -> bool {
        match self {
            Limit::Unlimited => true,
            Limit::Limited(cap) => usage < *cap,
        }
    }

    /// Units left before the cap, `None` when unlimited.
    pub fn remaining(&self, usage: u64) -> Option<u64> {
        match self {
            Limit::Unlimited => None,
            Limit::Limited(cap) => Some(cap.saturating_sub(usage)),
        }
    }

    /// Units above the cap; always zero when unlimited.
    pub fn excess(&self, usage: u64) -> u64 {
        match self {
            Limit::Unlimited => 0,
            Limit::Limited(cap) => usage.saturating_sub(*cap),
        }
    }
}

impl From<i64> for Limit {
    fn from(value: i64) -> Self {
        if value < 0 {
            Limit::Unlimited
        } else {
            Limit::Limited(value as u64)
        }
    }
}

impl From<Limit> for i64 {
    fn from(limit: Limit) -> Self {
        match limit {
            Limit::Unlimited => -1,
            Limit::Limited(cap) => i64::try_from(cap).unwrap_or(i64::MAX),
        }
    }
}

/// Short-window admission settings handed to the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimit {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

/// Quota configuration for a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantQuota {
    pub tenant_id: String,
    pub plan: String,
    /// Absent metrics are unlimited.
    #[serde(default)]
    pub limits: HashMap<MetricType, Limit>,
    #[serde(default)]
    pub rate_limits: HashMap<MetricType, RateLimit>,
    /// Price per unit over the limit. Metrics without a rate are hard-capped.
    #[serde(default)]
    pub overage_rates: HashMap<MetricType, Decimal>,
    pub billing_cycle: Period,
    /// Day of month the monthly cycle restarts on.
    pub reset_day: u32,
}

impl TenantQuota {
    pub fn limit_for(&self, metric: MetricType) -> Limit {
        self.limits.get(&metric).copied().unwrap_or(Limit::Unlimited)
    }

    pub fn overage_rate(&self, metric: MetricType) -> Option<Decimal> {
        self.overage_rates.get(&metric).copied()
    }

    pub fn rate_limit(&self, metric: MetricType) -> Option<RateLimit> {
        self.rate_limits.get(&metric).copied()
    }

    /// Copy of this quota assigned to another tenant, used when a plan
    /// template is provisioned.
    pub fn for_tenant(&self, tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            ..self.clone()
        }
    }
}
