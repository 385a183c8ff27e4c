//! Usage record model.

use super::{Limit, MetricType, Period};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cumulative usage of one metric by one tenant within one billing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub tenant_id: String,
    pub metric: MetricType,
    pub period: Period,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub value: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// All metrics for a tenant in one billing period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSummary {
    pub tenant_id: String,
    pub period: Period,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub metrics: HashMap<MetricType, u64>,
    #[serde(default)]
    pub limits: HashMap<MetricType, Limit>,
    /// Usage above the limit, for limited metrics that went over.
    #[serde(default)]
    pub overages: HashMap<MetricType, u64>,
}

impl UsageSummary {
    pub fn usage(&self, metric: MetricType) -> u64 {
        self.metrics.get(&metric).copied().unwrap_or(0)
    }
}
