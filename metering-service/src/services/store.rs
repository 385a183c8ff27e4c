//! Usage store port: the durable store of record for usage counters,
//! tenant quotas and overage charges.

use crate::models::{
    BillingPeriod, MetricType, OverageCharge, Period, TenantQuota, UsageRecord, UsageSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;

#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Atomically add `delta` to the row for (tenant, metric, period start),
    /// creating it when absent. Returns the new cumulative value.
    async fn increment_usage(
        &self,
        tenant_id: &str,
        metric: MetricType,
        period: &BillingPeriod,
        delta: u64,
    ) -> Result<u64, AppError>;

    async fn get_usage(
        &self,
        tenant_id: &str,
        metric: MetricType,
        period: Period,
        period_start: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>, AppError>;

    /// Every metric's value for the tenant in one period. Only `metrics` is
    /// filled in; limits and overages are the caller's concern.
    async fn get_usage_summary(
        &self,
        tenant_id: &str,
        period: &BillingPeriod,
    ) -> Result<UsageSummary, AppError>;

    /// Rows whose period starts in `[from, to)`, oldest first.
    async fn list_usage_history(
        &self,
        tenant_id: &str,
        metric: MetricType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, AppError>;

    async fn get_quota(&self, tenant_id: &str) -> Result<Option<TenantQuota>, AppError>;

    async fn set_quota(&self, quota: &TenantQuota) -> Result<(), AppError>;

    async fn record_overage(&self, charge: &OverageCharge) -> Result<(), AppError>;

    /// Charges with no `billed_at`, oldest first.
    async fn get_pending_overages(&self, tenant_id: &str) -> Result<Vec<OverageCharge>, AppError>;

    /// Stamp `billed_at` on pending charges of `period` ending at or before
    /// `period_end`. Returns how many were stamped.
    async fn mark_overages_billed(
        &self,
        tenant_id: &str,
        period: Period,
        period_end: DateTime<Utc>,
        billed_at: DateTime<Utc>,
    ) -> Result<u64, AppError>;
}
