//! Metering engine: admission, quota accounting and overage billing.
//!
//! `check_and_record` is not atomic across its collaborators. The limit check
//! reads usage and the increment happens afterwards, so concurrent calls for
//! the same tenant and metric can each pass the check and push usage past
//! the limit before the overage path engages. Increments themselves are
//! atomic in the store. The rate limiter is the hard admission backstop; the
//! quota is an accounting signal.

use super::billing_period::current_period;
use super::clock::{Clock, SystemClock};
use super::metrics::{record_overage_charge, record_rejection, record_usage};
use super::quota_cache::QuotaCache;
use super::rate_limiter::RateLimiter;
use super::store::UsageStore;
use crate::config::MeteringConfig;
use crate::error::MeteringError;
use crate::models::{
    plan_template, BillingPeriod, Limit, MetricType, OverageCharge, Period, TenantQuota,
    UsageRecord, UsageSummary, STARTER_PLAN,
};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// What a successful `check_and_record` did.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    /// Cumulative usage for the period after the increment.
    pub value: u64,
    /// The charge created when the call went past the limit.
    pub overage: Option<OverageCharge>,
}

pub struct MeteringService {
    store: Arc<dyn UsageStore>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    cache: Arc<QuotaCache>,
    clock: Arc<dyn Clock>,
    default_plan: String,
}

impl MeteringService {
    pub fn new(
        store: Arc<dyn UsageStore>,
        rate_limiter: Option<Arc<dyn RateLimiter>>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            rate_limiter,
            cache: Arc::new(QuotaCache::new(cache_ttl)),
            clock: Arc::new(SystemClock),
            default_plan: STARTER_PLAN.to_string(),
        }
    }

    pub fn from_config(
        config: &MeteringConfig,
        store: Arc<dyn UsageStore>,
        rate_limiter: Option<Arc<dyn RateLimiter>>,
    ) -> Result<Self, MeteringError> {
        Self::new(store, rate_limiter, config.quota_cache_ttl).with_default_plan(&config.default_plan)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Plan whose template applies to tenants with no stored quota.
    pub fn with_default_plan(mut self, plan: &str) -> Result<Self, MeteringError> {
        if plan_template(plan).is_none() {
            return Err(MeteringError::UnknownPlan(plan.to_string()));
        }
        self.default_plan = plan.to_string();
        Ok(self)
    }

    pub fn quota_cache(&self) -> &Arc<QuotaCache> {
        &self.cache
    }

    pub fn spawn_cache_sweeper(&self, every: Duration) -> JoinHandle<()> {
        self.cache.spawn_sweeper(every)
    }

    /// Admit, check quota, bill any overage and record `delta` units.
    #[instrument(skip(self))]
    pub async fn check_and_record(
        &self,
        tenant_id: &str,
        metric: MetricType,
        delta: u64,
    ) -> Result<RecordOutcome, MeteringError> {
        if let Some(limiter) = &self.rate_limiter {
            let allowed = limiter
                .allow(tenant_id, metric)
                .await
                .map_err(MeteringError::RateLimiter)?;
            if !allowed {
                record_rejection(metric.as_str(), "rate_limited");
                warn!("Rate limit exceeded");
                return Err(MeteringError::RateLimitExceeded {
                    tenant_id: tenant_id.to_string(),
                    metric,
                });
            }
        }

        let quota = self.resolve_quota(tenant_id).await?;
        let period = self.period_for(&quota);
        let current = self.usage_in(tenant_id, metric, &period).await?;

        let mut overage = None;
        if let Limit::Limited(limit) = quota.limit_for(metric) {
            let projected = current.saturating_add(delta);
            if delta > 0 && projected > limit {
                let Some(rate) = quota.overage_rate(metric) else {
                    record_rejection(metric.as_str(), "quota_exceeded");
                    warn!(current = current, limit = limit, "Quota exceeded");
                    return Err(MeteringError::QuotaExceeded {
                        tenant_id: tenant_id.to_string(),
                        metric,
                        current,
                        requested: delta,
                        limit,
                    });
                };

                // Usage already past the limit was billed by earlier calls.
                let quantity = delta.min(projected - limit);
                if rate.is_zero() {
                    debug!(quantity = quantity, "Overage at zero rate, no charge");
                } else {
                    overage = Some(self.bill_overage(tenant_id, metric, quantity, rate, &period).await?);
                }
            }
        }

        let value = self
            .store
            .increment_usage(tenant_id, metric, &period, delta)
            .await?;
        record_usage(metric.as_str(), "checked", delta);

        Ok(RecordOutcome { value, overage })
    }

    /// Increment usage with no rate limit or quota check.
    #[instrument(skip(self))]
    pub async fn record_usage(
        &self,
        tenant_id: &str,
        metric: MetricType,
        delta: u64,
    ) -> Result<u64, MeteringError> {
        let quota = self.resolve_quota(tenant_id).await?;
        let period = self.period_for(&quota);

        let value = self
            .store
            .increment_usage(tenant_id, metric, &period, delta)
            .await?;
        record_usage(metric.as_str(), "unconditional", delta);

        Ok(value)
    }

    /// Cumulative usage in the tenant's current billing period; zero when
    /// nothing has been recorded yet.
    #[instrument(skip(self))]
    pub async fn get_current_usage(
        &self,
        tenant_id: &str,
        metric: MetricType,
    ) -> Result<u64, MeteringError> {
        let quota = self.resolve_quota(tenant_id).await?;
        let period = self.period_for(&quota);
        self.usage_in(tenant_id, metric, &period).await
    }

    #[instrument(skip(self))]
    pub async fn get_quota(&self, tenant_id: &str) -> Result<TenantQuota, MeteringError> {
        Ok(self.resolve_quota(tenant_id).await?.as_ref().clone())
    }

    /// Push the rate limits to the limiter, then write the quota through to the
    /// store and drop the cached copy. Limits the limiter refuses are never
    /// persisted.
    #[instrument(skip(self, quota), fields(tenant_id = %quota.tenant_id, plan = %quota.plan))]
    pub async fn set_quota(&self, quota: TenantQuota) -> Result<(), MeteringError> {
        self.configure_rate_limits(&quota).await?;
        self.store.set_quota(&quota).await?;
        self.cache.invalidate(&quota.tenant_id);

        info!(billing_cycle = %quota.billing_cycle, reset_day = quota.reset_day, "Quota updated");
        Ok(())
    }

    /// Give a tenant the default quota of `plan`.
    #[instrument(skip(self))]
    pub async fn provision_tenant(
        &self,
        tenant_id: &str,
        plan: &str,
    ) -> Result<TenantQuota, MeteringError> {
        let quota = plan_template(plan)
            .ok_or_else(|| MeteringError::UnknownPlan(plan.to_string()))?
            .for_tenant(tenant_id);

        self.set_quota(quota.clone()).await?;
        Ok(quota)
    }

    /// False once usage reaches the limit; the next unit would exceed it.
    pub async fn is_within_quota(
        &self,
        tenant_id: &str,
        metric: MetricType,
    ) -> Result<bool, MeteringError> {
        let limit = self.resolve_quota(tenant_id).await?.limit_for(metric);
        if limit.is_unlimited() {
            return Ok(true);
        }
        let current = self.get_current_usage(tenant_id, metric).await?;
        Ok(limit.is_within(current))
    }

    /// Units left before the limit, never negative. `-1` when unlimited.
    pub async fn remaining_quota(
        &self,
        tenant_id: &str,
        metric: MetricType,
    ) -> Result<i64, MeteringError> {
        let limit = self.resolve_quota(tenant_id).await?.limit_for(metric);
        if limit.is_unlimited() {
            return Ok(-1);
        }
        let current = self.get_current_usage(tenant_id, metric).await?;
        Ok(limit
            .remaining(current)
            .map_or(-1, |left| i64::try_from(left).unwrap_or(i64::MAX)))
    }

    /// Every metric's usage for the current period, with the limits in force
    /// and the usage above each limit.
    #[instrument(skip(self))]
    pub async fn usage_summary(&self, tenant_id: &str) -> Result<UsageSummary, MeteringError> {
        let quota = self.resolve_quota(tenant_id).await?;
        let period = self.period_for(&quota);

        let mut summary = self.store.get_usage_summary(tenant_id, &period).await?;
        summary.limits = quota.limits.clone();
        summary.overages = quota
            .limits
            .iter()
            .filter_map(|(metric, limit)| {
                let excess = limit.excess(summary.usage(*metric));
                (excess > 0).then_some((*metric, excess))
            })
            .collect();

        Ok(summary)
    }

    /// Usage rows whose period starts in `[from, to)`.
    #[instrument(skip(self))]
    pub async fn usage_history(
        &self,
        tenant_id: &str,
        metric: MetricType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, MeteringError> {
        if from >= to {
            return Ok(Vec::new());
        }
        Ok(self
            .store
            .list_usage_history(tenant_id, metric, from, to)
            .await?)
    }

    pub async fn pending_overages(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<OverageCharge>, MeteringError> {
        Ok(self.store.get_pending_overages(tenant_id).await?)
    }

    /// Sum of every pending charge together with the charges summed.
    #[instrument(skip(self))]
    pub async fn total_overage_amount(
        &self,
        tenant_id: &str,
    ) -> Result<(Decimal, Vec<OverageCharge>), MeteringError> {
        let charges = self.pending_overages(tenant_id).await?;
        let total: Decimal = charges.iter().map(|c| c.total_amount).sum();
        Ok((total, charges))
    }

    /// Stamp pending charges of `period` ending by `period_end` as billed.
    #[instrument(skip(self))]
    pub async fn mark_overages_billed(
        &self,
        tenant_id: &str,
        period: Period,
        period_end: DateTime<Utc>,
    ) -> Result<u64, MeteringError> {
        let marked = self
            .store
            .mark_overages_billed(tenant_id, period, period_end, self.clock.now())
            .await?;

        info!(marked = marked, "Overage charges marked billed");
        Ok(marked)
    }

    async fn resolve_quota(&self, tenant_id: &str) -> Result<Arc<TenantQuota>, MeteringError> {
        self.cache
            .get_with(tenant_id, || self.load_quota(tenant_id))
            .await
    }

    /// Every load refreshes the limiter: its configuration is process-local,
    /// while the quota may come from the store or the default plan.
    async fn load_quota(&self, tenant_id: &str) -> Result<TenantQuota, MeteringError> {
        let quota = match self.store.get_quota(tenant_id).await? {
            Some(quota) => quota,
            None => {
                debug!(plan = %self.default_plan, "No stored quota, using default plan");
                plan_template(&self.default_plan)
                    .map(|template| template.for_tenant(tenant_id))
                    .ok_or_else(|| MeteringError::UnknownPlan(self.default_plan.clone()))?
            }
        };

        self.configure_rate_limits(&quota).await?;
        Ok(quota)
    }

    async fn configure_rate_limits(&self, quota: &TenantQuota) -> Result<(), MeteringError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter
                .configure(&quota.tenant_id, &quota.rate_limits)
                .await
                .map_err(MeteringError::RateLimiter)?;
        }
        Ok(())
    }

    fn period_for(&self, quota: &TenantQuota) -> BillingPeriod {
        current_period(quota.billing_cycle, quota.reset_day, self.clock.now())
    }

    async fn usage_in(
        &self,
        tenant_id: &str,
        metric: MetricType,
        period: &BillingPeriod,
    ) -> Result<u64, MeteringError> {
        let record = self
            .store
            .get_usage(tenant_id, metric, period.kind, period.start)
            .await?;
        Ok(record.map_or(0, |r| r.value))
    }

    async fn bill_overage(
        &self,
        tenant_id: &str,
        metric: MetricType,
        quantity: u64,
        rate: Decimal,
        period: &BillingPeriod,
    ) -> Result<OverageCharge, MeteringError> {
        let charge = OverageCharge::new(tenant_id, metric, quantity, rate, period, self.clock.now());
        self.store.record_overage(&charge).await?;

        record_overage_charge(metric.as_str(), charge.total_amount.to_f64().unwrap_or_default());
        info!(
            charge_id = %charge.charge_id,
            quantity = quantity,
            unit_price = %rate,
            total_amount = %charge.total_amount,
            "Overage charge recorded"
        );

        Ok(charge)
    }
}
