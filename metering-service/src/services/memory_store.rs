//! In-process usage store backed by `dashmap`.
//!
//! Each usage row lives under its own map entry and is mutated while the
//! shard write guard is held, so concurrent increments on the same row never
//! lose an update.

use super::store::UsageStore;
use crate::models::{
    BillingPeriod, MetricType, OverageCharge, Period, TenantQuota, UsageRecord, UsageSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use service_core::error::AppError;
use std::collections::HashMap;
use uuid::Uuid;

type UsageKey = (String, MetricType, Period, DateTime<Utc>);

#[derive(Debug, Default)]
pub struct InMemoryUsageStore {
    usage: DashMap<UsageKey, UsageRecord>,
    quotas: DashMap<String, TenantQuota>,
    overages: DashMap<Uuid, OverageCharge>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn increment_usage(
        &self,
        tenant_id: &str,
        metric: MetricType,
        period: &BillingPeriod,
        delta: u64,
    ) -> Result<u64, AppError> {
        let now = Utc::now();
        let key = (tenant_id.to_string(), metric, period.kind, period.start);

        let mut row = self.usage.entry(key).or_insert_with(|| UsageRecord {
            tenant_id: tenant_id.to_string(),
            metric,
            period: period.kind,
            period_start: period.start,
            period_end: period.end,
            value: 0,
            created_at: now,
            updated_at: now,
        });
        row.value = row.value.saturating_add(delta);
        row.updated_at = now;

        Ok(row.value)
    }

    async fn get_usage(
        &self,
        tenant_id: &str,
        metric: MetricType,
        period: Period,
        period_start: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>, AppError> {
        let key = (tenant_id.to_string(), metric, period, period_start);
        Ok(self.usage.get(&key).map(|row| row.value().clone()))
    }

    async fn get_usage_summary(
        &self,
        tenant_id: &str,
        period: &BillingPeriod,
    ) -> Result<UsageSummary, AppError> {
        let metrics: HashMap<MetricType, u64> = self
            .usage
            .iter()
            .filter(|row| {
                row.tenant_id == tenant_id
                    && row.period == period.kind
                    && row.period_start == period.start
            })
            .map(|row| (row.metric, row.value))
            .collect();

        Ok(UsageSummary {
            tenant_id: tenant_id.to_string(),
            period: period.kind,
            period_start: period.start,
            period_end: period.end,
            metrics,
            limits: HashMap::new(),
            overages: HashMap::new(),
        })
    }

    async fn list_usage_history(
        &self,
        tenant_id: &str,
        metric: MetricType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, AppError> {
        let mut rows: Vec<UsageRecord> = self
            .usage
            .iter()
            .filter(|row| {
                row.tenant_id == tenant_id
                    && row.metric == metric
                    && row.period_start >= from
                    && row.period_start < to
            })
            .map(|row| row.value().clone())
            .collect();

        rows.sort_by_key(|row| row.period_start);
        Ok(rows)
    }

    async fn get_quota(&self, tenant_id: &str) -> Result<Option<TenantQuota>, AppError> {
        Ok(self.quotas.get(tenant_id).map(|q| q.value().clone()))
    }

    async fn set_quota(&self, quota: &TenantQuota) -> Result<(), AppError> {
        self.quotas.insert(quota.tenant_id.clone(), quota.clone());
        Ok(())
    }

    async fn record_overage(&self, charge: &OverageCharge) -> Result<(), AppError> {
        self.overages.insert(charge.charge_id, charge.clone());
        Ok(())
    }

    async fn get_pending_overages(&self, tenant_id: &str) -> Result<Vec<OverageCharge>, AppError> {
        let mut pending: Vec<OverageCharge> = self
            .overages
            .iter()
            .filter(|c| c.tenant_id == tenant_id && c.is_pending())
            .map(|c| c.value().clone())
            .collect();

        pending.sort_by_key(|c| (c.created_at, c.charge_id));
        Ok(pending)
    }

    async fn mark_overages_billed(
        &self,
        tenant_id: &str,
        period: Period,
        period_end: DateTime<Utc>,
        billed_at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut marked = 0;
        for mut charge in self.overages.iter_mut() {
            if charge.tenant_id == tenant_id
                && charge.period == period
                && charge.period_end <= period_end
                && charge.is_pending()
            {
                charge.billed_at = Some(billed_at);
                marked += 1;
            }
        }
        Ok(marked)
    }
}
