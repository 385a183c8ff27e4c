//! Common test utilities for metering-service integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use metering_service::models::{
    BillingPeriod, Limit, MetricType, OverageCharge, Period, TenantQuota, UsageRecord,
    UsageSummary,
};
use metering_service::services::{
    Clock, InMemoryUsageStore, MeteringService, RateLimiter, UsageStore,
};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,metering_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Clock whose time only moves when a test moves it.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Rate limiter with a switch, counting how often it was asked.
#[derive(Default)]
pub struct MockRateLimiter {
    pub deny: AtomicBool,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
    pub configured: Mutex<Vec<String>>,
}

impl MockRateLimiter {
    pub fn denying() -> Arc<Self> {
        let limiter = Self::default();
        limiter.deny.store(true, Ordering::SeqCst);
        Arc::new(limiter)
    }
}

#[async_trait]
impl RateLimiter for MockRateLimiter {
    async fn allow(&self, _tenant_id: &str, _metric: MetricType) -> Result<bool, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::ServiceUnavailable);
        }
        Ok(!self.deny.load(Ordering::SeqCst))
    }

    async fn configure(
        &self,
        tenant_id: &str,
        _rate_limits: &HashMap<MetricType, metering_service::models::RateLimit>,
    ) -> Result<(), AppError> {
        self.configured.lock().unwrap().push(tenant_id.to_string());
        Ok(())
    }
}

/// Store that answers quota reads from an inner store and fails everything
/// else once `failing` is set.
pub struct FailingStore {
    pub inner: InMemoryUsageStore,
    pub failing: AtomicBool,
    pub quota_reads: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryUsageStore::new(),
            failing: AtomicBool::new(false),
            quota_reads: AtomicUsize::new(0),
        })
    }

    fn check(&self) -> Result<(), AppError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(AppError::DatabaseError(anyhow::anyhow!("connection refused")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl UsageStore for FailingStore {
    async fn increment_usage(
        &self,
        tenant_id: &str,
        metric: MetricType,
        period: &BillingPeriod,
        delta: u64,
    ) -> Result<u64, AppError> {
        self.check()?;
        self.inner.increment_usage(tenant_id, metric, period, delta).await
    }

    async fn get_usage(
        &self,
        tenant_id: &str,
        metric: MetricType,
        period: Period,
        period_start: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>, AppError> {
        self.check()?;
        self.inner.get_usage(tenant_id, metric, period, period_start).await
    }

    async fn get_usage_summary(
        &self,
        tenant_id: &str,
        period: &BillingPeriod,
    ) -> Result<UsageSummary, AppError> {
        self.check()?;
        self.inner.get_usage_summary(tenant_id, period).await
    }

    async fn list_usage_history(
        &self,
        tenant_id: &str,
        metric: MetricType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, AppError> {
        self.check()?;
        self.inner.list_usage_history(tenant_id, metric, from, to).await
    }

    async fn get_quota(&self, tenant_id: &str) -> Result<Option<TenantQuota>, AppError> {
        self.quota_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_quota(tenant_id).await
    }

    async fn set_quota(&self, quota: &TenantQuota) -> Result<(), AppError> {
        self.inner.set_quota(quota).await
    }

    async fn record_overage(&self, charge: &OverageCharge) -> Result<(), AppError> {
        self.check()?;
        self.inner.record_overage(charge).await
    }

    async fn get_pending_overages(&self, tenant_id: &str) -> Result<Vec<OverageCharge>, AppError> {
        self.check()?;
        self.inner.get_pending_overages(tenant_id).await
    }

    async fn mark_overages_billed(
        &self,
        tenant_id: &str,
        period: Period,
        period_end: DateTime<Utc>,
        billed_at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        self.check()?;
        self.inner
            .mark_overages_billed(tenant_id, period, period_end, billed_at)
            .await
    }
}

/// Mid-month instant used as "now" unless a test moves the clock.
pub fn mid_march() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
}

/// Engine over the given store with a fixed clock and no rate limiter.
pub fn engine_with(store: Arc<dyn UsageStore>, clock: Arc<FixedClock>) -> MeteringService {
    init_tracing();
    MeteringService::new(store, None, Duration::from_secs(300)).with_clock(clock)
}

/// Engine over a fresh in-memory store at [`mid_march`].
pub fn engine() -> (MeteringService, Arc<InMemoryUsageStore>, Arc<FixedClock>) {
    let store = Arc::new(InMemoryUsageStore::new());
    let clock = FixedClock::at(mid_march());
    let engine = engine_with(store.clone(), clock.clone());
    (engine, store, clock)
}

/// Monthly quota with a single limited metric.
pub fn single_metric_quota(
    tenant_id: &str,
    metric: MetricType,
    limit: Limit,
    overage_rate: Option<Decimal>,
) -> TenantQuota {
    TenantQuota {
        tenant_id: tenant_id.to_string(),
        plan: "custom".to_string(),
        limits: HashMap::from([(metric, limit)]),
        rate_limits: HashMap::new(),
        overage_rates: overage_rate
            .map(|rate| HashMap::from([(metric, rate)]))
            .unwrap_or_default(),
        billing_cycle: Period::Monthly,
        reset_day: 1,
    }
}
