//! Rejection and collaborator failure paths.

mod common;

use common::{engine_with, mid_march, single_metric_quota, FailingStore, FixedClock, MockRateLimiter};
use metering_service::models::{plan_template, Limit, MetricType, RateLimit, STARTER_PLAN};
use metering_service::services::{
    GovernorRateLimiter, InMemoryUsageStore, MeteringService, RateLimiter, UsageStore,
};
use metering_service::MeteringError;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

async fn count_rate_limited(engine: &MeteringService, tenant_id: &str, calls: usize) -> usize {
    let mut limited = 0;
    for _ in 0..calls {
        match engine
            .check_and_record(tenant_id, MetricType::ApiRequests, 1)
            .await
        {
            Ok(_) => {}
            Err(MeteringError::RateLimitExceeded { .. }) => limited += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    limited
}

#[tokio::test]
async fn rate_limited_call_has_no_side_effects() {
    let store = FailingStore::new();
    let limiter = MockRateLimiter::denying();
    let limiter_port: Arc<dyn RateLimiter> = limiter.clone();
    let engine = MeteringService::new(store.clone(), Some(limiter_port), Duration::from_secs(300))
        .with_clock(FixedClock::at(mid_march()));

    let err = engine
        .check_and_record("tenant-1", MetricType::ApiRequests, 1)
        .await
        .unwrap_err();

    assert!(matches!(err, MeteringError::RateLimitExceeded { .. }));
    assert!(err.is_retryable());
    assert_eq!(limiter.calls.load(Ordering::SeqCst), 1);
    // No quota lookup happened
    assert_eq!(store.quota_reads.load(Ordering::SeqCst), 0);
    assert!(engine.quota_cache().is_empty());

    limiter.deny.store(false, Ordering::SeqCst);
    assert_eq!(
        engine.get_current_usage("tenant-1", MetricType::ApiRequests).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn rate_limiter_failure_is_not_a_rejection() {
    let limiter = MockRateLimiter::default();
    limiter.fail.store(true, Ordering::SeqCst);
    let limiter: Arc<dyn RateLimiter> = Arc::new(limiter);
    let engine = MeteringService::new(
        Arc::new(InMemoryUsageStore::new()),
        Some(limiter),
        Duration::from_secs(300),
    );

    let err = assert_err!(
        engine
            .check_and_record("tenant-1", MetricType::ApiRequests, 1)
            .await
    );
    assert!(matches!(
        err,
        MeteringError::RateLimiter(AppError::ServiceUnavailable)
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn set_quota_configures_rate_limiter() {
    let limiter = Arc::new(MockRateLimiter::default());
    let limiter_port: Arc<dyn RateLimiter> = limiter.clone();
    let engine = MeteringService::new(
        Arc::new(InMemoryUsageStore::new()),
        Some(limiter_port),
        Duration::from_secs(300),
    );

    assert_ok!(engine.provision_tenant("tenant-1", STARTER_PLAN).await);
    assert_eq!(*limiter.configured.lock().unwrap(), vec!["tenant-1".to_string()]);
}

#[tokio::test]
async fn quota_stored_before_startup_is_rate_limited() {
    common::init_tracing();
    let store = Arc::new(InMemoryUsageStore::new());
    let starter = plan_template(STARTER_PLAN).unwrap().for_tenant("tenant-1");
    assert_ok!(store.set_quota(&starter).await);

    // A fresh limiter has never seen this tenant's quota
    let limiter: Arc<dyn RateLimiter> = Arc::new(GovernorRateLimiter::new());
    let engine = MeteringService::new(store, Some(limiter), Duration::from_secs(300));

    let limited = count_rate_limited(&engine, "tenant-1", 100).await;
    assert!(limited > 0);
}

#[tokio::test(start_paused = true)]
async fn quota_reload_does_not_refill_buckets() {
    let store = Arc::new(InMemoryUsageStore::new());
    let mut quota =
        single_metric_quota("tenant-1", MetricType::ApiRequests, Limit::Unlimited, None);
    quota.rate_limits.insert(
        MetricType::ApiRequests,
        RateLimit {
            requests_per_second: 1,
            burst_size: 5,
        },
    );
    assert_ok!(store.set_quota(&quota).await);

    let limiter: Arc<dyn RateLimiter> = Arc::new(GovernorRateLimiter::new());
    let engine = MeteringService::new(store, Some(limiter), Duration::from_secs(1));

    // The first call configures the limiter, the next five drain the burst
    for _ in 0..6 {
        assert_ok!(
            engine
                .check_and_record("tenant-1", MetricType::ApiRequests, 1)
                .await
        );
    }
    assert_eq!(count_rate_limited(&engine, "tenant-1", 1).await, 1);

    // Cached quota expires and the next admitted call would reload it
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_ok!(engine.get_quota("tenant-1").await);
    assert_eq!(count_rate_limited(&engine, "tenant-1", 1).await, 1);
}

#[tokio::test]
async fn store_failure_propagates_as_store_error() {
    let store = FailingStore::new();
    let engine = engine_with(store.clone(), FixedClock::at(mid_march()));
    engine
        .set_quota(single_metric_quota(
            "tenant-1",
            MetricType::ProductCount,
            Limit::Limited(10),
            None,
        ))
        .await
        .unwrap();

    store.failing.store(true, Ordering::SeqCst);

    let err = engine
        .check_and_record("tenant-1", MetricType::ProductCount, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, MeteringError::Store(AppError::DatabaseError(_))));
    assert_eq!(err.reason(), "store_error");

    let err = engine
        .remaining_quota("tenant-1", MetricType::ProductCount)
        .await
        .unwrap_err();
    assert!(matches!(err, MeteringError::Store(_)));
}

#[tokio::test]
async fn failed_overage_write_records_no_usage() {
    let store = FailingStore::new();
    let engine = engine_with(store.clone(), FixedClock::at(mid_march()));
    engine
        .set_quota(single_metric_quota(
            "tenant-1",
            MetricType::ApiRequests,
            Limit::Limited(0),
            Some(Decimal::ONE),
        ))
        .await
        .unwrap();

    // Quota is cached, so only usage and overage calls reach the failing store
    engine.get_quota("tenant-1").await.unwrap();
    store.failing.store(true, Ordering::SeqCst);
    assert!(engine
        .check_and_record("tenant-1", MetricType::ApiRequests, 5)
        .await
        .is_err());

    store.failing.store(false, Ordering::SeqCst);
    assert_eq!(
        engine.get_current_usage("tenant-1", MetricType::ApiRequests).await.unwrap(),
        0
    );
    assert!(engine.pending_overages("tenant-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn provisioning_unknown_plan_fails() {
    let engine = engine_with(
        Arc::new(InMemoryUsageStore::new()),
        FixedClock::at(mid_march()),
    );
    let err = engine.provision_tenant("tenant-1", "diamond").await.unwrap_err();
    assert!(matches!(err, MeteringError::UnknownPlan(ref plan) if plan == "diamond"));
    assert!(engine.quota_cache().is_empty());
}
