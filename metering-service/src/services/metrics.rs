//! Metrics module for metering-service.
//! Provides Prometheus metrics for admission decisions, usage and overage billing.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_counter_vec, register_histogram_vec, register_int_counter_vec,
    CounterVec, Encoder, HistogramVec, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Store query duration histogram
pub static STORE_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "metering_store_query_duration_seconds",
            "Usage store query duration",
            vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
        ),
        &["operation"]
    )
    .expect("Failed to register STORE_QUERY_DURATION")
});

/// Units of usage recorded, by metric and path (checked or unconditional)
pub static USAGE_RECORDED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Rejected metering calls by metric and reason
pub static REJECTIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Overage charges created by metric
pub static OVERAGE_CHARGES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Overage amount charged by metric (monetary tracking)
pub static OVERAGE_AMOUNT_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Quota cache lookups by result (hit, miss, expired)
pub static QUOTA_CACHE_LOOKUPS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Safe to call more than once.
pub fn init_metrics() {
    USAGE_RECORDED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_usage_recorded_total",
                "Total units of usage recorded by metric and path"
            ),
            &["metric", "path"]
        )
        .expect("Failed to register USAGE_RECORDED_TOTAL")
    });

    REJECTIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_rejections_total",
                "Total rejected metering calls by metric and reason"
            ),
            &["metric", "reason"]
        )
        .expect("Failed to register REJECTIONS_TOTAL")
    });

    OVERAGE_CHARGES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_overage_charges_total",
                "Total overage charges created by metric"
            ),
            &["metric"]
        )
        .expect("Failed to register OVERAGE_CHARGES_TOTAL")
    });

    OVERAGE_AMOUNT_TOTAL.get_or_init(|| {
        register_counter_vec!(
            opts!(
                "metering_overage_amount_total",
                "Total overage amount charged by metric"
            ),
            &["metric"]
        )
        .expect("Failed to register OVERAGE_AMOUNT_TOTAL")
    });

    QUOTA_CACHE_LOOKUPS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_quota_cache_lookups_total",
                "Total quota cache lookups by result"
            ),
            &["result"]
        )
        .expect("Failed to register QUOTA_CACHE_LOOKUPS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*STORE_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record units of usage.
pub fn record_usage(metric: &str, path: &str, units: u64) {
    if let Some(counter) = USAGE_RECORDED_TOTAL.get() {
        counter.with_label_values(&[metric, path]).inc_by(units);
    }
}

/// Record a rejected call.
pub fn record_rejection(metric: &str, reason: &str) {
    if let Some(counter) = REJECTIONS_TOTAL.get() {
        counter.with_label_values(&[metric, reason]).inc();
    }
}

/// Record an overage charge and its amount.
pub fn record_overage_charge(metric: &str, amount: f64) {
    if let Some(counter) = OVERAGE_CHARGES_TOTAL.get() {
        counter.with_label_values(&[metric]).inc();
    }
    if let Some(counter) = OVERAGE_AMOUNT_TOTAL.get() {
        counter.with_label_values(&[metric]).inc_by(amount.abs());
    }
}

/// Record a quota cache lookup.
pub fn record_cache_lookup(result: &str) {
    if let Some(counter) = QUOTA_CACHE_LOOKUPS_TOTAL.get() {
        counter.with_label_values(&[result]).inc();
    }
}
