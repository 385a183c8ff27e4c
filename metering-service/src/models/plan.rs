//! Default plan quota templates.
//!
//! Provisioning copies one of these into a tenant's quota when the tenant
//! first subscribes to a plan. The tenant id on the templates is empty.

use super::{Limit, MetricType, Period, RateLimit, TenantQuota};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use std::collections::HashMap;

pub const STARTER_PLAN: &str = "starter";
pub const PRO_PLAN: &str = "pro";
pub const ENTERPRISE_PLAN: &str = "enterprise";

const GIB: u64 = 1024 * 1024 * 1024;

static DEFAULT_PLAN_QUOTAS: Lazy<HashMap<&'static str, TenantQuota>> = Lazy::new(|| {
    HashMap::from([
        (STARTER_PLAN, starter()),
        (PRO_PLAN, pro()),
        (ENTERPRISE_PLAN, enterprise()),
    ])
});

/// All default plan templates keyed by plan name.
pub fn default_plan_quotas() -> &'static HashMap<&'static str, TenantQuota> {
    &DEFAULT_PLAN_QUOTAS
}

/// Template for a single plan.
pub fn plan_template(plan: &str) -> Option<&'static TenantQuota> {
    DEFAULT_PLAN_QUOTAS.get(plan)
}

fn starter() -> TenantQuota {
    TenantQuota {
        tenant_id: String::new(),
        plan: STARTER_PLAN.to_string(),
        limits: HashMap::from([
            (MetricType::ApiRequests, Limit::Limited(100_000)),
            (MetricType::StorageBytes, Limit::Limited(GIB)),
            (MetricType::ProductCount, Limit::Limited(100)),
            (MetricType::OrderCount, Limit::Limited(500)),
            (MetricType::EmailsSent, Limit::Limited(1_000)),
            (MetricType::SmsSent, Limit::Limited(100)),
            (MetricType::WebhookDeliveries, Limit::Limited(10_000)),
        ]),
        rate_limits: HashMap::from([(
            MetricType::ApiRequests,
            RateLimit {
                requests_per_second: 10,
                burst_size: 20,
            },
        )]),
        overage_rates: HashMap::from([
            // $0.0001 per request
            (MetricType::ApiRequests, Decimal::new(1, 4)),
            // ~$0.01 per GB
            (MetricType::StorageBytes, Decimal::new(1, 8)),
            (MetricType::EmailsSent, Decimal::new(1, 3)),
        ]),
        billing_cycle: Period::Monthly,
        reset_day: 1,
    }
}

fn pro() -> TenantQuota {
    TenantQuota {
        tenant_id: String::new(),
        plan: PRO_PLAN.to_string(),
        limits: HashMap::from([
            (MetricType::ApiRequests, Limit::Limited(1_000_000)),
            (MetricType::StorageBytes, Limit::Limited(10 * GIB)),
            (MetricType::ProductCount, Limit::Limited(10_000)),
            (MetricType::OrderCount, Limit::Limited(10_000)),
            (MetricType::EmailsSent, Limit::Limited(10_000)),
            (MetricType::SmsSent, Limit::Limited(1_000)),
            (MetricType::WebhookDeliveries, Limit::Limited(100_000)),
        ]),
        rate_limits: HashMap::from([(
            MetricType::ApiRequests,
            RateLimit {
                requests_per_second: 100,
                burst_size: 200,
            },
        )]),
        overage_rates: HashMap::from([
            (MetricType::ApiRequests, Decimal::new(5, 5)),
            (MetricType::StorageBytes, Decimal::new(5, 9)),
            (MetricType::EmailsSent, Decimal::new(5, 4)),
        ]),
        billing_cycle: Period::Monthly,
        reset_day: 1,
    }
}

fn enterprise() -> TenantQuota {
    TenantQuota {
        tenant_id: String::new(),
        plan: ENTERPRISE_PLAN.to_string(),
        limits: [
            MetricType::ApiRequests,
            MetricType::StorageBytes,
            MetricType::ProductCount,
            MetricType::OrderCount,
            MetricType::EmailsSent,
            MetricType::SmsSent,
            MetricType::WebhookDeliveries,
        ]
        .into_iter()
        .map(|metric| (metric, Limit::Unlimited))
        .collect(),
        rate_limits: HashMap::from([(
            MetricType::ApiRequests,
            RateLimit {
                requests_per_second: 1_000,
                burst_size: 2_000,
            },
        )]),
        overage_rates: HashMap::new(),
        billing_cycle: Period::Monthly,
        reset_day: 1,
    }
}
