//! Domain models for metering-service.

mod metric;
mod overage;
mod period;
mod plan;
mod quota;
mod usage;

pub use metric::MetricType;
pub use overage::OverageCharge;
pub use period::{BillingPeriod, Period};
pub use plan::{
    default_plan_quotas, plan_template, ENTERPRISE_PLAN, PRO_PLAN, STARTER_PLAN,
};
pub use quota::{Limit, RateLimit, TenantQuota};
pub use usage::{UsageRecord, UsageSummary};
