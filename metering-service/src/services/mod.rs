//! Services module for metering-service.

pub mod billing_period;
pub mod clock;
pub mod database;
pub mod memory_store;
pub mod metering;
pub mod metrics;
pub mod quota_cache;
pub mod rate_limiter;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use database::PgUsageStore;
pub use memory_store::InMemoryUsageStore;
pub use metering::{MeteringService, RecordOutcome};
pub use metrics::{get_metrics, init_metrics};
pub use quota_cache::QuotaCache;
pub use rate_limiter::{GovernorRateLimiter, RateLimiter};
pub use store::UsageStore;
