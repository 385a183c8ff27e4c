//! service-core: Shared infrastructure for the metering workspace.
pub mod config;
pub mod error;
pub mod observability;
pub mod rate_limit;

pub use tracing;
