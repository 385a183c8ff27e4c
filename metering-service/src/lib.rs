//! metering-service: usage metering and quota enforcement for multi-tenant
//! platforms.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod startup;

pub use error::MeteringError;
