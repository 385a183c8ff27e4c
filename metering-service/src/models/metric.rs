//! Metered resource kinds.

use crate::error::MeteringError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A countable resource subject to quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    ApiRequests,
    StorageBytes,
    BandwidthBytes,
    #[serde(rename = "products")]
    ProductCount,
    #[serde(rename = "orders")]
    OrderCount,
    #[serde(rename = "customers")]
    CustomerCount,
    EmailsSent,
    SmsSent,
    WebhookDeliveries,
    ImageTransforms,
}

impl MetricType {
    pub const ALL: [MetricType; 10] = [
        MetricType::ApiRequests,
        MetricType::StorageBytes,
        MetricType::BandwidthBytes,
        MetricType::ProductCount,
        MetricType::OrderCount,
        MetricType::CustomerCount,
        MetricType::EmailsSent,
        MetricType::SmsSent,
        MetricType::WebhookDeliveries,
        MetricType::ImageTransforms,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::ApiRequests => "api_requests",
            MetricType::StorageBytes => "storage_bytes",
            MetricType::BandwidthBytes => "bandwidth_bytes",
            MetricType::ProductCount => "products",
            MetricType::OrderCount => "orders",
            MetricType::CustomerCount => "customers",
            MetricType::EmailsSent => "emails_sent",
            MetricType::SmsSent => "sms_sent",
            MetricType::WebhookDeliveries => "webhook_deliveries",
            MetricType::ImageTransforms => "image_transforms",
        }
    }
}

impl FromStr for MetricType {
    type Err = MeteringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricType::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| MeteringError::InvalidMetric(s.to_string()))
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
