//! Overage charge model.

use super::{BillingPeriod, MetricType, Period};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Billable line item for usage beyond a tenant's limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverageCharge {
    pub charge_id: Uuid,
    pub tenant_id: String,
    pub metric: MetricType,
    pub quantity: u64,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
    pub period: Period,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub billed_at: Option<DateTime<Utc>>,
}

impl OverageCharge {
    /// Price `quantity` units at `unit_price`; the total is fixed here and
    /// never recomputed from later rate changes.
    pub fn new(
        tenant_id: &str,
        metric: MetricType,
        quantity: u64,
        unit_price: Decimal,
        period: &BillingPeriod,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            charge_id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            metric,
            quantity,
            unit_price,
            total_amount: Decimal::from(quantity) * unit_price,
            period: period.kind,
            period_start: period.start,
            period_end: period.end,
            created_at,
            billed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.billed_at.is_none()
    }
}
