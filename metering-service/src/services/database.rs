//! PostgreSQL usage store.

use super::metrics::STORE_QUERY_DURATION;
use super::store::UsageStore;
use crate::models::{
    BillingPeriod, Limit, MetricType, OverageCharge, Period, RateLimit, TenantQuota, UsageRecord,
    UsageSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper implementing [`UsageStore`].
#[derive(Clone)]
pub struct PgUsageStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct UsageRow {
    tenant_id: String,
    metric: String,
    period: String,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    value: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct QuotaRow {
    tenant_id: String,
    plan: String,
    limits: Json<HashMap<MetricType, Limit>>,
    rate_limits: Json<HashMap<MetricType, RateLimit>>,
    overage_rates: Json<HashMap<MetricType, Decimal>>,
    billing_cycle: String,
    reset_day: i32,
}

#[derive(sqlx::FromRow)]
struct OverageRow {
    charge_id: Uuid,
    tenant_id: String,
    metric: String,
    quantity: i64,
    unit_price: Decimal,
    total_amount: Decimal,
    period: String,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    created_at: DateTime<Utc>,
    billed_at: Option<DateTime<Utc>>,
}

fn db_error(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

fn parse_metric(value: &str) -> Result<MetricType, AppError> {
    value
        .parse::<MetricType>()
        .map_err(|e| db_error("Corrupt metric column", e))
}

fn parse_period(value: &str) -> Result<Period, AppError> {
    value
        .parse::<Period>()
        .map_err(|e| db_error("Corrupt period column", e))
}

fn to_u64(value: i64) -> Result<u64, AppError> {
    u64::try_from(value).map_err(|_| db_error("Negative counter in store", value))
}

fn to_i64(value: u64) -> Result<i64, AppError> {
    i64::try_from(value)
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Quantity {} out of range", value)))
}

impl TryFrom<UsageRow> for UsageRecord {
    type Error = AppError;

    fn try_from(row: UsageRow) -> Result<Self, Self::Error> {
        Ok(UsageRecord {
            tenant_id: row.tenant_id,
            metric: parse_metric(&row.metric)?,
            period: parse_period(&row.period)?,
            period_start: row.period_start,
            period_end: row.period_end,
            value: to_u64(row.value)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<QuotaRow> for TenantQuota {
    type Error = AppError;

    fn try_from(row: QuotaRow) -> Result<Self, Self::Error> {
        Ok(TenantQuota {
            tenant_id: row.tenant_id,
            plan: row.plan,
            limits: row.limits.0,
            rate_limits: row.rate_limits.0,
            overage_rates: row.overage_rates.0,
            billing_cycle: parse_period(&row.billing_cycle)?,
            reset_day: u32::try_from(row.reset_day)
                .map_err(|_| db_error("Invalid reset_day", row.reset_day))?,
        })
    }
}

impl TryFrom<OverageRow> for OverageCharge {
    type Error = AppError;

    fn try_from(row: OverageRow) -> Result<Self, Self::Error> {
        Ok(OverageCharge {
            charge_id: row.charge_id,
            tenant_id: row.tenant_id,
            metric: parse_metric(&row.metric)?,
            quantity: to_u64(row.quantity)?,
            unit_price: row.unit_price,
            total_amount: row.total_amount,
            period: parse_period(&row.period)?,
            period_start: row.period_start,
            period_end: row.period_end,
            created_at: row.created_at,
            billed_at: row.billed_at,
        })
    }
}

impl PgUsageStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "metering-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| db_error("Failed to connect", e))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Health check failed", e))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| db_error("Migration failed", e))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl UsageStore for PgUsageStore {
    /// Single upsert, so concurrent increments on one row serialize in
    /// PostgreSQL rather than racing a read-modify-write.
    #[instrument(skip(self, period), fields(period_start = %period.start))]
    async fn increment_usage(
        &self,
        tenant_id: &str,
        metric: MetricType,
        period: &BillingPeriod,
        delta: u64,
    ) -> Result<u64, AppError> {
        let timer = STORE_QUERY_DURATION
            .with_label_values(&["increment_usage"])
            .start_timer();

        let value = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO usage_records (tenant_id, metric, period, period_start, period_end, value)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id, metric, period, period_start)
            DO UPDATE SET value = usage_records.value + EXCLUDED.value, updated_at = NOW()
            RETURNING value
            "#,
        )
        .bind(tenant_id)
        .bind(metric.as_str())
        .bind(period.kind.as_str())
        .bind(period.start)
        .bind(period.end)
        .bind(to_i64(delta)?)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to increment usage", e))?;

        timer.observe_duration();

        to_u64(value)
    }

    #[instrument(skip(self))]
    async fn get_usage(
        &self,
        tenant_id: &str,
        metric: MetricType,
        period: Period,
        period_start: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>, AppError> {
        let timer = STORE_QUERY_DURATION
            .with_label_values(&["get_usage"])
            .start_timer();

        let row = sqlx::query_as::<_, UsageRow>(
            r#"
            SELECT tenant_id, metric, period, period_start, period_end, value, created_at, updated_at
            FROM usage_records
            WHERE tenant_id = $1 AND metric = $2 AND period = $3 AND period_start = $4
            "#,
        )
        .bind(tenant_id)
        .bind(metric.as_str())
        .bind(period.as_str())
        .bind(period_start)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get usage", e))?;

        timer.observe_duration();

        row.map(UsageRecord::try_from).transpose()
    }

    #[instrument(skip(self, period), fields(period_start = %period.start))]
    async fn get_usage_summary(
        &self,
        tenant_id: &str,
        period: &BillingPeriod,
    ) -> Result<UsageSummary, AppError> {
        let timer = STORE_QUERY_DURATION
            .with_label_values(&["get_usage_summary"])
            .start_timer();

        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT metric, value
            FROM usage_records
            WHERE tenant_id = $1 AND period = $2 AND period_start = $3
            "#,
        )
        .bind(tenant_id)
        .bind(period.kind.as_str())
        .bind(period.start)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get usage summary", e))?;

        timer.observe_duration();

        let mut metrics = HashMap::with_capacity(rows.len());
        for (metric, value) in rows {
            metrics.insert(parse_metric(&metric)?, to_u64(value)?);
        }

        Ok(UsageSummary {
            tenant_id: tenant_id.to_string(),
            period: period.kind,
            period_start: period.start,
            period_end: period.end,
            metrics,
            limits: HashMap::new(),
            overages: HashMap::new(),
        })
    }

    #[instrument(skip(self))]
    async fn list_usage_history(
        &self,
        tenant_id: &str,
        metric: MetricType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, AppError> {
        let timer = STORE_QUERY_DURATION
            .with_label_values(&["list_usage_history"])
            .start_timer();

        let rows = sqlx::query_as::<_, UsageRow>(
            r#"
            SELECT tenant_id, metric, period, period_start, period_end, value, created_at, updated_at
            FROM usage_records
            WHERE tenant_id = $1 AND metric = $2 AND period_start >= $3 AND period_start < $4
            ORDER BY period_start
            "#,
        )
        .bind(tenant_id)
        .bind(metric.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list usage history", e))?;

        timer.observe_duration();

        rows.into_iter().map(UsageRecord::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn get_quota(&self, tenant_id: &str) -> Result<Option<TenantQuota>, AppError> {
        let timer = STORE_QUERY_DURATION
            .with_label_values(&["get_quota"])
            .start_timer();

        let row = sqlx::query_as::<_, QuotaRow>(
            r#"
            SELECT tenant_id, plan, limits, rate_limits, overage_rates, billing_cycle, reset_day
            FROM tenant_quotas
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get quota", e))?;

        timer.observe_duration();

        row.map(TenantQuota::try_from).transpose()
    }

    #[instrument(skip(self, quota), fields(tenant_id = %quota.tenant_id, plan = %quota.plan))]
    async fn set_quota(&self, quota: &TenantQuota) -> Result<(), AppError> {
        let timer = STORE_QUERY_DURATION
            .with_label_values(&["set_quota"])
            .start_timer();

        let reset_day = i32::try_from(quota.reset_day).map_err(|_| {
            AppError::BadRequest(anyhow::anyhow!("Invalid reset_day {}", quota.reset_day))
        })?;

        sqlx::query(
            r#"
            INSERT INTO tenant_quotas (tenant_id, plan, limits, rate_limits, overage_rates, billing_cycle, reset_day)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tenant_id)
            DO UPDATE SET plan = EXCLUDED.plan,
                          limits = EXCLUDED.limits,
                          rate_limits = EXCLUDED.rate_limits,
                          overage_rates = EXCLUDED.overage_rates,
                          billing_cycle = EXCLUDED.billing_cycle,
                          reset_day = EXCLUDED.reset_day,
                          updated_at = NOW()
            "#,
        )
        .bind(&quota.tenant_id)
        .bind(&quota.plan)
        .bind(Json(&quota.limits))
        .bind(Json(&quota.rate_limits))
        .bind(Json(&quota.overage_rates))
        .bind(quota.billing_cycle.as_str())
        .bind(reset_day)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to set quota", e))?;

        timer.observe_duration();

        info!("Quota stored");
        Ok(())
    }

    #[instrument(skip(self, charge), fields(tenant_id = %charge.tenant_id, charge_id = %charge.charge_id))]
    async fn record_overage(&self, charge: &OverageCharge) -> Result<(), AppError> {
        let timer = STORE_QUERY_DURATION
            .with_label_values(&["record_overage"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO overage_charges (charge_id, tenant_id, metric, quantity, unit_price, total_amount, period, period_start, period_end, created_at, billed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(charge.charge_id)
        .bind(&charge.tenant_id)
        .bind(charge.metric.as_str())
        .bind(to_i64(charge.quantity)?)
        .bind(charge.unit_price)
        .bind(charge.total_amount)
        .bind(charge.period.as_str())
        .bind(charge.period_start)
        .bind(charge.period_end)
        .bind(charge.created_at)
        .bind(charge.billed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to record overage", e))?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_pending_overages(&self, tenant_id: &str) -> Result<Vec<OverageCharge>, AppError> {
        let timer = STORE_QUERY_DURATION
            .with_label_values(&["get_pending_overages"])
            .start_timer();

        let rows = sqlx::query_as::<_, OverageRow>(
            r#"
            SELECT charge_id, tenant_id, metric, quantity, unit_price, total_amount, period, period_start, period_end, created_at, billed_at
            FROM overage_charges
            WHERE tenant_id = $1 AND billed_at IS NULL
            ORDER BY created_at, charge_id
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get pending overages", e))?;

        timer.observe_duration();

        rows.into_iter().map(OverageCharge::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn mark_overages_billed(
        &self,
        tenant_id: &str,
        period: Period,
        period_end: DateTime<Utc>,
        billed_at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let timer = STORE_QUERY_DURATION
            .with_label_values(&["mark_overages_billed"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE overage_charges
            SET billed_at = $4
            WHERE tenant_id = $1 AND period = $2 AND period_end <= $3 AND billed_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(period.as_str())
        .bind(period_end)
        .bind(billed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to mark overages billed", e))?;

        timer.observe_duration();

        info!(marked = result.rows_affected(), "Overage charges marked billed");
        Ok(result.rows_affected())
    }
}
