//! Meter reading repository implementation
//!
//! Readings are written by the ingestion pipeline; this side only brackets
//! periods. Suspect readings are filtered out in SQL.

use hydro_core::{
    models::{MeterReading, ReadingQuality},
    traits::MeterReadingRepository,
    AppError, AppResult, TenantContext,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, error, instrument};

/// PostgreSQL implementation of MeterReadingRepository
pub struct PgMeterReadingRepository {
    pool: PgPool,
}

impl PgMeterReadingRepository {
    /// Create a new meter reading repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MeterReadingRepository for PgMeterReadingRepository {
    #[instrument(skip(self))]
    async fn latest_at_or_before(
        &self,
        ctx: &TenantContext,
        meter_id: &str,
        at: DateTime<Utc>,
    ) -> AppResult<Option<MeterReading>> {
        debug!("Latest reading for meter {} at or before {}", meter_id, at);

        let row = sqlx::query_as::<sqlx::Postgres, ReadingRow>(
            r#"
            SELECT id, meter_id, read_at, value, quality
            FROM meter_readings
            WHERE tenant_id = $1 AND scheme_id = $2 AND meter_id = $3
              AND read_at <= $4
              AND quality <> 'suspect'
            ORDER BY read_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(ctx.tenant_id)
        .bind(ctx.scheme_id)
        .bind(meter_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error fetching reading for {}: {}", meter_id, e);
            AppError::Database(format!("Failed to fetch meter reading: {}", e))
        })?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn earliest_after(
        &self,
        ctx: &TenantContext,
        meter_id: &str,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> AppResult<Option<MeterReading>> {
        debug!(
            "Earliest reading for meter {} in ({}, {})",
            meter_id, after, until
        );

        let row = sqlx::query_as::<sqlx::Postgres, ReadingRow>(
            r#"
            SELECT id, meter_id, read_at, value, quality
            FROM meter_readings
            WHERE tenant_id = $1 AND scheme_id = $2 AND meter_id = $3
              AND read_at > $4 AND read_at < $5
              AND quality <> 'suspect'
            ORDER BY read_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(ctx.tenant_id)
        .bind(ctx.scheme_id)
        .bind(meter_id)
        .bind(after)
        .bind(until)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error fetching reading for {}: {}", meter_id, e);
            AppError::Database(format!("Failed to fetch meter reading: {}", e))
        })?;

        Ok(row.map(Into::into))
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct ReadingRow {
    id: i64,
    meter_id: String,
    read_at: DateTime<Utc>,
    value: Decimal,
    quality: String,
}

impl From<ReadingRow> for MeterReading {
    fn from(row: ReadingRow) -> Self {
        Self {
            id: row.id,
            meter_id: row.meter_id,
            read_at: row.read_at,
            value: row.value,
            quality: ReadingQuality::from_str(&row.quality).unwrap_or(ReadingQuality::Suspect),
        }
    }
}
