//! Tariff repository implementation
//!
//! Tariff versions live in `tariffs`; their blocks in `tariff_blocks` ordered
//! by `seq`. Tariffs are read-only here, authoring happens elsewhere.

use hydro_core::{
    models::{Tariff, TariffBlock},
    traits::TariffRepository,
    AppError, AppResult, TenantContext,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{debug, error, instrument};

/// PostgreSQL implementation of TariffRepository
pub struct PgTariffRepository {
    pool: PgPool,
}

impl PgTariffRepository {
    /// Create a new tariff repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load blocks for a set of tariffs and attach them
    async fn attach_blocks(&self, rows: Vec<TariffRow>) -> AppResult<Vec<Tariff>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i32> = rows.iter().map(|r| r.id).collect();

        let block_rows = sqlx::query_as::<sqlx::Postgres, TariffBlockRow>(
            r#"
            SELECT tariff_id, seq, min_volume, max_volume, rate, lifeline
            FROM tariff_blocks
            WHERE tariff_id = ANY($1)
            ORDER BY tariff_id, seq
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading tariff blocks: {}", e);
            AppError::Database(format!("Failed to load tariff blocks: {}", e))
        })?;

        let mut blocks: HashMap<i32, Vec<TariffBlock>> = HashMap::new();
        for b in block_rows {
            blocks.entry(b.tariff_id).or_default().push(b.into());
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let tariff_blocks = blocks.remove(&row.id).unwrap_or_default();
                row.into_tariff(tariff_blocks)
            })
            .collect())
    }
}

#[async_trait]
impl TariffRepository for PgTariffRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, ctx: &TenantContext, id: i32) -> AppResult<Option<Tariff>> {
        debug!("Finding tariff by id: {}", id);

        let row = sqlx::query_as::<sqlx::Postgres, TariffRow>(
            r#"
            SELECT id, code, name, valid_from, valid_to, currency,
                   fixed_charge, vat_percent, created_at
            FROM tariffs
            WHERE id = $1 AND tenant_id = $2 AND scheme_id = $3
            "#,
        )
        .bind(id)
        .bind(ctx.tenant_id)
        .bind(ctx.scheme_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding tariff {}: {}", id, e);
            AppError::Database(format!("Failed to find tariff: {}", e))
        })?;

        match row {
            Some(row) => Ok(self.attach_blocks(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn find_versions(&self, ctx: &TenantContext, code: &str) -> AppResult<Vec<Tariff>> {
        debug!("Finding tariff versions for code: {}", code);

        let rows = sqlx::query_as::<sqlx::Postgres, TariffRow>(
            r#"
            SELECT id, code, name, valid_from, valid_to, currency,
                   fixed_charge, vat_percent, created_at
            FROM tariffs
            WHERE code = $1 AND tenant_id = $2 AND scheme_id = $3
            ORDER BY valid_from DESC, id DESC
            "#,
        )
        .bind(code)
        .bind(ctx.tenant_id)
        .bind(ctx.scheme_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding tariff versions {}: {}", code, e);
            AppError::Database(format!("Failed to find tariff versions: {}", e))
        })?;

        self.attach_blocks(rows).await
    }

    #[instrument(skip(self))]
    async fn count_effective(&self, ctx: &TenantContext, on: NaiveDate) -> AppResult<i64> {
        let result: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM tariffs
            WHERE tenant_id = $1 AND scheme_id = $2
              AND valid_from <= $3
              AND (valid_to IS NULL OR valid_to >= $3)
            "#,
        )
        .bind(ctx.tenant_id)
        .bind(ctx.scheme_id)
        .bind(on)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error counting effective tariffs: {}", e);
            AppError::Database(format!("Failed to count tariffs: {}", e))
        })?;

        Ok(result.0)
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct TariffRow {
    id: i32,
    code: String,
    name: String,
    valid_from: NaiveDate,
    valid_to: Option<NaiveDate>,
    currency: String,
    fixed_charge: Decimal,
    vat_percent: Option<Decimal>,
    created_at: DateTime<Utc>,
}

impl TariffRow {
    fn into_tariff(self, blocks: Vec<TariffBlock>) -> Tariff {
        Tariff {
            id: self.id,
            code: self.code,
            name: self.name,
            valid_from: self.valid_from,
            valid_to: self.valid_to,
            currency: self.currency,
            fixed_charge: self.fixed_charge,
            vat_percent: self.vat_percent,
            blocks,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TariffBlockRow {
    tariff_id: i32,
    #[allow(dead_code)]
    seq: i32,
    min_volume: Decimal,
    max_volume: Option<Decimal>,
    rate: Decimal,
    lifeline: bool,
}

impl From<TariffBlockRow> for TariffBlock {
    fn from(row: TariffBlockRow) -> Self {
        TariffBlock::new(row.min_volume, row.max_volume, row.rate, row.lifeline)
    }
}
