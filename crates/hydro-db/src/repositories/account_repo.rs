//! Account repository implementation

use hydro_core::{
    models::{Account, ConnectionStatus},
    traits::AccountRepository,
    AppError, AppResult, TenantContext,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, error, instrument};

/// PostgreSQL implementation of AccountRepository
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    /// Create a new account repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Convert database status string to enum
    fn parse_status(s: &str) -> ConnectionStatus {
        ConnectionStatus::from_str(s).unwrap_or(ConnectionStatus::Suspended)
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    #[instrument(skip(self))]
    async fn find_by_number(
        &self,
        ctx: &TenantContext,
        account_no: &str,
    ) -> AppResult<Option<Account>> {
        debug!("Finding account by number: {}", account_no);

        let result = sqlx::query_as::<sqlx::Postgres, AccountRow>(
            r#"
            SELECT
                id, account_no, customer_name, tariff_id, meter_id,
                category, status, meter_max_value,
                created_at, updated_at
            FROM accounts
            WHERE account_no = $1 AND tenant_id = $2 AND scheme_id = $3
            "#,
        )
        .bind(account_no)
        .bind(ctx.tenant_id)
        .bind(ctx.scheme_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding account by number: {}", e);
            AppError::Database(format!("Failed to find account: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn list_billable(
        &self,
        ctx: &TenantContext,
        segment: Option<&str>,
        limit: Option<i64>,
    ) -> AppResult<Vec<Account>> {
        debug!(
            "Listing billable accounts: segment={:?}, limit={:?}",
            segment, limit
        );

        let rows = sqlx::query_as::<sqlx::Postgres, AccountRow>(
            r#"
            SELECT
                id, account_no, customer_name, tariff_id, meter_id,
                category, status, meter_max_value,
                created_at, updated_at
            FROM accounts
            WHERE tenant_id = $1 AND scheme_id = $2
              AND status = 'active'
              AND ($3::TEXT IS NULL OR LOWER(category) = LOWER($3))
            ORDER BY account_no
            LIMIT $4
            "#,
        )
        .bind(ctx.tenant_id)
        .bind(ctx.scheme_id)
        .bind(segment)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error listing billable accounts: {}", e);
            AppError::Database(format!("Failed to fetch accounts: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: i32,
    account_no: String,
    customer_name: String,
    tariff_id: i32,
    meter_id: String,
    category: String,
    status: String,
    meter_max_value: Option<Decimal>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.id,
            account_no: row.account_no,
            customer_name: row.customer_name,
            tariff_id: row.tariff_id,
            meter_id: row.meter_id,
            category: row.category,
            status: PgAccountRepository::parse_status(&row.status),
            meter_max_value: row.meter_max_value,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
