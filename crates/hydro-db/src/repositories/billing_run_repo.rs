//! Billing run repository implementation
//!
//! Run exclusivity is enforced by the partial unique index
//! `billing_runs_active_uq`, so two orchestrators racing on the same period
//! cannot both open a run. Status changes are compare-and-set on the stored
//! status. Opening a run first fails any stale active run for the period, in
//! the same transaction.

use hydro_core::{
    models::{
        BillingRun, BillingRunStatus, NewBillingRun, RunCounters, RunError, ABANDONED_RUN_REASON,
    },
    traits::BillingRunRepository,
    AppError, AppResult, TenantContext,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::is_unique_violation;

const RUN_COLUMNS: &str = r#"
    id, tenant_id, scheme_id, period_start, period_end, due_date, segment,
    status, accounts_processed, invoices_generated, accounts_skipped,
    total_billed, created_at, started_at, completed_at
"#;

/// PostgreSQL implementation of BillingRunRepository
pub struct PgBillingRunRepository {
    pool: PgPool,
}

impl PgBillingRunRepository {
    /// Create a new billing run repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Parse run status from string
    fn parse_status(s: &str) -> BillingRunStatus {
        BillingRunStatus::from_str(s).unwrap_or(BillingRunStatus::Failed)
    }

    async fn load_errors(&self, run_id: Uuid) -> AppResult<Vec<RunError>> {
        let rows = sqlx::query_as::<sqlx::Postgres, RunErrorRow>(
            r#"
            SELECT account_no, reason
            FROM billing_run_errors
            WHERE run_id = $1
            ORDER BY id
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading run errors for {}: {}", run_id, e);
            AppError::Database(format!("Failed to load run errors: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl BillingRunRepository for PgBillingRunRepository {
    #[instrument(skip(self, run), fields(period_start = %run.period.start, period_end = %run.period.end))]
    async fn create_active(&self, ctx: &TenantContext, run: &NewBillingRun) -> AppResult<BillingRun> {
        let id = Uuid::now_v7();
        debug!("Opening billing run {}", id);

        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        if let Some(cutoff) = run.stale_before {
            // Fail abandoned runs so they stop holding the active index
            let reclaimed = sqlx::query(
                r#"
                WITH stale AS (
                    UPDATE billing_runs
                    SET status = 'failed', completed_at = NOW()
                    WHERE tenant_id = $1 AND scheme_id = $2
                      AND period_start = $3 AND period_end = $4
                      AND status IN ('pending', 'processing')
                      AND COALESCE(started_at, created_at) < $5
                    RETURNING id
                )
                INSERT INTO billing_run_errors (run_id, account_no, reason)
                SELECT id, NULL, $6 FROM stale
                "#,
            )
            .bind(ctx.tenant_id)
            .bind(ctx.scheme_id)
            .bind(run.period.start)
            .bind(run.period.end)
            .bind(cutoff)
            .bind(ABANDONED_RUN_REASON)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Database error reclaiming stale runs: {}", e);
                AppError::Database(format!("Failed to reclaim stale runs: {}", e))
            })?
            .rows_affected();

            if reclaimed > 0 {
                warn!(
                    "Reclaimed {} abandoned run(s) for {} {}..{}",
                    reclaimed, ctx, run.period.start, run.period.end
                );
            }
        }

        let query = format!(
            r#"
            INSERT INTO billing_runs (
                id, tenant_id, scheme_id, period_start, period_end, due_date,
                segment, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
            RETURNING {}
            "#,
            RUN_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, BillingRunRow>(&query)
            .bind(id)
            .bind(ctx.tenant_id)
            .bind(ctx.scheme_id)
            .bind(run.period.start)
            .bind(run.period.end)
            .bind(run.due_date)
            .bind(&run.segment)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    warn!(
                        "Billing run already active for {} {}..{}",
                        ctx, run.period.start, run.period.end
                    );
                    AppError::ConcurrentRun {
                        period_start: run.period.start,
                        period_end: run.period.end,
                    }
                } else {
                    error!("Database error creating billing run: {}", e);
                    AppError::Database(format!("Failed to create billing run: {}", e))
                }
            })?;

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(row.into_run(Vec::new()))
    }

    #[instrument(skip(self, counters))]
    async fn transition(
        &self,
        ctx: &TenantContext,
        id: Uuid,
        from: BillingRunStatus,
        to: BillingRunStatus,
        counters: Option<&RunCounters>,
    ) -> AppResult<BillingRun> {
        from.transition(to)?;
        debug!("Billing run {} {} -> {}", id, from, to);

        let query = format!(
            r#"
            UPDATE billing_runs
            SET status = $4,
                started_at = CASE WHEN $4 = 'processing' THEN NOW() ELSE started_at END,
                completed_at = CASE WHEN $4 IN ('completed', 'failed') THEN NOW() ELSE completed_at END,
                accounts_processed = COALESCE($5, accounts_processed),
                invoices_generated = COALESCE($6, invoices_generated),
                accounts_skipped = COALESCE($7, accounts_skipped),
                total_billed = COALESCE($8, total_billed)
            WHERE id = $1 AND tenant_id = $2 AND scheme_id = $3 AND status = $9
            RETURNING {}
            "#,
            RUN_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, BillingRunRow>(&query)
            .bind(id)
            .bind(ctx.tenant_id)
            .bind(ctx.scheme_id)
            .bind(to.to_string())
            .bind(counters.map(|c| c.accounts_processed))
            .bind(counters.map(|c| c.invoices_generated))
            .bind(counters.map(|c| c.accounts_skipped))
            .bind(counters.map(|c| c.total_billed))
            .bind(from.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error transitioning run {}: {}", id, e);
                AppError::Database(format!("Failed to update billing run: {}", e))
            })?
            .ok_or_else(|| AppError::Conflict(format!("Billing run {} is no longer {}", id, from)))?;

        let errors = self.load_errors(id).await?;
        Ok(row.into_run(errors))
    }

    #[instrument(skip(self, run_error))]
    async fn append_error(&self, ctx: &TenantContext, id: Uuid, run_error: &RunError) -> AppResult<()> {
        debug!(
            "Recording error on run {}: {:?} {}",
            id, run_error.account_no, run_error.reason
        );

        sqlx::query(
            r#"
            INSERT INTO billing_run_errors (run_id, account_no, reason)
            SELECT id, $4, $5
            FROM billing_runs
            WHERE id = $1 AND tenant_id = $2 AND scheme_id = $3
            "#,
        )
        .bind(id)
        .bind(ctx.tenant_id)
        .bind(ctx.scheme_id)
        .bind(&run_error.account_no)
        .bind(&run_error.reason)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error appending run error for {}: {}", id, e);
            AppError::Database(format!("Failed to record run error: {}", e))
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, ctx: &TenantContext, id: Uuid) -> AppResult<Option<BillingRun>> {
        debug!("Finding billing run by id: {}", id);

        let query = format!(
            "SELECT {} FROM billing_runs WHERE id = $1 AND tenant_id = $2 AND scheme_id = $3",
            RUN_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, BillingRunRow>(&query)
            .bind(id)
            .bind(ctx.tenant_id)
            .bind(ctx.scheme_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding billing run {}: {}", id, e);
                AppError::Database(format!("Failed to find billing run: {}", e))
            })?;

        match row {
            Some(row) => {
                let errors = self.load_errors(id).await?;
                Ok(Some(row.into_run(errors)))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        ctx: &TenantContext,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<BillingRun>, i64)> {
        debug!("Listing billing runs limit={} offset={}", limit, offset);

        let total: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM billing_runs WHERE tenant_id = $1 AND scheme_id = $2",
        )
        .bind(ctx.tenant_id)
        .bind(ctx.scheme_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error counting billing runs: {}", e);
            AppError::Database(format!("Failed to count billing runs: {}", e))
        })?;

        let query = format!(
            r#"
            SELECT {}
            FROM billing_runs
            WHERE tenant_id = $1 AND scheme_id = $2
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
            RUN_COLUMNS
        );

        let rows = sqlx::query_as::<sqlx::Postgres, BillingRunRow>(&query)
            .bind(ctx.tenant_id)
            .bind(ctx.scheme_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error listing billing runs: {}", e);
                AppError::Database(format!("Failed to list billing runs: {}", e))
            })?;

        // Error logs are only loaded for single-run lookups
        Ok((
            rows.into_iter().map(|r| r.into_run(Vec::new())).collect(),
            total.0,
        ))
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct BillingRunRow {
    id: Uuid,
    tenant_id: i32,
    scheme_id: i32,
    period_start: NaiveDate,
    period_end: NaiveDate,
    due_date: NaiveDate,
    segment: Option<String>,
    status: String,
    accounts_processed: i32,
    invoices_generated: i32,
    accounts_skipped: i32,
    total_billed: Decimal,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl BillingRunRow {
    fn into_run(self, error_log: Vec<RunError>) -> BillingRun {
        BillingRun {
            id: self.id,
            tenant_id: self.tenant_id,
            scheme_id: self.scheme_id,
            period_start: self.period_start,
            period_end: self.period_end,
            due_date: self.due_date,
            segment: self.segment,
            status: PgBillingRunRepository::parse_status(&self.status),
            accounts_processed: self.accounts_processed,
            invoices_generated: self.invoices_generated,
            accounts_skipped: self.accounts_skipped,
            total_billed: self.total_billed,
            error_log,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RunErrorRow {
    account_no: Option<String>,
    reason: String,
}

impl From<RunErrorRow> for RunError {
    fn from(row: RunErrorRow) -> Self {
        Self {
            account_no: row.account_no,
            reason: row.reason,
        }
    }
}
