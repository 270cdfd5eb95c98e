//! Invoice repository implementation
//!
//! Invoice creation is idempotent on (tenant, account, period): the insert
//! uses `ON CONFLICT DO NOTHING` against `invoices_account_period_uq`, and the
//! invoice header and its lines are written in one transaction.

use hydro_core::{
    models::{InsertOutcome, Invoice, InvoiceStatus, NewInvoice, OutstandingInvoice},
    traits::InvoiceRepository,
    AppError, AppResult, TenantContext,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, error, instrument};
use uuid::Uuid;

pub(crate) const INVOICE_COLUMNS: &str = r#"
    id, tenant_id, scheme_id, account_no, billing_run_id, tariff_id,
    period_start, period_end, due_date, currency, consumption, estimated,
    fixed_charge, tax_amount, total_amount, amount_paid, status,
    created_at, updated_at
"#;

/// PostgreSQL implementation of InvoiceRepository
pub struct PgInvoiceRepository {
    pool: PgPool,
}

impl PgInvoiceRepository {
    /// Create a new invoice repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvoiceRepository for PgInvoiceRepository {
    #[instrument(skip(self))]
    async fn exists_for_period(
        &self,
        ctx: &TenantContext,
        account_no: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> AppResult<bool> {
        let result: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM invoices
                WHERE tenant_id = $1 AND account_no = $2
                  AND period_start = $3 AND period_end = $4
            )
            "#,
        )
        .bind(ctx.tenant_id)
        .bind(account_no)
        .bind(period_start)
        .bind(period_end)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error checking invoice for {}: {}", account_no, e);
            AppError::Database(format!("Failed to check invoice: {}", e))
        })?;

        Ok(result.0)
    }

    #[instrument(skip(self, invoice), fields(account_no = %invoice.account_no))]
    async fn insert_with_lines(
        &self,
        ctx: &TenantContext,
        invoice: &NewInvoice,
    ) -> AppResult<InsertOutcome> {
        debug!(
            "Writing invoice for {} {}..{} total {}",
            invoice.account_no, invoice.period_start, invoice.period_end, invoice.total_amount
        );

        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        let query = format!(
            r#"
            INSERT INTO invoices (
                tenant_id, scheme_id, account_no, billing_run_id, tariff_id,
                period_start, period_end, due_date, currency, consumption,
                estimated, fixed_charge, tax_amount, total_amount, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 'open')
            ON CONFLICT ON CONSTRAINT invoices_account_period_uq DO NOTHING
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        );

        let inserted = sqlx::query_as::<sqlx::Postgres, InvoiceRow>(&query)
            .bind(ctx.tenant_id)
            .bind(ctx.scheme_id)
            .bind(&invoice.account_no)
            .bind(invoice.billing_run_id)
            .bind(invoice.tariff_id)
            .bind(invoice.period_start)
            .bind(invoice.period_end)
            .bind(invoice.due_date)
            .bind(&invoice.currency)
            .bind(invoice.consumption)
            .bind(invoice.estimated)
            .bind(invoice.fixed_charge)
            .bind(invoice.tax_amount)
            .bind(invoice.total_amount)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                error!("Database error inserting invoice: {}", e);
                AppError::Database(format!("Failed to insert invoice: {}", e))
            })?;

        let row = match inserted {
            Some(row) => row,
            None => {
                debug!("Invoice already exists for {}", invoice.account_no);
                return Ok(InsertOutcome::AlreadyExists);
            }
        };

        for line in &invoice.lines {
            sqlx::query(
                r#"
                INSERT INTO invoice_lines (
                    invoice_id, kind, description, quantity, unit_price,
                    amount, tariff_block, lifeline, estimated
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(row.id)
            .bind(line.kind.to_string())
            .bind(&line.description)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.amount)
            .bind(line.tariff_block)
            .bind(line.lifeline)
            .bind(line.estimated)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Database error inserting invoice line: {}", e);
                AppError::Database(format!("Failed to insert invoice line: {}", e))
            })?;
        }

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(InsertOutcome::Created(row.into()))
    }

    #[instrument(skip(self))]
    async fn recent_consumption(
        &self,
        ctx: &TenantContext,
        account_no: &str,
        before: NaiveDate,
        limit: i64,
    ) -> AppResult<Vec<Decimal>> {
        let rows: Vec<(Decimal,)> = sqlx::query_as(
            r#"
            SELECT consumption
            FROM invoices
            WHERE tenant_id = $1 AND scheme_id = $2 AND account_no = $3
              AND period_end < $4
              AND status <> 'void'
            ORDER BY period_end DESC
            LIMIT $5
            "#,
        )
        .bind(ctx.tenant_id)
        .bind(ctx.scheme_id)
        .bind(account_no)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading consumption history: {}", e);
            AppError::Database(format!("Failed to load consumption history: {}", e))
        })?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self))]
    async fn find_outstanding_by_account(
        &self,
        ctx: &TenantContext,
        account_no: &str,
    ) -> AppResult<Vec<Invoice>> {
        let query = format!(
            r#"
            SELECT {}
            FROM invoices
            WHERE tenant_id = $1 AND scheme_id = $2 AND account_no = $3
              AND status IN ('open', 'partially_paid')
            ORDER BY due_date, period_start, id
            "#,
            INVOICE_COLUMNS
        );

        let rows = sqlx::query_as::<sqlx::Postgres, InvoiceRow>(&query)
            .bind(ctx.tenant_id)
            .bind(ctx.scheme_id)
            .bind(account_no)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error loading open invoices for {}: {}", account_no, e);
                AppError::Database(format!("Failed to load invoices: {}", e))
            })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn find_by_ids(&self, ctx: &TenantContext, ids: &[i64]) -> AppResult<Vec<Invoice>> {
        let query = format!(
            r#"
            SELECT {}
            FROM invoices
            WHERE tenant_id = $1 AND scheme_id = $2 AND id = ANY($3)
            "#,
            INVOICE_COLUMNS
        );

        let rows = sqlx::query_as::<sqlx::Postgres, InvoiceRow>(&query)
            .bind(ctx.tenant_id)
            .bind(ctx.scheme_id)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error loading invoices by id: {}", e);
                AppError::Database(format!("Failed to load invoices: {}", e))
            })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn list_outstanding(&self, ctx: &TenantContext) -> AppResult<Vec<OutstandingInvoice>> {
        let rows = sqlx::query_as::<sqlx::Postgres, OutstandingRow>(
            r#"
            SELECT i.id AS invoice_id, i.account_no,
                   COALESCE(a.customer_name, '') AS customer_name,
                   i.due_date, i.total_amount - i.amount_paid AS balance
            FROM invoices i
            LEFT JOIN accounts a
              ON a.tenant_id = i.tenant_id AND a.account_no = i.account_no
            WHERE i.tenant_id = $1 AND i.scheme_id = $2
              AND i.status IN ('open', 'partially_paid')
              AND i.total_amount > i.amount_paid
            ORDER BY i.account_no, i.due_date
            "#,
        )
        .bind(ctx.tenant_id)
        .bind(ctx.scheme_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error listing outstanding invoices: {}", e);
            AppError::Database(format!("Failed to list outstanding invoices: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn billed_between(
        &self,
        ctx: &TenantContext,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Decimal> {
        let result: (Decimal,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(total_amount), 0)
            FROM invoices
            WHERE tenant_id = $1 AND scheme_id = $2
              AND period_end BETWEEN $3 AND $4
              AND status <> 'void'
            "#,
        )
        .bind(ctx.tenant_id)
        .bind(ctx.scheme_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error summing billed amount: {}", e);
            AppError::Database(format!("Failed to sum billed amount: {}", e))
        })?;

        Ok(result.0)
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct InvoiceRow {
    id: i64,
    tenant_id: i32,
    scheme_id: i32,
    account_no: String,
    billing_run_id: Option<Uuid>,
    tariff_id: i32,
    period_start: NaiveDate,
    period_end: NaiveDate,
    due_date: NaiveDate,
    currency: String,
    consumption: Decimal,
    estimated: bool,
    fixed_charge: Decimal,
    tax_amount: Decimal,
    total_amount: Decimal,
    amount_paid: Decimal,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<InvoiceRow> for Invoice {
    fn from(row: InvoiceRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            scheme_id: row.scheme_id,
            account_no: row.account_no,
            billing_run_id: row.billing_run_id,
            tariff_id: row.tariff_id,
            period_start: row.period_start,
            period_end: row.period_end,
            due_date: row.due_date,
            currency: row.currency,
            consumption: row.consumption,
            estimated: row.estimated,
            fixed_charge: row.fixed_charge,
            tax_amount: row.tax_amount,
            total_amount: row.total_amount,
            amount_paid: row.amount_paid,
            status: InvoiceStatus::from_str(&row.status).unwrap_or(InvoiceStatus::Open),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OutstandingRow {
    invoice_id: i64,
    account_no: String,
    customer_name: String,
    due_date: NaiveDate,
    balance: Decimal,
}

impl From<OutstandingRow> for OutstandingInvoice {
    fn from(row: OutstandingRow) -> Self {
        Self {
            invoice_id: row.invoice_id,
            account_no: row.account_no,
            customer_name: row.customer_name,
            due_date: row.due_date,
            balance: row.balance,
        }
    }
}
