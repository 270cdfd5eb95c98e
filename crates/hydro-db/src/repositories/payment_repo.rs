//! Payment repository implementation
//!
//! Payments and their allocations are written in one transaction. The invoice
//! update is guarded by `amount_paid + x <= total_amount`; when a concurrent
//! allocation got there first the guard fails and the whole transaction is
//! rolled back with a conflict.

use hydro_core::{
    models::{
        AllocationEntry, AllocationMode, Invoice, NewPayment, Payment, PaymentAllocation,
        PaymentChannel,
    },
    traits::PaymentRepository,
    AppError, AppResult, TenantContext,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeMap;
use tracing::{debug, error, instrument, warn};

use super::invoice_repo::{InvoiceRow, INVOICE_COLUMNS};

const PAYMENT_COLUMNS: &str = r#"
    id, tenant_id, scheme_id, account_no, paid_at, amount, channel, reference,
    allocated_amount, unallocated_amount, allocation_mode, created_at
"#;

/// PostgreSQL implementation of PaymentRepository
pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    /// Create a new payment repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply one allocation to an invoice inside a transaction
    async fn apply_allocation(
        tx: &mut Transaction<'_, Postgres>,
        ctx: &TenantContext,
        payment_id: i64,
        entry: &AllocationEntry,
    ) -> AppResult<Invoice> {
        let query = format!(
            r#"
            UPDATE invoices
            SET amount_paid = amount_paid + $4,
                status = CASE
                    WHEN amount_paid + $4 >= total_amount THEN 'paid'
                    ELSE 'partially_paid'
                END,
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND scheme_id = $3
              AND status IN ('open', 'partially_paid')
              AND amount_paid + $4 <= total_amount
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, InvoiceRow>(&query)
            .bind(entry.invoice_id)
            .bind(ctx.tenant_id)
            .bind(ctx.scheme_id)
            .bind(entry.amount)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| {
                error!("Database error applying payment to invoice: {}", e);
                AppError::Database(format!("Failed to apply payment: {}", e))
            })?
            .ok_or_else(|| {
                warn!(
                    "Allocation of {} to invoice {} rejected by balance guard",
                    entry.amount, entry.invoice_id
                );
                AppError::Conflict(format!(
                    "Invoice {} balance changed during allocation",
                    entry.invoice_id
                ))
            })?;

        sqlx::query(
            r#"
            INSERT INTO payment_allocations (payment_id, invoice_id, amount)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(payment_id)
        .bind(entry.invoice_id)
        .bind(entry.amount)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!("Database error recording allocation: {}", e);
            AppError::Database(format!("Failed to record allocation: {}", e))
        })?;

        Ok(row.into())
    }

    /// Undo one prior allocation inside a transaction
    async fn reverse_allocation(
        tx: &mut Transaction<'_, Postgres>,
        ctx: &TenantContext,
        allocation: &AllocationRow,
    ) -> AppResult<Invoice> {
        let query = format!(
            r#"
            UPDATE invoices
            SET amount_paid = CASE
                    WHEN status = 'void' THEN amount_paid
                    ELSE GREATEST(amount_paid - $4, 0)
                END,
                status = CASE
                    WHEN status = 'void' THEN status
                    WHEN amount_paid - $4 <= 0 THEN 'open'
                    ELSE 'partially_paid'
                END,
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND scheme_id = $3
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, InvoiceRow>(&query)
            .bind(allocation.invoice_id)
            .bind(ctx.tenant_id)
            .bind(ctx.scheme_id)
            .bind(allocation.amount)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| {
                error!("Database error reversing allocation: {}", e);
                AppError::Database(format!("Failed to reverse allocation: {}", e))
            })?
            .ok_or_else(|| AppError::InvoiceNotFound(allocation.invoice_id.to_string()))?;

        Ok(row.into())
    }
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    #[instrument(skip(self, payment, allocations), fields(account_no = %payment.account_no))]
    async fn record_with_allocations(
        &self,
        ctx: &TenantContext,
        payment: &NewPayment,
        allocations: &[AllocationEntry],
    ) -> AppResult<(Payment, Vec<Invoice>)> {
        let allocated: Decimal = allocations.iter().map(|a| a.amount).sum();
        debug!(
            "Recording payment of {} for {} ({} allocated)",
            payment.amount, payment.account_no, allocated
        );

        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        let query = format!(
            r#"
            INSERT INTO payments (
                tenant_id, scheme_id, account_no, paid_at, amount, channel,
                reference, allocated_amount, unallocated_amount, allocation_mode
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        );

        let stored: Payment = sqlx::query_as::<sqlx::Postgres, PaymentRow>(&query)
            .bind(ctx.tenant_id)
            .bind(ctx.scheme_id)
            .bind(&payment.account_no)
            .bind(payment.paid_at)
            .bind(payment.amount)
            .bind(payment.channel.to_string())
            .bind(&payment.reference)
            .bind(allocated)
            .bind(payment.amount - allocated)
            .bind(AllocationMode::Fifo.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                error!("Database error inserting payment: {}", e);
                AppError::Database(format!("Failed to insert payment: {}", e))
            })?
            .into();

        let mut invoices = Vec::with_capacity(allocations.len());
        for entry in allocations {
            invoices.push(Self::apply_allocation(&mut tx, ctx, stored.id, entry).await?);
        }

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        Ok((stored, invoices))
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, ctx: &TenantContext, id: i64) -> AppResult<Option<Payment>> {
        let query = format!(
            "SELECT {} FROM payments WHERE id = $1 AND tenant_id = $2 AND scheme_id = $3",
            PAYMENT_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, PaymentRow>(&query)
            .bind(id)
            .bind(ctx.tenant_id)
            .bind(ctx.scheme_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding payment {}: {}", id, e);
                AppError::Database(format!("Failed to find payment: {}", e))
            })?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_allocations(
        &self,
        ctx: &TenantContext,
        payment_id: i64,
    ) -> AppResult<Vec<PaymentAllocation>> {
        let rows = sqlx::query_as::<sqlx::Postgres, AllocationRow>(
            r#"
            SELECT pa.payment_id, pa.invoice_id, pa.amount, pa.created_at
            FROM payment_allocations pa
            JOIN payments p ON p.id = pa.payment_id
            WHERE pa.payment_id = $1 AND p.tenant_id = $2 AND p.scheme_id = $3
            ORDER BY pa.created_at, pa.invoice_id
            "#,
        )
        .bind(payment_id)
        .bind(ctx.tenant_id)
        .bind(ctx.scheme_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading allocations for {}: {}", payment_id, e);
            AppError::Database(format!("Failed to load allocations: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, allocations))]
    async fn replace_allocations(
        &self,
        ctx: &TenantContext,
        payment_id: i64,
        allocations: &[AllocationEntry],
    ) -> AppResult<(Payment, Vec<Invoice>)> {
        debug!(
            "Replacing allocations of payment {} with {} entries",
            payment_id,
            allocations.len()
        );

        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        // Lock payment row
        let lock_query = format!(
            r#"
            SELECT {}
            FROM payments
            WHERE id = $1 AND tenant_id = $2 AND scheme_id = $3
            FOR UPDATE
            "#,
            PAYMENT_COLUMNS
        );

        let payment: Payment = sqlx::query_as::<sqlx::Postgres, PaymentRow>(&lock_query)
            .bind(payment_id)
            .bind(ctx.tenant_id)
            .bind(ctx.scheme_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to lock payment: {}", e);
                AppError::Database(format!("Failed to lock payment: {}", e))
            })?
            .ok_or_else(|| AppError::PaymentNotFound(payment_id.to_string()))?
            .into();

        let previous = sqlx::query_as::<sqlx::Postgres, AllocationRow>(
            r#"
            DELETE FROM payment_allocations
            WHERE payment_id = $1
            RETURNING payment_id, invoice_id, amount, created_at
            "#,
        )
        .bind(payment_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            error!("Database error clearing allocations: {}", e);
            AppError::Database(format!("Failed to clear allocations: {}", e))
        })?;

        let mut touched: BTreeMap<i64, Invoice> = BTreeMap::new();
        for allocation in &previous {
            let invoice = Self::reverse_allocation(&mut tx, ctx, allocation).await?;
            touched.insert(invoice.id, invoice);
        }

        for entry in allocations {
            let invoice = Self::apply_allocation(&mut tx, ctx, payment.id, entry).await?;
            touched.insert(invoice.id, invoice);
        }

        let allocated: Decimal = allocations.iter().map(|a| a.amount).sum();
        let update_query = format!(
            r#"
            UPDATE payments
            SET allocated_amount = $2,
                unallocated_amount = amount - $2,
                allocation_mode = $3
            WHERE id = $1
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        );

        let updated: Payment = sqlx::query_as::<sqlx::Postgres, PaymentRow>(&update_query)
            .bind(payment.id)
            .bind(allocated)
            .bind(AllocationMode::Manual.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                error!("Database error updating payment {}: {}", payment.id, e);
                AppError::Database(format!("Failed to update payment: {}", e))
            })?
            .into();

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        Ok((updated, touched.into_values().collect()))
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: i64,
    tenant_id: i32,
    scheme_id: i32,
    account_no: String,
    paid_at: DateTime<Utc>,
    amount: Decimal,
    channel: String,
    reference: Option<String>,
    allocated_amount: Decimal,
    unallocated_amount: Decimal,
    allocation_mode: String,
    created_at: DateTime<Utc>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            scheme_id: row.scheme_id,
            account_no: row.account_no,
            paid_at: row.paid_at,
            amount: row.amount,
            channel: PaymentChannel::from_str(&row.channel).unwrap_or(PaymentChannel::Other),
            reference: row.reference,
            allocated_amount: row.allocated_amount,
            unallocated_amount: row.unallocated_amount,
            allocation_mode: AllocationMode::from_str(&row.allocation_mode)
                .unwrap_or(AllocationMode::Fifo),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AllocationRow {
    payment_id: i64,
    invoice_id: i64,
    amount: Decimal,
    created_at: DateTime<Utc>,
}

impl From<AllocationRow> for PaymentAllocation {
    fn from(row: AllocationRow) -> Self {
        Self {
            payment_id: row.payment_id,
            invoice_id: row.invoice_id,
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}
