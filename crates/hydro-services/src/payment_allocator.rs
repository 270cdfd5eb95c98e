//! Payment allocation
//!
//! Incoming payments settle an account's outstanding invoices oldest-due
//! first. Whatever is left after every invoice is settled stays on the
//! payment as unallocated credit. Manual reconciliation replaces a payment's
//! allocations with an explicit invoice list.

use hydro_core::{
    models::{AllocationEntry, Invoice, InvoiceStatus, NewPayment, Payment},
    traits::{AccountRepository, InvoiceRepository, PaymentRepository},
    AppError, AppResult, TenantContext,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::constants::MONEY_DP;

/// Payment with the invoices its allocation touched
#[derive(Debug, Clone, Serialize)]
pub struct AllocationResult {
    pub payment: Payment,
    pub invoices: Vec<Invoice>,
}

/// Spread `amount` over `(invoice_id, available)` pairs in order
///
/// Returns the non-zero allocations and the unallocated remainder.
pub fn allocate(amount: Decimal, targets: &[(i64, Decimal)]) -> (Vec<AllocationEntry>, Decimal) {
    let mut remaining = amount.max(Decimal::ZERO);
    let mut entries = Vec::new();

    for &(invoice_id, available) in targets {
        if remaining.is_zero() {
            break;
        }

        let applied = remaining.min(available.max(Decimal::ZERO));
        if applied > Decimal::ZERO {
            entries.push(AllocationEntry {
                invoice_id,
                amount: applied,
            });
            remaining -= applied;
        }
    }

    (entries, remaining)
}

/// Oldest due first, then oldest period, then lowest id
pub fn fifo_order(invoices: &mut [Invoice]) {
    invoices.sort_by(|a, b| {
        a.due_date
            .cmp(&b.due_date)
            .then(a.period_start.cmp(&b.period_start))
            .then(a.id.cmp(&b.id))
    });
}

fn validate_amount(amount: Decimal) -> AppResult<()> {
    if amount <= Decimal::ZERO {
        return Err(AppError::Validation(
            "payment amount must be positive".to_string(),
        ));
    }
    if amount.normalize().scale() > MONEY_DP {
        return Err(AppError::Validation(format!(
            "payment amount {} has more than {} decimal places",
            amount, MONEY_DP
        )));
    }
    Ok(())
}

/// Matches payments to outstanding invoices
pub struct PaymentAllocator {
    invoices: Arc<dyn InvoiceRepository>,
    payments: Arc<dyn PaymentRepository>,
    accounts: Arc<dyn AccountRepository>,
}

impl PaymentAllocator {
    pub fn new(
        invoices: Arc<dyn InvoiceRepository>,
        payments: Arc<dyn PaymentRepository>,
        accounts: Arc<dyn AccountRepository>,
    ) -> Self {
        Self {
            invoices,
            payments,
            accounts,
        }
    }

    /// Record a payment and allocate it FIFO
    #[instrument(skip(self, payment), fields(account_no = %payment.account_no, amount = %payment.amount))]
    pub async fn receive(&self, ctx: &TenantContext, payment: NewPayment) -> AppResult<AllocationResult> {
        validate_amount(payment.amount)?;

        if self
            .accounts
            .find_by_number(ctx, &payment.account_no)
            .await?
            .is_none()
        {
            return Err(AppError::AccountNotFound(payment.account_no));
        }

        let mut outstanding = self
            .invoices
            .find_outstanding_by_account(ctx, &payment.account_no)
            .await?;
        fifo_order(&mut outstanding);

        let targets: Vec<(i64, Decimal)> =
            outstanding.iter().map(|i| (i.id, i.balance())).collect();
        let (entries, unallocated) = allocate(payment.amount, &targets);

        debug!(
            "Allocating {} over {} invoices, {} left as credit",
            payment.amount,
            entries.len(),
            unallocated
        );

        let (stored, invoices) = self
            .payments
            .record_with_allocations(ctx, &payment, &entries)
            .await?;

        info!(
            "Payment {} of {} recorded for {}: {} allocated, {} unallocated",
            stored.id, stored.amount, stored.account_no, stored.allocated_amount, stored.unallocated_amount
        );

        Ok(AllocationResult {
            payment: stored,
            invoices,
        })
    }

    /// Re-allocate a payment to an explicit list of invoices, in list order
    ///
    /// Prior allocations of the payment are reversed first, so their amounts
    /// count as available on the invoices they were applied to.
    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        ctx: &TenantContext,
        payment_id: i64,
        invoice_ids: &[i64],
    ) -> AppResult<AllocationResult> {
        if invoice_ids.is_empty() {
            return Err(AppError::Validation("invoice_ids must not be empty".to_string()));
        }

        let mut seen = HashSet::with_capacity(invoice_ids.len());
        if let Some(dup) = invoice_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(AppError::Validation(format!("invoice {} listed twice", dup)));
        }

        let payment = self
            .payments
            .find_by_id(ctx, payment_id)
            .await?
            .ok_or_else(|| AppError::PaymentNotFound(payment_id.to_string()))?;

        let prior: HashMap<i64, Decimal> = self
            .payments
            .find_allocations(ctx, payment_id)
            .await?
            .into_iter()
            .map(|a| (a.invoice_id, a.amount))
            .collect();

        let found: HashMap<i64, Invoice> = self
            .invoices
            .find_by_ids(ctx, invoice_ids)
            .await?
            .into_iter()
            .map(|i| (i.id, i))
            .collect();

        let mut targets = Vec::with_capacity(invoice_ids.len());
        for id in invoice_ids {
            let invoice = found
                .get(id)
                .ok_or_else(|| AppError::InvoiceNotFound(id.to_string()))?;

            if invoice.account_no != payment.account_no {
                return Err(AppError::Validation(format!(
                    "invoice {} belongs to account {}, payment {} to {}",
                    id, invoice.account_no, payment_id, payment.account_no
                )));
            }
            if invoice.status == InvoiceStatus::Void {
                return Err(AppError::Validation(format!("invoice {} is void", id)));
            }

            let available = invoice.balance() + prior.get(id).copied().unwrap_or_default();
            targets.push((*id, available));
        }

        let (entries, unallocated) = allocate(payment.amount, &targets);
        debug!(
            "Reconciling payment {} over {} invoices, {} left as credit",
            payment_id,
            entries.len(),
            unallocated
        );

        let (stored, invoices) = self
            .payments
            .replace_allocations(ctx, payment_id, &entries)
            .await?;

        info!(
            "Payment {} manually reconciled: {} allocated, {} unallocated",
            stored.id, stored.allocated_amount, stored.unallocated_amount
        );

        Ok(AllocationResult {
            payment: stored,
            invoices,
        })
    }
}
