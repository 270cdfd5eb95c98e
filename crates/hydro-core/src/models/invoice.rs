//! Invoice and invoice line models
//!
//! An invoice is written once per (account, period) and afterwards only
//! changes through payment allocation. Totals are rounded once at the invoice
//! level; line amounts are kept unrounded.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    #[default]
    Open,
    PartiallyPaid,
    Paid,
    Void,
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvoiceStatus::Open => write!(f, "open"),
            InvoiceStatus::PartiallyPaid => write!(f, "partially_paid"),
            InvoiceStatus::Paid => write!(f, "paid"),
            InvoiceStatus::Void => write!(f, "void"),
        }
    }
}

impl InvoiceStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "open" => Some(InvoiceStatus::Open),
            "partially_paid" => Some(InvoiceStatus::PartiallyPaid),
            "paid" => Some(InvoiceStatus::Paid),
            "void" => Some(InvoiceStatus::Void),
            _ => None,
        }
    }

    /// Open and partially paid invoices accept payments
    pub fn is_outstanding(&self) -> bool {
        matches!(self, InvoiceStatus::Open | InvoiceStatus::PartiallyPaid)
    }

    /// Status implied by the amount paid against a total
    pub fn for_amounts(total: Decimal, paid: Decimal) -> Self {
        if paid >= total {
            InvoiceStatus::Paid
        } else if paid > Decimal::ZERO {
            InvoiceStatus::PartiallyPaid
        } else {
            InvoiceStatus::Open
        }
    }
}

/// Kind of invoice line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    /// Consumption billed within a tariff block
    #[default]
    Block,
    /// VAT on the invoice subtotal
    Tax,
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineKind::Block => write!(f, "block"),
            LineKind::Tax => write!(f, "tax"),
        }
    }
}

impl LineKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "block" => Some(LineKind::Block),
            "tax" => Some(LineKind::Tax),
            _ => None,
        }
    }
}

/// Line to be written with a new invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInvoiceLine {
    pub kind: LineKind,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    /// 1-based index of the tariff block, None for tax lines
    pub tariff_block: Option<i32>,
    pub lifeline: bool,
    pub estimated: bool,
}

/// Persisted invoice line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: i64,
    pub invoice_id: i64,
    pub kind: LineKind,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub tariff_block: Option<i32>,
    pub lifeline: bool,
    pub estimated: bool,
}

/// Invoice to be written by a billing run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoice {
    pub account_no: String,
    pub billing_run_id: Option<Uuid>,
    pub tariff_id: i32,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub due_date: NaiveDate,
    pub currency: String,
    pub consumption: Decimal,
    pub estimated: bool,
    pub fixed_charge: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub lines: Vec<NewInvoiceLine>,
}

impl NewInvoice {
    /// Difference between the rounded total and `fixed_charge + Σ lines`
    pub fn rounding_residual(&self) -> Decimal {
        let lines: Decimal = self.lines.iter().map(|l| l.amount).sum();
        (self.total_amount - (self.fixed_charge + lines)).abs()
    }
}

/// Result of an idempotent invoice insert
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// A new invoice was written together with its lines
    Created(Invoice),
    /// An invoice already exists for (account, period); nothing was written
    AlreadyExists,
}

/// Invoice entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub tenant_id: i32,
    pub scheme_id: i32,
    pub account_no: String,
    pub billing_run_id: Option<Uuid>,
    pub tariff_id: i32,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub due_date: NaiveDate,
    pub currency: String,
    pub consumption: Decimal,
    pub estimated: bool,
    pub fixed_charge: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Outstanding balance (never negative)
    #[inline]
    pub fn balance(&self) -> Decimal {
        (self.total_amount - self.amount_paid).max(Decimal::ZERO)
    }

    /// Apply a payment amount, updating status; returns the amount applied
    pub fn apply_payment(&mut self, amount: Decimal) -> Decimal {
        let applied = amount.min(self.balance()).max(Decimal::ZERO);
        self.amount_paid += applied;
        self.status = InvoiceStatus::for_amounts(self.total_amount, self.amount_paid);
        applied
    }

    /// Reverse a previously applied amount. Void invoices keep their
    /// recorded payments.
    pub fn reverse_payment(&mut self, amount: Decimal) {
        if self.status == InvoiceStatus::Void {
            return;
        }
        self.amount_paid = (self.amount_paid - amount).max(Decimal::ZERO);
        self.status = InvoiceStatus::for_amounts(self.total_amount, self.amount_paid);
    }
}

impl Default for Invoice {
    fn default() -> Self {
        let today = Utc::now().date_naive();
        Self {
            id: 0,
            tenant_id: 0,
            scheme_id: 0,
            account_no: String::new(),
            billing_run_id: None,
            tariff_id: 0,
            period_start: today,
            period_end: today,
            due_date: today,
            currency: "KES".to_string(),
            consumption: Decimal::ZERO,
            estimated: false,
            fixed_charge: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            amount_paid: Decimal::ZERO,
            status: InvoiceStatus::Open,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

/// Outstanding invoice joined with the customer name, input to aging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutstandingInvoice {
    pub invoice_id: i64,
    pub account_no: String,
    pub customer_name: String,
    pub due_date: NaiveDate,
    pub balance: Decimal,
}
