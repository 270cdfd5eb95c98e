//! Payment DTOs
//!
//! Request types for receipts, reconciliation and the aging report.

use chrono::{DateTime, NaiveDate, Utc};
use hydro_core::models::{NewPayment, PaymentChannel};
use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

/// Payment receipt request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PaymentCreateRequest {
    #[validate(length(min = 1, max = 50, message = "Account number is required"))]
    pub account_no: String,

    /// Positive, at most two decimal places (checked by the allocator)
    pub amount: Decimal,

    #[serde(default)]
    pub channel: PaymentChannel,

    /// Bank or mobile-money transaction reference
    #[validate(length(max = 100))]
    pub reference: Option<String>,

    /// Receipt time; now when omitted
    pub paid_at: Option<DateTime<Utc>>,
}

impl PaymentCreateRequest {
    pub fn into_new_payment(self) -> NewPayment {
        NewPayment {
            account_no: self.account_no.trim().to_string(),
            paid_at: self.paid_at.unwrap_or_else(Utc::now),
            amount: self.amount,
            channel: self.channel,
            reference: self.reference,
        }
    }
}

/// Manual reconciliation request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReconcileRequest {
    /// Invoices to settle, in priority order
    #[validate(length(min = 1, max = 500, message = "invoice_ids must list 1-500 invoices"))]
    pub invoice_ids: Vec<i64>,
}

/// Aging report query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgingParams {
    /// Number of top debtors to return
    pub top: Option<usize>,

    /// Report date; today when omitted
    pub as_of: Option<NaiveDate>,
}
