//! Receivables aging
//!
//! Buckets outstanding balances by days past due, computes portfolio DSO
//! over a trailing billing window and ranks the largest debtors.

use chrono::{Duration, NaiveDate};
use hydro_core::{
    models::OutstandingInvoice, traits::InvoiceRepository, AppError, AppResult, TenantContext,
};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::constants::{DSO_DP, MAX_TOP_DEBTORS};

/// Days-past-due band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AgingBucket {
    #[serde(rename = "0-30")]
    Current,
    #[serde(rename = "31-60")]
    Days31To60,
    #[serde(rename = "61-90")]
    Days61To90,
    #[serde(rename = "90+")]
    Over90,
}

impl AgingBucket {
    pub const ALL: [AgingBucket; 4] = [
        AgingBucket::Current,
        AgingBucket::Days31To60,
        AgingBucket::Days61To90,
        AgingBucket::Over90,
    ];

    /// Bucket for an age in days; not-yet-due invoices count as current
    pub fn for_age(days: i64) -> Self {
        match days {
            i64::MIN..=30 => AgingBucket::Current,
            31..=60 => AgingBucket::Days31To60,
            61..=90 => AgingBucket::Days61To90,
            _ => AgingBucket::Over90,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AgingBucket::Current => "0-30",
            AgingBucket::Days31To60 => "31-60",
            AgingBucket::Days61To90 => "61-90",
            AgingBucket::Over90 => "90+",
        }
    }

    fn index(&self) -> usize {
        match self {
            AgingBucket::Current => 0,
            AgingBucket::Days31To60 => 1,
            AgingBucket::Days61To90 => 2,
            AgingBucket::Over90 => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketAmount {
    pub bucket: AgingBucket,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebtorSummary {
    pub account_no: String,
    pub customer_name: String,
    pub balance: Decimal,
    pub oldest_due_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgingSummary {
    pub total_accounts: usize,
    pub total_balance: Decimal,
}

/// Aging report for a tenant/scheme
#[derive(Debug, Clone, Serialize)]
pub struct AgingReport {
    pub as_of: NaiveDate,
    pub summary: AgingSummary,
    /// None when nothing was billed in the window
    pub dso: Option<Decimal>,
    pub aging_buckets: Vec<BucketAmount>,
    pub top_debtors: Vec<DebtorSummary>,
}

/// Days sales outstanding: balance over average daily billing
pub fn days_sales_outstanding(balance: Decimal, billed: Decimal, window_days: i64) -> Option<Decimal> {
    if billed <= Decimal::ZERO || window_days <= 0 {
        return None;
    }

    let dso = balance * Decimal::from(window_days) / billed;
    Some(dso.round_dp_with_strategy(DSO_DP, RoundingStrategy::MidpointAwayFromZero))
}

/// Build the report from outstanding invoices
///
/// Bucket amounts always add up to `summary.total_balance`.
pub fn build_report(
    items: &[OutstandingInvoice],
    as_of: NaiveDate,
    billed_in_window: Decimal,
    window_days: i64,
    top: usize,
) -> AgingReport {
    let mut buckets = [Decimal::ZERO; 4];
    let mut debtors: BTreeMap<&str, DebtorSummary> = BTreeMap::new();

    for item in items.iter().filter(|i| i.balance > Decimal::ZERO) {
        let age = (as_of - item.due_date).num_days();
        buckets[AgingBucket::for_age(age).index()] += item.balance;

        debtors
            .entry(item.account_no.as_str())
            .and_modify(|d| {
                d.balance += item.balance;
                d.oldest_due_date = d.oldest_due_date.min(item.due_date);
            })
            .or_insert_with(|| DebtorSummary {
                account_no: item.account_no.clone(),
                customer_name: item.customer_name.clone(),
                balance: item.balance,
                oldest_due_date: item.due_date,
            });
    }

    let total_balance: Decimal = buckets.iter().sum();
    let total_accounts = debtors.len();

    let mut top_debtors: Vec<DebtorSummary> = debtors.into_values().collect();
    top_debtors.sort_by(|a, b| {
        b.balance
            .cmp(&a.balance)
            .then_with(|| a.account_no.cmp(&b.account_no))
    });
    top_debtors.truncate(top);

    AgingReport {
        as_of,
        summary: AgingSummary {
            total_accounts,
            total_balance,
        },
        dso: days_sales_outstanding(total_balance, billed_in_window, window_days),
        aging_buckets: AgingBucket::ALL
            .iter()
            .map(|b| BucketAmount {
                bucket: *b,
                amount: buckets[b.index()],
            })
            .collect(),
        top_debtors,
    }
}

/// Generates aging reports from stored invoices
pub struct AgingReportGenerator {
    invoices: Arc<dyn InvoiceRepository>,
    dso_window_days: i64,
    default_top: usize,
}

impl AgingReportGenerator {
    pub fn new(invoices: Arc<dyn InvoiceRepository>, dso_window_days: i64, default_top: usize) -> Self {
        Self {
            invoices,
            dso_window_days: dso_window_days.max(1),
            default_top,
        }
    }

    #[instrument(skip(self))]
    pub async fn generate(
        &self,
        ctx: &TenantContext,
        as_of: NaiveDate,
        top: Option<usize>,
    ) -> AppResult<AgingReport> {
        let top = top.unwrap_or(self.default_top).clamp(1, MAX_TOP_DEBTORS);

        let window_start = dso_window_start(as_of, self.dso_window_days)?;
        let items = self.invoices.list_outstanding(ctx).await?;
        let billed = self.invoices.billed_between(ctx, window_start, as_of).await?;

        debug!(
            "Aging {} outstanding invoices; billed {} since {}",
            items.len(),
            billed,
            window_start
        );

        Ok(build_report(&items, as_of, billed, self.dso_window_days, top))
    }
}

/// First day of a `days`-long window ending on `as_of`
pub fn dso_window_start(as_of: NaiveDate, days: i64) -> AppResult<NaiveDate> {
    as_of
        .checked_sub_signed(Duration::days(days.max(1) - 1))
        .ok_or_else(|| AppError::Validation(format!("as_of {} is out of range", as_of)))
}
