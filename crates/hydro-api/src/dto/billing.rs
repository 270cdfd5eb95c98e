//! Billing run DTOs
//!
//! Request and response types for preview, execute and run history endpoints.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use hydro_core::models::{BillingPeriod, BillingRun, BillingRunStatus, RunError};
use hydro_core::{AppError, AppResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Billing preview request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PreviewRequest {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,

    /// Account category to restrict the preview to
    #[validate(length(min = 1, max = 50, message = "Segment must be 1-50 characters"))]
    pub segment: Option<String>,

    /// Sample size, clamped by the orchestrator
    pub limit: Option<i64>,
}

impl PreviewRequest {
    pub fn period(&self) -> AppResult<BillingPeriod> {
        BillingPeriod::new(self.period_start, self.period_end)
    }
}

/// Billing run execution request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ExecuteRequest {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,

    /// Defaults to period end plus the configured number of days
    pub due_date: Option<NaiveDate>,

    #[validate(length(min = 1, max = 50, message = "Segment must be 1-50 characters"))]
    pub segment: Option<String>,
}

impl ExecuteRequest {
    pub fn period(&self) -> AppResult<BillingPeriod> {
        BillingPeriod::new(self.period_start, self.period_end)
    }

    /// Explicit due date, or period end plus `default_due_days`
    pub fn due_date_or(&self, default_due_days: i64) -> AppResult<NaiveDate> {
        match self.due_date {
            Some(due) => Ok(due),
            None => self
                .period_end
                .checked_add_signed(Duration::days(default_due_days))
                .ok_or_else(|| {
                    AppError::Validation(format!(
                        "period_end {} plus {} days is out of range",
                        self.period_end, default_due_days
                    ))
                }),
        }
    }
}

/// Billing run summary row
#[derive(Debug, Clone, Serialize)]
pub struct BillingRunResponse {
    pub run_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub due_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    pub status: BillingRunStatus,
    pub invoice_count: i32,
    pub total_amount: Decimal,
    pub accounts_processed: i32,
    pub accounts_skipped: i32,
    pub error_count: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&BillingRun> for BillingRunResponse {
    fn from(run: &BillingRun) -> Self {
        Self {
            run_id: run.id,
            period_start: run.period_start,
            period_end: run.period_end,
            due_date: run.due_date,
            segment: run.segment.clone(),
            status: run.status,
            invoice_count: run.invoices_generated,
            total_amount: run.total_billed,
            accounts_processed: run.accounts_processed,
            accounts_skipped: run.accounts_skipped,
            error_count: run.error_log.len(),
            created_at: run.created_at,
            completed_at: run.completed_at,
        }
    }
}

/// Billing run detail with its error log
#[derive(Debug, Clone, Serialize)]
pub struct BillingRunDetailResponse {
    #[serde(flatten)]
    pub summary: BillingRunResponse,
    pub started_at: Option<DateTime<Utc>>,
    pub errors: Vec<RunError>,
}

impl From<BillingRun> for BillingRunDetailResponse {
    fn from(run: BillingRun) -> Self {
        Self {
            summary: BillingRunResponse::from(&run),
            started_at: run.started_at,
            errors: run.error_log,
        }
    }
}
