//! Billing run model
//!
//! A billing run is one batch execution over the accounts of a tenant/scheme
//! for a period. Its lifecycle is an explicit state machine:
//!
//! ```text
//! pending -> processing -> completed
//!    \              \-> failed
//!     \-> failed
//! ```
//!
//! A run abandoned in an active status (its worker died or storage failed
//! mid-run) is reclaimed as failed once it is older than the stale bound.
//!
//! Counters are only written on the terminal transition; per-account
//! failures go to an append-only error log.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::AppError;
use crate::AppResult;

/// Longest period a single run may cover
pub const MAX_PERIOD_DAYS: i64 = 366;

/// Error log entry written when a stale active run is reclaimed
pub const ABANDONED_RUN_REASON: &str = "Run abandoned before completion; reclaimed by a new run";

/// Validated billing period (both ends inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingPeriod {
    /// Build a period, rejecting inverted or oversized ranges
    pub fn new(start: NaiveDate, end: NaiveDate) -> AppResult<Self> {
        if start > end {
            return Err(AppError::Validation(format!(
                "period_start {} is after period_end {}",
                start, end
            )));
        }

        let days = (end - start).num_days() + 1;
        if days > MAX_PERIOD_DAYS {
            return Err(AppError::Validation(format!(
                "period spans {} days, maximum is {}",
                days, MAX_PERIOD_DAYS
            )));
        }

        Ok(Self { start, end })
    }

    /// Number of days covered
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Ensure a due date does not precede the end of the period
    pub fn check_due_date(&self, due_date: NaiveDate) -> AppResult<()> {
        if due_date < self.end {
            return Err(AppError::Validation(format!(
                "due_date {} precedes period_end {}",
                due_date, self.end
            )));
        }
        Ok(())
    }
}

/// Billing run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BillingRunStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for BillingRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingRunStatus::Pending => write!(f, "pending"),
            BillingRunStatus::Processing => write!(f, "processing"),
            BillingRunStatus::Completed => write!(f, "completed"),
            BillingRunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl BillingRunStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(BillingRunStatus::Pending),
            "processing" => Some(BillingRunStatus::Processing),
            "completed" => Some(BillingRunStatus::Completed),
            "failed" => Some(BillingRunStatus::Failed),
            _ => None,
        }
    }

    /// Pending and processing runs hold the period lock
    pub fn is_active(&self) -> bool {
        matches!(self, BillingRunStatus::Pending | BillingRunStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BillingRunStatus::Completed | BillingRunStatus::Failed)
    }

    /// Allowed edges of the run state machine
    pub fn can_transition_to(&self, next: BillingRunStatus) -> bool {
        matches!(
            (self, next),
            (BillingRunStatus::Pending, BillingRunStatus::Processing)
                | (BillingRunStatus::Pending, BillingRunStatus::Failed)
                | (BillingRunStatus::Processing, BillingRunStatus::Completed)
                | (BillingRunStatus::Processing, BillingRunStatus::Failed)
        )
    }

    /// Validate a transition, returning the target on success
    pub fn transition(self, next: BillingRunStatus) -> AppResult<BillingRunStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AppError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

/// Entry of a run's append-only error log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    /// Failing account; None for run-level failures
    pub account_no: Option<String>,
    pub reason: String,
}

impl RunError {
    pub fn account(account_no: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            account_no: Some(account_no.into()),
            reason: reason.into(),
        }
    }

    pub fn run_level(reason: impl Into<String>) -> Self {
        Self {
            account_no: None,
            reason: reason.into(),
        }
    }
}

/// Counters written on the terminal transition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub accounts_processed: i32,
    pub invoices_generated: i32,
    pub accounts_skipped: i32,
    pub total_billed: Decimal,
}

/// Parameters for opening a new run
#[derive(Debug, Clone)]
pub struct NewBillingRun {
    pub period: BillingPeriod,
    pub due_date: NaiveDate,
    pub segment: Option<String>,
    /// Active runs for the same period last started before this instant are
    /// failed before the new run is opened
    pub stale_before: Option<DateTime<Utc>>,
}

/// Billing run entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingRun {
    pub id: Uuid,
    pub tenant_id: i32,
    pub scheme_id: i32,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub due_date: NaiveDate,
    pub segment: Option<String>,
    pub status: BillingRunStatus,
    pub accounts_processed: i32,
    pub invoices_generated: i32,
    pub accounts_skipped: i32,
    pub total_billed: Decimal,
    pub error_log: Vec<RunError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BillingRun {
    /// Active and not started (or created) since `cutoff`
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.status.is_active() && self.started_at.unwrap_or(self.created_at) < cutoff
    }

    /// Apply a transition in memory, stamping start/completion times
    pub fn apply_transition(
        &mut self,
        next: BillingRunStatus,
        counters: Option<&RunCounters>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        self.status = self.status.transition(next)?;

        match next {
            BillingRunStatus::Processing => self.started_at = Some(now),
            BillingRunStatus::Completed | BillingRunStatus::Failed => {
                self.completed_at = Some(now)
            }
            BillingRunStatus::Pending => {}
        }

        if let Some(c) = counters {
            self.accounts_processed = c.accounts_processed;
            self.invoices_generated = c.invoices_generated;
            self.accounts_skipped = c.accounts_skipped;
            self.total_billed = c.total_billed;
        }

        Ok(())
    }
}
