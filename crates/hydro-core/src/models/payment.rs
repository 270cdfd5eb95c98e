//! Payment and allocation models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Channel a payment was received through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentChannel {
    #[default]
    Cash,
    BankTransfer,
    MobileMoney,
    Card,
    Other,
}

impl fmt::Display for PaymentChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentChannel::Cash => write!(f, "cash"),
            PaymentChannel::BankTransfer => write!(f, "bank_transfer"),
            PaymentChannel::MobileMoney => write!(f, "mobile_money"),
            PaymentChannel::Card => write!(f, "card"),
            PaymentChannel::Other => write!(f, "other"),
        }
    }
}

impl PaymentChannel {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cash" => Some(PaymentChannel::Cash),
            "bank_transfer" => Some(PaymentChannel::BankTransfer),
            "mobile_money" => Some(PaymentChannel::MobileMoney),
            "card" => Some(PaymentChannel::Card),
            "other" => Some(PaymentChannel::Other),
            _ => None,
        }
    }
}

/// How a payment's amount was distributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AllocationMode {
    /// Oldest due invoice first
    #[default]
    Fifo,
    /// Operator-specified invoice list
    Manual,
}

impl fmt::Display for AllocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationMode::Fifo => write!(f, "fifo"),
            AllocationMode::Manual => write!(f, "manual"),
        }
    }
}

impl AllocationMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fifo" => Some(AllocationMode::Fifo),
            "manual" => Some(AllocationMode::Manual),
            _ => None,
        }
    }
}

/// Incoming payment before allocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub account_no: String,
    pub paid_at: DateTime<Utc>,
    pub amount: Decimal,
    pub channel: PaymentChannel,
    pub reference: Option<String>,
}

/// Share of a payment applied to one invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub invoice_id: i64,
    pub amount: Decimal,
}

/// Persisted allocation row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAllocation {
    pub payment_id: i64,
    pub invoice_id: i64,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Payment entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub tenant_id: i32,
    pub scheme_id: i32,
    pub account_no: String,
    pub paid_at: DateTime<Utc>,
    pub amount: Decimal,
    pub channel: PaymentChannel,
    pub reference: Option<String>,
    pub allocated_amount: Decimal,
    /// Credit left after all allocations
    pub unallocated_amount: Decimal,
    pub allocation_mode: AllocationMode,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Set allocated/unallocated from a list of entries
    pub fn set_allocations(&mut self, entries: &[AllocationEntry], mode: AllocationMode) {
        let allocated: Decimal = entries.iter().map(|e| e.amount).sum();
        self.allocated_amount = allocated;
        self.unallocated_amount = self.amount - allocated;
        self.allocation_mode = mode;
    }
}
