//! Domain models for HydroBill
//!
//! This module contains all the core domain models used throughout the application.

pub mod account;
pub mod billing_run;
pub mod invoice;
pub mod payment;
pub mod reading;
pub mod tariff;

pub use account::{Account, ConnectionStatus};
pub use billing_run::{
    BillingPeriod, BillingRun, BillingRunStatus, NewBillingRun, RunCounters, RunError,
    ABANDONED_RUN_REASON,
};
pub use invoice::{
    InsertOutcome, Invoice, InvoiceLine, InvoiceStatus, LineKind, NewInvoice, NewInvoiceLine,
    OutstandingInvoice,
};
pub use payment::{
    AllocationEntry, AllocationMode, NewPayment, Payment, PaymentAllocation, PaymentChannel,
};
pub use reading::{MeterReading, ReadingQuality};
pub use tariff::{Tariff, TariffBlock};
