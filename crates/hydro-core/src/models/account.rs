//! Account / connection model
//!
//! A metered water connection belonging to a customer. The account owns the
//! meter reference and points at its current tariff version.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Connected and billable
    #[default]
    Active,
    /// Temporarily suspended (e.g. for arrears)
    Suspended,
    /// Physically disconnected
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Active => write!(f, "active"),
            ConnectionStatus::Suspended => write!(f, "suspended"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

impl ConnectionStatus {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(ConnectionStatus::Active),
            "suspended" => Some(ConnectionStatus::Suspended),
            "disconnected" => Some(ConnectionStatus::Disconnected),
            _ => None,
        }
    }

    /// Only active connections take part in billing runs
    pub fn is_billable(&self) -> bool {
        matches!(self, ConnectionStatus::Active)
    }
}

/// Account entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier
    pub id: i32,

    /// Account number (unique per tenant)
    pub account_no: String,

    /// Customer display name
    pub customer_name: String,

    /// Current tariff version (any version of the family)
    pub tariff_id: i32,

    /// Meter serial installed on the connection
    pub meter_id: String,

    /// Customer category, used as the billing segment (e.g. "domestic")
    pub category: String,

    /// Connection status
    pub status: ConnectionStatus,

    /// Register capacity of the installed meter, when known
    pub meter_max_value: Option<Decimal>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Account {
    #[inline]
    pub fn is_billable(&self) -> bool {
        self.status.is_billable()
    }

    /// Check whether the account falls in the requested segment
    ///
    /// No segment means every category matches.
    pub fn in_segment(&self, segment: Option<&str>) -> bool {
        segment.map_or(true, |s| self.category.eq_ignore_ascii_case(s))
    }
}

impl Default for Account {
    fn default() -> Self {
        Self {
            id: 0,
            account_no: String::new(),
            customer_name: String::new(),
            tariff_id: 0,
            meter_id: String::new(),
            category: "domestic".to_string(),
            status: ConnectionStatus::Active,
            meter_max_value: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
