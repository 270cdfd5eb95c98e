//! Meter reading model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Quality flag attached by the ingestion pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadingQuality {
    #[default]
    Actual,
    Estimated,
    /// Flagged by validation; never used for billing
    Suspect,
}

impl fmt::Display for ReadingQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingQuality::Actual => write!(f, "actual"),
            ReadingQuality::Estimated => write!(f, "estimated"),
            ReadingQuality::Suspect => write!(f, "suspect"),
        }
    }
}

impl ReadingQuality {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "actual" => Some(ReadingQuality::Actual),
            "estimated" => Some(ReadingQuality::Estimated),
            "suspect" => Some(ReadingQuality::Suspect),
            _ => None,
        }
    }

    pub fn is_billable(&self) -> bool {
        !matches!(self, ReadingQuality::Suspect)
    }
}

/// Cumulative register reading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterReading {
    pub id: i64,
    pub meter_id: String,
    pub read_at: DateTime<Utc>,
    /// Cumulative register value, monotonic unless the register wraps
    pub value: Decimal,
    pub quality: ReadingQuality,
}
