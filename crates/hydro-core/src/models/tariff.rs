//! Tariff model
//!
//! A tariff is a versioned, immutable progressive-block price list. All
//! versions of one tariff share a `code`; a rate change publishes a new
//! version with its own validity window instead of editing blocks in place.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::AppResult;

/// One consumption band of a progressive tariff
///
/// Covers `[min, max)`; the final block has no `max` and covers `[min, ∞)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffBlock {
    /// Lower bound (inclusive), in cubic metres
    pub min: Decimal,

    /// Upper bound (exclusive); None for the final unbounded block
    pub max: Option<Decimal>,

    /// Price per cubic metre
    pub rate: Decimal,

    /// Subsidised lifeline band
    #[serde(default)]
    pub lifeline: bool,
}

impl TariffBlock {
    pub fn new(min: Decimal, max: Option<Decimal>, rate: Decimal, lifeline: bool) -> Self {
        Self {
            min,
            max,
            rate,
            lifeline,
        }
    }

    /// Width of the band, None when unbounded
    #[inline]
    pub fn width(&self) -> Option<Decimal> {
        self.max.map(|max| max - self.min)
    }

    #[inline]
    pub fn is_unbounded(&self) -> bool {
        self.max.is_none()
    }

    /// Human-readable range, e.g. "0-6" or "20+"
    pub fn range_label(&self) -> String {
        match self.max {
            Some(max) => format!("{}-{}", self.min.normalize(), max.normalize()),
            None => format!("{}+", self.min.normalize()),
        }
    }
}

/// Published tariff version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tariff {
    /// Unique identifier of this version
    pub id: i32,

    /// Version family shared by all versions of the same tariff
    pub code: String,

    /// Display name
    pub name: String,

    /// First day this version applies (inclusive)
    pub valid_from: NaiveDate,

    /// Last day this version applies (inclusive); None = open-ended
    pub valid_to: Option<NaiveDate>,

    /// Currency code (ISO 4217)
    pub currency: String,

    /// Fixed charge added to every invoice
    pub fixed_charge: Decimal,

    /// VAT percentage overriding the configured default
    pub vat_percent: Option<Decimal>,

    /// Blocks sorted ascending by `min`
    pub blocks: Vec<TariffBlock>,

    /// Publication timestamp
    pub created_at: DateTime<Utc>,
}

impl Tariff {
    /// Check whether this version covers the given day
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        self.valid_from <= date && self.valid_to.map_or(true, |to| to >= date)
    }

    /// Verify the block structure
    ///
    /// Blocks must start at zero, be sorted, contiguous (`block[i].max ==
    /// block[i+1].min`), carry non-negative rates and end with exactly one
    /// unbounded block.
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |reason: String| AppError::InvalidTariff(format!("{}: {}", self.code, reason));

        if let Some(to) = self.valid_to {
            if to < self.valid_from {
                return Err(invalid("validity window ends before it starts".to_string()));
            }
        }

        if self.fixed_charge < Decimal::ZERO {
            return Err(invalid("fixed charge is negative".to_string()));
        }

        let first = self
            .blocks
            .first()
            .ok_or_else(|| invalid("no blocks".to_string()))?;

        if !first.min.is_zero() {
            return Err(invalid(format!("first block starts at {}", first.min)));
        }

        let last_index = self.blocks.len() - 1;
        for (i, block) in self.blocks.iter().enumerate() {
            if block.rate < Decimal::ZERO {
                return Err(invalid(format!("block {} has a negative rate", i + 1)));
            }

            match block.max {
                Some(max) => {
                    if i == last_index {
                        return Err(invalid("last block must be unbounded".to_string()));
                    }
                    if max <= block.min {
                        return Err(invalid(format!("block {} is empty or inverted", i + 1)));
                    }
                    let next = &self.blocks[i + 1];
                    if next.min != max {
                        return Err(invalid(format!(
                            "block {} ends at {} but block {} starts at {}",
                            i + 1,
                            max,
                            i + 2,
                            next.min
                        )));
                    }
                }
                None if i != last_index => {
                    return Err(invalid(format!(
                        "block {} is unbounded but not last",
                        i + 1
                    )));
                }
                None => {}
            }
        }

        Ok(())
    }
}

impl Default for Tariff {
    fn default() -> Self {
        Self {
            id: 0,
            code: String::new(),
            name: String::new(),
            valid_from: NaiveDate::MIN,
            valid_to: None,
            currency: "KES".to_string(),
            fixed_charge: Decimal::ZERO,
            vat_percent: None,
            blocks: Vec::new(),
            created_at: Utc::now(),
        }
    }
}
