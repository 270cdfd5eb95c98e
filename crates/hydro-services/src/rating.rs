//! Rating engine
//!
//! Applies progressive block rates, the fixed charge and VAT to a consumption
//! value. Block ranges are `[min, max)`; a consumption exactly at a block's
//! `max` is billed entirely in that block. Line amounts stay unrounded and
//! the invoice total is rounded once, half away from zero, to 2 decimals.

use hydro_core::models::{LineKind, NewInvoiceLine, Tariff};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use tracing::debug;

use crate::constants::MONEY_DP;

/// Result of rating one consumption value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeBreakdown {
    /// One line per block with non-zero consumption, then an optional tax line
    pub lines: Vec<NewInvoiceLine>,
    pub fixed_charge: Decimal,
    /// Fixed charge plus block amounts, before tax
    pub subtotal: Decimal,
    /// Unrounded VAT amount
    pub tax: Decimal,
    /// Rounded invoice total
    pub total: Decimal,
}

impl ChargeBreakdown {
    /// Sum of block line amounts, excluding tax
    pub fn consumption_charge(&self) -> Decimal {
        self.lines
            .iter()
            .filter(|l| l.kind == LineKind::Block)
            .map(|l| l.amount)
            .sum()
    }
}

/// Round a monetary total to minor units
#[inline]
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Progressive block rating
#[derive(Debug, Clone, Default)]
pub struct ChargeCalculator {
    /// VAT applied when the tariff carries none
    vat_percent: Option<Decimal>,
}

impl ChargeCalculator {
    pub fn new(vat_percent: Option<Decimal>) -> Self {
        Self { vat_percent }
    }

    /// Rate `consumption` against `tariff`
    ///
    /// The tariff must already be validated. Negative consumption is treated
    /// as zero. `estimated` is copied onto every line.
    pub fn calculate(&self, tariff: &Tariff, consumption: Decimal, estimated: bool) -> ChargeBreakdown {
        let mut remaining = consumption.max(Decimal::ZERO);
        let mut lines = Vec::with_capacity(tariff.blocks.len() + 1);

        for (i, block) in tariff.blocks.iter().enumerate() {
            if remaining.is_zero() {
                break;
            }

            let quantity = match block.width() {
                Some(width) => remaining.min(width),
                None => remaining,
            };

            if quantity > Decimal::ZERO {
                let description = if block.lifeline {
                    format!("Lifeline block {} ({} m3)", i + 1, block.range_label())
                } else {
                    format!("Block {} ({} m3)", i + 1, block.range_label())
                };

                lines.push(NewInvoiceLine {
                    kind: LineKind::Block,
                    description,
                    quantity,
                    unit_price: block.rate,
                    amount: quantity * block.rate,
                    tariff_block: Some(i as i32 + 1),
                    lifeline: block.lifeline,
                    estimated,
                });
            }

            remaining -= quantity;
            if block.is_unbounded() {
                break;
            }
        }

        let block_total: Decimal = lines.iter().map(|l| l.amount).sum();
        let subtotal = tariff.fixed_charge + block_total;

        let tax = match tariff.vat_percent.or(self.vat_percent) {
            Some(vat) if vat > Decimal::ZERO => subtotal * vat / Decimal::ONE_HUNDRED,
            _ => Decimal::ZERO,
        };

        if tax > Decimal::ZERO {
            let vat = tariff.vat_percent.or(self.vat_percent).unwrap_or_default();
            lines.push(NewInvoiceLine {
                kind: LineKind::Tax,
                description: format!("VAT {}%", vat.normalize()),
                quantity: Decimal::ONE,
                unit_price: tax,
                amount: tax,
                tariff_block: None,
                lifeline: false,
                estimated,
            });
        }

        let total = round_money(subtotal + tax);

        debug!(
            "Rated {} m3 on {}: subtotal={} tax={} total={}",
            consumption, tariff.code, subtotal, tax, total
        );

        ChargeBreakdown {
            lines,
            fixed_charge: tariff.fixed_charge,
            subtotal,
            tax,
            total,
        }
    }
}
