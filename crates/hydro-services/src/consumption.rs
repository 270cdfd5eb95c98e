//! Consumption calculation
//!
//! Brackets a billing period with two register readings and returns the
//! volume used. Register wrap-around and small corrections are detected from
//! negative differences. When either reading is missing the volume is
//! estimated from the account's recent invoices and flagged for true-up.

use hydro_core::{
    config::BillingConfig,
    models::{Account, BillingPeriod, MeterReading},
    traits::{InvoiceRepository, MeterReadingRepository},
    AppError, AppResult, TenantContext,
};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::constants::VOLUME_DP;

/// How a consumption figure was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionMethod {
    /// Plain difference of two readings
    Metered,
    /// Register wrapped past its capacity
    Rollover,
    /// Small negative difference treated as a register correction
    Corrected,
    /// No usable reading pair; trailing average used
    Estimated,
}

/// Volume consumed over a period
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Consumption {
    pub volume: Decimal,
    pub method: ConsumptionMethod,
    pub previous_reading: Option<Decimal>,
    pub current_reading: Option<Decimal>,
}

impl Consumption {
    pub fn is_estimated(&self) -> bool {
        self.method == ConsumptionMethod::Estimated
    }

    fn estimated(volume: Decimal) -> Self {
        Self {
            volume,
            method: ConsumptionMethod::Estimated,
            previous_reading: None,
            current_reading: None,
        }
    }
}

/// Tunables for consumption calculation
#[derive(Debug, Clone)]
pub struct ConsumptionSettings {
    /// Register capacity used when the account has none on record
    pub default_meter_max: Decimal,
    /// Negative differences larger than this are treated as a wrap
    pub rollover_threshold: Decimal,
    /// Number of past invoices averaged for estimates
    pub estimation_periods: i64,
}

impl From<&BillingConfig> for ConsumptionSettings {
    fn from(config: &BillingConfig) -> Self {
        Self {
            default_meter_max: config.default_meter_max_value,
            rollover_threshold: config.rollover_threshold,
            estimation_periods: config.estimation_periods.max(1),
        }
    }
}

impl Default for ConsumptionSettings {
    fn default() -> Self {
        Self::from(&BillingConfig::default())
    }
}

/// Volume between two register values
///
/// A negative difference larger than `threshold` means the register wrapped
/// at `meter_max`; a smaller one is a correction and yields zero.
pub fn volume_between(
    previous: Decimal,
    latest: Decimal,
    meter_max: Decimal,
    threshold: Decimal,
) -> (Decimal, ConsumptionMethod) {
    let diff = latest - previous;

    if diff >= Decimal::ZERO {
        return (diff, ConsumptionMethod::Metered);
    }

    if diff.abs() > threshold {
        let wrapped = (meter_max - previous) + latest;
        (wrapped.max(Decimal::ZERO), ConsumptionMethod::Rollover)
    } else {
        (Decimal::ZERO, ConsumptionMethod::Corrected)
    }
}

/// Mean of past consumptions, rounded to volume precision
pub fn trailing_average(history: &[Decimal]) -> Option<Decimal> {
    if history.is_empty() {
        return None;
    }

    let sum: Decimal = history.iter().sum();
    Some((sum / Decimal::from(history.len())).round_dp(VOLUME_DP))
}

/// First instant of the period
fn period_open(period: &BillingPeriod) -> DateTime<Utc> {
    Utc.from_utc_datetime(&period.start.and_time(NaiveTime::MIN))
}

/// First instant after the period
fn period_close(period: &BillingPeriod) -> AppResult<DateTime<Utc>> {
    let next_day = period
        .end
        .checked_add_signed(Duration::days(1))
        .ok_or_else(|| AppError::Validation(format!("period_end {} is out of range", period.end)))?;
    Ok(Utc.from_utc_datetime(&next_day.and_time(NaiveTime::MIN)))
}

/// Computes metered or estimated consumption for an account
pub struct ConsumptionCalculator {
    readings: Arc<dyn MeterReadingRepository>,
    invoices: Arc<dyn InvoiceRepository>,
    settings: ConsumptionSettings,
}

impl ConsumptionCalculator {
    pub fn new(
        readings: Arc<dyn MeterReadingRepository>,
        invoices: Arc<dyn InvoiceRepository>,
        settings: ConsumptionSettings,
    ) -> Self {
        Self {
            readings,
            invoices,
            settings,
        }
    }

    /// Consumption of `account` over `period`
    ///
    /// Estimation failures are absorbed: the result is a zero-volume estimate.
    #[instrument(skip(self, account), fields(account_no = %account.account_no, meter_id = %account.meter_id))]
    pub async fn calculate(
        &self,
        ctx: &TenantContext,
        account: &Account,
        period: &BillingPeriod,
    ) -> AppResult<Consumption> {
        if let Some((previous, latest)) = self.bracket(ctx, &account.meter_id, period).await? {
            let meter_max = account
                .meter_max_value
                .unwrap_or(self.settings.default_meter_max);

            let (volume, method) = volume_between(
                previous.value,
                latest.value,
                meter_max,
                self.settings.rollover_threshold,
            );

            match method {
                ConsumptionMethod::Rollover => warn!(
                    "Meter {} rolled over: {} -> {} (max {})",
                    account.meter_id, previous.value, latest.value, meter_max
                ),
                ConsumptionMethod::Corrected => warn!(
                    "Meter {} went backwards by {}, treating as correction",
                    account.meter_id,
                    previous.value - latest.value
                ),
                _ => {}
            }

            return Ok(Consumption {
                volume,
                method,
                previous_reading: Some(previous.value),
                current_reading: Some(latest.value),
            });
        }

        match self.estimate(ctx, &account.account_no, period).await {
            Ok(volume) => {
                debug!("Estimated {} m3 for {}", volume, account.account_no);
                Ok(Consumption::estimated(volume))
            }
            Err(AppError::ConsumptionEstimation(reason)) => {
                warn!("{}; billing zero estimated volume", reason);
                Ok(Consumption::estimated(Decimal::ZERO))
            }
            Err(e) => Err(e),
        }
    }

    /// Opening and closing readings, or None when either is missing
    async fn bracket(
        &self,
        ctx: &TenantContext,
        meter_id: &str,
        period: &BillingPeriod,
    ) -> AppResult<Option<(MeterReading, MeterReading)>> {
        let open = period_open(period);
        let close = period_close(period)?;

        let previous = match self.readings.latest_at_or_before(ctx, meter_id, open).await? {
            Some(r) => Some(r),
            None => self.readings.earliest_after(ctx, meter_id, open, close).await?,
        };

        let Some(previous) = previous else {
            debug!("No opening reading for meter {}", meter_id);
            return Ok(None);
        };

        let latest = self
            .readings
            .latest_at_or_before(ctx, meter_id, close - Duration::microseconds(1))
            .await?
            .filter(|r| r.read_at > previous.read_at && r.read_at >= open);

        match latest {
            Some(latest) => Ok(Some((previous, latest))),
            None => {
                debug!("No closing reading for meter {}", meter_id);
                Ok(None)
            }
        }
    }

    async fn estimate(
        &self,
        ctx: &TenantContext,
        account_no: &str,
        period: &BillingPeriod,
    ) -> AppResult<Decimal> {
        let history = self
            .invoices
            .recent_consumption(ctx, account_no, period.start, self.settings.estimation_periods)
            .await?;

        trailing_average(&history).ok_or_else(|| {
            AppError::ConsumptionEstimation(format!(
                "No consumption history for {} before {}",
                account_no, period.start
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_plain_difference() {
        let (v, m) = volume_between(dec!(100), dec!(115), dec!(99999), dec!(10000));
        assert_eq!(v, dec!(15));
        assert_eq!(m, ConsumptionMethod::Metered);
    }

    #[test]
    fn test_rollover() {
        let (v, m) = volume_between(dec!(99990), dec!(5), dec!(99999), dec!(10000));
        assert_eq!(v, dec!(14));
        assert_eq!(m, ConsumptionMethod::Rollover);
    }

    #[test]
    fn test_small_negative_is_correction() {
        let (v, m) = volume_between(dec!(500), dec!(498), dec!(99999), dec!(10000));
        assert_eq!(v, Decimal::ZERO);
        assert_eq!(m, ConsumptionMethod::Corrected);
    }

    #[test]
    fn test_rollover_never_negative() {
        // Previous reading above the configured capacity
        let (v, _) = volume_between(dec!(120000), dec!(3), dec!(99999), dec!(10000));
        assert_eq!(v, Decimal::ZERO);
    }

    #[test]
    fn test_trailing_average() {
        assert_eq!(trailing_average(&[]), None);
        assert_eq!(
            trailing_average(&[dec!(10), dec!(12), dec!(15)]),
            Some(dec!(12.333))
        );
    }

    #[test]
    fn test_period_instants() {
        let period = BillingPeriod::new(
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap();

        assert_eq!(period_open(&period).to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(
            period_close(&period).unwrap().to_rfc3339(),
            "2024-02-01T00:00:00+00:00"
        );
    }

    #[test]
    fn test_period_close_at_calendar_limit() {
        let end = chrono::NaiveDate::MAX;
        let period = BillingPeriod::new(end - Duration::days(30), end).unwrap();

        assert!(matches!(period_close(&period), Err(AppError::Validation(_))));
    }
}
