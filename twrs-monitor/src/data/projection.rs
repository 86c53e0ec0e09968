//! Multi-period return projection.
//!
//! A period return is historical when the store holds a close from around the
//! start of the period, and estimated otherwise (daily change percent times a
//! per-period multiplier).
//!
//! The choice is made per security and per period, so one ranked set can mix
//! both kinds: a security listed after the store started recording gets an
//! estimate while its neighbours get real history. Scores are still computed
//! over the whole set. Each [`PeriodReturn`] carries its [`ReturnBasis`], and
//! the table and chat messages mark estimated rows with `*`.

use chrono::{Duration, NaiveDate};
use tracing::{debug, warn};
use twrs_common::ProjectionConfig;

use super::{Period, PeriodReturn, ReturnBasis, Security};
use crate::state::CloseHistory;

/// How far before the lookback date a recorded close may be and still count.
/// Covers weekends and holiday runs.
const HISTORY_TOLERANCE_DAYS: i64 = 7;

/// Attaches a return for every period to each security.
#[derive(Debug, Clone, Default)]
pub struct ReturnProjector {
    multipliers: ProjectionConfig,
}

impl ReturnProjector {
    pub fn new(multipliers: ProjectionConfig) -> Self {
        Self { multipliers }
    }

    /// Placeholder multiplier for a period.
    pub fn multiplier(&self, period: Period) -> f64 {
        let m = &self.multipliers;
        match period {
            Period::OneWeek => m.one_week,
            Period::OneMonth => m.one_month,
            Period::ThreeMonths => m.three_months,
            Period::SixMonths => m.six_months,
            Period::OneYear => m.one_year,
        }
    }

    /// Estimated return from the daily change percent.
    pub fn estimate(&self, change_percent: f64, period: Period) -> f64 {
        change_percent * self.multiplier(period)
    }

    /// Fill every period with an estimated return.
    pub fn project_estimated(&self, securities: &mut [Security]) {
        for security in securities.iter_mut() {
            for period in Period::ALL {
                security.returns.insert(
                    period,
                    PeriodReturn {
                        value: self.estimate(security.change_percent, period),
                        basis: ReturnBasis::Estimated,
                    },
                );
            }
        }
    }

    /// Fill every period, preferring recorded history over estimates.
    ///
    /// Returns how many (security, period) pairs were historical. A history
    /// lookup failure degrades that period to estimates.
    pub async fn project<H>(&self, date: NaiveDate, securities: &mut [Security], history: &H) -> usize
    where
        H: CloseHistory + ?Sized,
    {
        self.project_estimated(securities);

        let mut historical = 0;
        for period in Period::ALL {
            let target = date - Duration::days(period.lookback_days());
            let earliest = target - Duration::days(HISTORY_TOLERANCE_DAYS);

            let closes = match history.closes_as_of(target).await {
                Ok(closes) => closes,
                Err(e) => {
                    warn!(period = %period, error = %e, "Close history lookup failed, using estimates");
                    continue;
                }
            };

            for security in securities.iter_mut() {
                let Some((close_date, old)) = closes.get(&security.code) else {
                    continue;
                };
                if *close_date < earliest || *old <= 0.0 {
                    continue;
                }
                security.returns.insert(
                    period,
                    PeriodReturn {
                        value: (security.price / old - 1.0) * 100.0,
                        basis: ReturnBasis::Historical,
                    },
                );
                historical += 1;
            }
        }

        debug!(date = %date, historical, "Projected period returns");
        historical
    }
}
