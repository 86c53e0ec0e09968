//! Market data module for TWSE listed securities.
//!
//! Provides the end-of-day feed, the row parser strategies, and the
//! multi-period return projection.
//!
//! # Data Sources
//! - **TWSE STOCK_DAY_ALL** (Primary): one row per security, close and signed change
//! - **TWSE MI_INDEX** (Backup): daily market report, sign and magnitude in separate cells
//! - **TWSE OpenAPI** (Last resort): keyed JSON objects, latest published day only
//! - **Demo** (Offline): deterministic synthetic universe

mod demo;
mod feed;
mod industry;
mod parser;
mod projection;

pub use demo::DemoFeed;
pub use feed::{FeedEndpoint, MarketFeed, TwseFeed};
pub use industry::{industry_for_code, industry_labels, CATCH_ALL_INDUSTRY};
pub use parser::{parse_payload, ParseError, RowLayout};
pub use projection::ReturnProjector;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Period
// ============================================================================

/// Return period used for ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1m")]
    OneMonth,
    #[serde(rename = "3m")]
    ThreeMonths,
    #[serde(rename = "6m")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
}

impl Period {
    /// All periods, shortest first.
    pub const ALL: [Period; 5] = [
        Self::OneWeek,
        Self::OneMonth,
        Self::ThreeMonths,
        Self::SixMonths,
        Self::OneYear,
    ];

    /// Short key used on the command line and in stored snapshots.
    pub fn key(&self) -> &'static str {
        match self {
            Self::OneWeek => "1w",
            Self::OneMonth => "1m",
            Self::ThreeMonths => "3m",
            Self::SixMonths => "6m",
            Self::OneYear => "1y",
        }
    }

    /// Display label used in messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::OneWeek => "1週",
            Self::OneMonth => "1個月",
            Self::ThreeMonths => "3個月",
            Self::SixMonths => "6個月",
            Self::OneYear => "1年",
        }
    }

    /// Calendar days looked back for a historical return.
    pub fn lookback_days(&self) -> i64 {
        match self {
            Self::OneWeek => 7,
            Self::OneMonth => 30,
            Self::ThreeMonths => 91,
            Self::SixMonths => 182,
            Self::OneYear => 365,
        }
    }
}

impl Default for Period {
    fn default() -> Self {
        Self::ThreeMonths
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1w" | "w" | "week" | "1週" => Ok(Self::OneWeek),
            "1m" | "m" | "month" | "1個月" => Ok(Self::OneMonth),
            "3m" | "q" | "quarter" | "3個月" => Ok(Self::ThreeMonths),
            "6m" | "half" | "6個月" => Ok(Self::SixMonths),
            "1y" | "y" | "year" | "1年" => Ok(Self::OneYear),
            other => Err(format!("unknown period '{}', expected one of 1w, 1m, 3m, 6m, 1y", other)),
        }
    }
}

// ============================================================================
// Security
// ============================================================================

/// How a period return was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnBasis {
    /// Daily change percent times a placeholder multiplier
    Estimated,
    /// Computed from a recorded close on or before the lookback date
    Historical,
}

/// A period return and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodReturn {
    pub value: f64,
    pub basis: ReturnBasis,
}

/// One listed security for one trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Security {
    /// 4-digit ticker
    pub code: String,
    /// Short name
    pub name: String,
    /// Closing price
    pub price: f64,
    /// Absolute change from the previous close
    pub change: f64,
    /// Change in percent of the previous close
    pub change_percent: f64,
    /// Industry label derived from the code prefix
    pub industry: String,
    /// Projected returns per period
    #[serde(default)]
    pub returns: BTreeMap<Period, PeriodReturn>,
}

impl Security {
    /// Build a record from a close price and absolute change.
    ///
    /// The change percent is computed against the implied previous close and
    /// is zero when that previous close is not positive.
    pub fn from_quote(code: &str, name: &str, price: f64, change: f64) -> Self {
        let previous = price - change;
        let change_percent = if previous > 0.0 {
            change / previous * 100.0
        } else {
            0.0
        };

        Self {
            code: code.trim().to_string(),
            name: name.trim().to_string(),
            price,
            change,
            change_percent,
            industry: industry_for_code(code.trim()).to_string(),
            returns: BTreeMap::new(),
        }
    }

    /// Check the inclusion invariant: 4-digit code and positive price.
    pub fn is_valid(&self) -> bool {
        is_valid_code(&self.code) && self.price.is_finite() && self.price > 0.0
    }

    /// Return for a period, if projected.
    pub fn period_return(&self, period: Period) -> Option<f64> {
        self.returns.get(&period).map(|r| r.value)
    }

    /// Basis of the return for a period, if projected.
    pub fn return_basis(&self, period: Period) -> Option<ReturnBasis> {
        self.returns.get(&period).map(|r| r.basis)
    }
}

/// Check that a ticker is exactly four ASCII digits.
pub fn is_valid_code(code: &str) -> bool {
    code.len() == 4 && code.bytes().all(|b| b.is_ascii_digit())
}

/// The full universe for one trading day. Replaced wholesale on every fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Trading day
    pub date: NaiveDate,
    /// Where the rows came from (endpoint URL or "demo")
    pub source: String,
    /// Valid records only
    pub securities: Vec<Security>,
}

impl MarketSnapshot {
    /// Look up a security by code.
    pub fn find(&self, code: &str) -> Option<&Security> {
        self.securities.iter().find(|s| s.code == code)
    }

    pub fn len(&self) -> usize {
        self.securities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.securities.is_empty()
    }
}
