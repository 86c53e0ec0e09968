//! Filter and sort view over a market snapshot.
//!
//! The view is a pure function of the base list and the filter. Scores are
//! computed against the filtered set, so narrowing the filter rescores every
//! remaining security.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use twrs_common::{Error, Result};

use crate::data::{industry_labels, Period, Security, CATCH_ALL_INDUSTRY};
use crate::ranking::{rank, RankedSecurity};

/// Default inclusive price range.
pub const DEFAULT_PRICE_RANGE: (f64, f64) = (0.0, 1000.0);

/// Selector values meaning every industry.
pub const ALL_INDUSTRIES: [&str; 2] = ["全部", "all"];

/// Score bands shown in the view summary.
pub const STRONG_SCORE: u8 = 80;
pub const MODERATE_SCORE: u8 = 60;

fn is_all_industries(selector: &str) -> bool {
    ALL_INDUSTRIES
        .iter()
        .any(|all| all.eq_ignore_ascii_case(selector.trim()))
}

/// Resolve an industry selector. `全部`/`all` mean no filter; anything else
/// must be a known label.
pub fn parse_industry(selector: &str) -> Result<Option<String>> {
    let selector = selector.trim();
    if is_all_industries(selector) {
        return Ok(None);
    }
    let labels = industry_labels();
    if labels.iter().any(|label| *label == selector) {
        return Ok(Some(selector.to_string()));
    }
    Err(Error::InvalidInput(format!(
        "未知的產業 '{}'，可用: {}, {}",
        selector,
        ALL_INDUSTRIES[0],
        labels.join(", ")
    )))
}

/// Filter inputs for one view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewFilter {
    /// `None` means all industries
    pub industry: Option<String>,
    /// Inclusive lower bound
    pub min_price: f64,
    /// Inclusive upper bound
    pub max_price: f64,
    /// Case-insensitive substring over code or name
    pub search: Option<String>,
    pub period: Period,
}

impl Default for ViewFilter {
    fn default() -> Self {
        Self {
            industry: None,
            min_price: DEFAULT_PRICE_RANGE.0,
            max_price: DEFAULT_PRICE_RANGE.1,
            search: None,
            period: Period::default(),
        }
    }
}

impl ViewFilter {
    pub fn with_period(period: Period) -> Self {
        Self {
            period,
            ..Self::default()
        }
    }

    /// No price bounds. Used for notifications, which rank the whole market.
    pub fn all(period: Period) -> Self {
        Self {
            max_price: f64::INFINITY,
            ..Self::with_period(period)
        }
    }

    /// Whether a security passes the industry, price, and search predicates.
    pub fn matches(&self, security: &Security) -> bool {
        if let Some(industry) = self.industry.as_deref() {
            if !is_all_industries(industry) && security.industry != industry {
                return false;
            }
        }

        if security.price < self.min_price || security.price > self.max_price {
            return false;
        }

        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                security.code.contains(&term) || security.name.to_lowercase().contains(&term)
            }
            _ => true,
        }
    }
}

/// Filter, score against the filtered set, and sort by score descending.
///
/// Ties on score are broken by the period return, then by code, so output is
/// stable for a given input.
pub fn build_view(base: &[Security], filter: &ViewFilter) -> Vec<RankedSecurity> {
    let filtered: Vec<Security> = base.iter().filter(|s| filter.matches(s)).cloned().collect();

    let mut ranked = rank(&filtered, filter.period);
    ranked.sort_by(compare_ranked);
    ranked
}

fn compare_ranked(a: &RankedSecurity, b: &RankedSecurity) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.period_return.total_cmp(&a.period_return))
        .then_with(|| a.security.code.cmp(&b.security.code))
}

/// Summary of a view: size, band counts, and mean score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewStats {
    pub count: usize,
    /// Score >= 80
    pub strong: usize,
    /// Score 60..=79
    pub moderate: usize,
    /// Rounded mean score, 0 for an empty view
    pub average_score: u8,
}

pub fn view_stats(ranked: &[RankedSecurity]) -> ViewStats {
    if ranked.is_empty() {
        return ViewStats::default();
    }

    let total: u64 = ranked.iter().map(|r| u64::from(r.score)).sum();
    let average = (total as f64 / ranked.len() as f64).round() as u8;
    ViewStats {
        count: ranked.len(),
        strong: ranked.iter().filter(|r| r.score >= STRONG_SCORE).count(),
        moderate: ranked
            .iter()
            .filter(|r| (MODERATE_SCORE..STRONG_SCORE).contains(&r.score))
            .count(),
        average_score: average,
    }
}

/// Industry labels present in the base list, with counts. Catch-all last.
pub fn industries(base: &[Security]) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for security in base {
        *counts.entry(security.industry.as_str()).or_default() += 1;
    }

    let catch_all = counts.remove(CATCH_ALL_INDUSTRY);
    let mut out: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(label, n)| (label.to_string(), n))
        .collect();
    if let Some(n) = catch_all {
        out.push((CATCH_ALL_INDUSTRY.to_string(), n));
    }
    out
}

/// Top `n` by change percent (gainers) or its reverse (losers), for summaries.
pub fn top_movers(base: &[Security], n: usize, gainers: bool) -> Vec<Security> {
    let mut sorted: Vec<Security> = base.to_vec();
    sorted.sort_by(|a, b| {
        let ord = b.change_percent.total_cmp(&a.change_percent);
        if gainers {
            ord
        } else {
            ord.reverse()
        }
    });
    sorted.truncate(n);
    sorted
}
