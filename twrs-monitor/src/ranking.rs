//! Relative-strength scoring.
//!
//! A score is the share of the comparison set with a strictly lower return,
//! scaled to 0..=99. Ties share a score and never count against each other,
//! so a set of identical returns scores 0 across the board.

use serde::Serialize;

use crate::data::{Period, Security};

/// Highest possible score.
pub const MAX_SCORE: u8 = 99;

/// A security with its score inside one filtered set for one period.
#[derive(Debug, Clone, Serialize)]
pub struct RankedSecurity {
    pub security: Security,
    /// 0..=99, relative to the set it was scored in
    pub score: u8,
    /// Return used for scoring (0.0 when the period was not projected)
    pub period_return: f64,
}

/// Score one return against the full comparison set (which includes it).
pub fn rs_score(value: f64, set: &[f64]) -> u8 {
    if set.is_empty() {
        return 0;
    }
    let value = comparable(value);
    let lower = set.iter().filter(|v| comparable(**v) < value).count();
    scale(lower, set.len())
}

/// Score every return in the set against the set.
///
/// Sorts once and counts with a binary search, so large universes stay
/// O(n log n).
pub fn rs_scores(returns: &[f64]) -> Vec<u8> {
    if returns.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<f64> = returns.iter().copied().map(comparable).collect();
    sorted.sort_by(f64::total_cmp);

    returns
        .iter()
        .map(|v| {
            let v = comparable(*v);
            let lower = sorted.partition_point(|x| *x < v);
            scale(lower, returns.len())
        })
        .collect()
}

/// Score a set of securities for a period. Output order matches input.
pub fn rank(securities: &[Security], period: Period) -> Vec<RankedSecurity> {
    let returns: Vec<f64> = securities
        .iter()
        .map(|s| s.period_return(period).unwrap_or(0.0))
        .collect();

    rs_scores(&returns)
        .into_iter()
        .zip(securities.iter().zip(returns.iter()))
        .map(|(score, (security, period_return))| RankedSecurity {
            security: security.clone(),
            score,
            period_return: *period_return,
        })
        .collect()
}

/// NaN sorts below everything so a bad row can never outrank a real one.
fn comparable(v: f64) -> f64 {
    if v.is_nan() {
        f64::NEG_INFINITY
    } else {
        v
    }
}

fn scale(lower: usize, total: usize) -> u8 {
    let raw = (f64::from(MAX_SCORE) * lower as f64 / total as f64).round();
    raw.clamp(0.0, f64::from(MAX_SCORE)) as u8
}
