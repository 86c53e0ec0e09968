//! Row parser strategies for the end-of-day payloads.
//!
//! The exchange has published the same data in several shapes over the years.
//! Each shape is a [`RowLayout`]. A payload is parsed by trying the declared
//! layout first and then the others, accepting the first layout that yields
//! at least one valid security.

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

use super::Security;

/// Close prices outside this open range are treated as implausible.
const PLAUSIBLE_PRICE: (f64, f64) = (0.0, 10_000.0);

// ============================================================================
// Layouts
// ============================================================================

/// Known payload layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowLayout {
    /// `{stat, data: [[code, name, vol, value, open, high, low, close, change, ...]]}`
    DayAll,
    /// `{stat, tables: [{fields, data}]}` with sign and magnitude in separate cells
    MiIndex,
    /// `[{Code, Name, ClosingPrice, Change, ...}]`
    OpenApi,
    /// Unknown array rows, close located by plausibility
    Heuristic,
}

impl RowLayout {
    /// Fallback order after the declared layout.
    pub const ALL: [RowLayout; 4] = [Self::DayAll, Self::MiIndex, Self::OpenApi, Self::Heuristic];

    pub fn name(&self) -> &'static str {
        match self {
            Self::DayAll => "day_all",
            Self::MiIndex => "mi_index",
            Self::OpenApi => "open_api",
            Self::Heuristic => "heuristic",
        }
    }

    fn parse(&self, payload: &Value) -> LayoutOutcome {
        match self {
            Self::DayAll => parse_day_all(payload),
            Self::MiIndex => parse_mi_index(payload),
            Self::OpenApi => parse_open_api(payload),
            Self::Heuristic => parse_heuristic(payload),
        }
    }
}

impl fmt::Display for RowLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RowLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "day_all" | "stock_day_all" => Ok(Self::DayAll),
            "mi_index" => Ok(Self::MiIndex),
            "open_api" | "openapi" => Ok(Self::OpenApi),
            "heuristic" => Ok(Self::Heuristic),
            other => Err(format!("unknown row layout '{}'", other)),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Why a payload produced no securities.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// The status indicator was not OK, or there were no rows at all
    #[error("feed reported no data: {0}")]
    Unavailable(String),
    /// Rows were present but none survived validation under any layout
    #[error("no usable rows: {0}")]
    NoRows(String),
}

/// Rows seen and securities accepted by one layout attempt.
#[derive(Debug, Default)]
struct LayoutOutcome {
    rows_seen: usize,
    securities: Vec<Security>,
}

impl LayoutOutcome {
    fn push(&mut self, security: Option<Security>) {
        self.rows_seen += 1;
        if let Some(s) = security.filter(Security::is_valid) {
            self.securities.push(s);
        }
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Parse a payload into valid securities.
///
/// Invalid rows (bad code, non-positive price, unparseable numbers) are
/// dropped silently.
pub fn parse_payload(declared: RowLayout, payload: &Value) -> Result<Vec<Security>, ParseError> {
    check_status(payload)?;

    let order = std::iter::once(declared).chain(RowLayout::ALL.into_iter().filter(|l| *l != declared));

    let mut most_rows = 0;
    for layout in order {
        let outcome = layout.parse(payload);
        debug!(
            layout = layout.name(),
            rows = outcome.rows_seen,
            accepted = outcome.securities.len(),
            "Tried row layout"
        );
        if !outcome.securities.is_empty() {
            return Ok(outcome.securities);
        }
        most_rows = most_rows.max(outcome.rows_seen);
    }

    if most_rows == 0 {
        Err(ParseError::Unavailable("payload has no rows".into()))
    } else {
        Err(ParseError::NoRows(format!(
            "{} rows present, none valid under any layout",
            most_rows
        )))
    }
}

/// Trading day the payload claims to describe, if it says.
///
/// Envelopes carry `date` as `YYYYMMDD`; open-data rows carry `Date` as a
/// ROC calendar date (`1131016` is 2024-10-16).
pub fn payload_date(payload: &Value) -> Option<NaiveDate> {
    if let Some(date) = payload.get("date").and_then(Value::as_str) {
        return NaiveDate::parse_from_str(date.trim(), "%Y%m%d").ok();
    }

    let first = payload.as_array()?.first()?;
    let roc = first.get("Date").and_then(Value::as_str)?;
    parse_roc_date(roc)
}

/// Parse a ROC calendar date (`YYYMMDD`, year offset 1911).
pub fn parse_roc_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.len() < 7 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (year, rest) = s.split_at(s.len() - 4);
    let year: i32 = year.parse().ok()?;
    let month: u32 = rest[..2].parse().ok()?;
    let day: u32 = rest[2..].parse().ok()?;
    NaiveDate::from_ymd_opt(year + 1911, month, day)
}

fn check_status(payload: &Value) -> Result<(), ParseError> {
    match payload {
        Value::Object(map) => match map.get("stat").and_then(Value::as_str) {
            Some(stat) if stat.trim().eq_ignore_ascii_case("ok") => Ok(()),
            Some(stat) => Err(ParseError::Unavailable(stat.trim().to_string())),
            None => Ok(()),
        },
        Value::Array(rows) if rows.is_empty() => Err(ParseError::Unavailable("empty payload".into())),
        Value::Array(_) => Ok(()),
        _ => Err(ParseError::Unavailable("payload is not a JSON object or array".into())),
    }
}

// ============================================================================
// Layout strategies
// ============================================================================

fn parse_day_all(payload: &Value) -> LayoutOutcome {
    let mut outcome = LayoutOutcome::default();
    let Some(rows) = payload.get("data").and_then(Value::as_array) else {
        return outcome;
    };

    let fields = string_list(payload.get("fields"));
    let close_idx = field_index(&fields, &["收盤價", "ClosingPrice"]).unwrap_or(7);
    let change_idx = field_index(&fields, &["漲跌價差", "Change"]).unwrap_or(8);

    for row in rows {
        let cells = row_cells(row);
        if cells.len() <= close_idx.max(change_idx) {
            outcome.push(None);
            continue;
        }
        let quote = parse_number(&cells[close_idx])
            .zip(parse_number(&cells[change_idx]))
            .map(|(close, change)| Security::from_quote(&cells[0], &cells[1], close, change));
        outcome.push(quote);
    }
    outcome
}

fn parse_mi_index(payload: &Value) -> LayoutOutcome {
    let mut outcome = LayoutOutcome::default();
    let Some((fields, rows)) = find_stock_table(payload) else {
        return outcome;
    };

    let close_idx = field_index(&fields, &["收盤價"]).unwrap_or(8);
    let sign_idx = field_index(&fields, &["漲跌(+/-)"]).unwrap_or(9);
    let change_idx = field_index(&fields, &["漲跌價差"]).unwrap_or(10);
    let needed = close_idx.max(sign_idx).max(change_idx);

    for row in rows {
        let cells = row_cells(row);
        if cells.len() <= needed {
            outcome.push(None);
            continue;
        }
        let quote = parse_number(&cells[close_idx])
            .zip(parse_number(&cells[change_idx]))
            .map(|(close, magnitude)| {
                let change = parse_sign(&cells[sign_idx]) * magnitude.abs();
                Security::from_quote(&cells[0], &cells[1], close, change)
            });
        outcome.push(quote);
    }
    outcome
}

fn parse_open_api(payload: &Value) -> LayoutOutcome {
    let mut outcome = LayoutOutcome::default();
    let Some(rows) = payload.as_array() else {
        return outcome;
    };

    for row in rows.iter().filter(|r| r.is_object()) {
        let text = |key: &str| row.get(key).map(cell_text).unwrap_or_default();
        let code = text("Code");
        let name = text("Name");
        let quote = parse_number(&text("ClosingPrice"))
            .map(|close| {
                let change = parse_number(&text("Change")).unwrap_or(0.0);
                Security::from_quote(&code, &name, close, change)
            });
        outcome.push(quote);
    }
    outcome
}

fn parse_heuristic(payload: &Value) -> LayoutOutcome {
    let mut outcome = LayoutOutcome::default();

    let rows: Vec<&Value> = if let Some(rows) = payload.get("data").and_then(Value::as_array) {
        rows.iter().collect()
    } else if let Some(rows) = payload.as_array() {
        rows.iter().filter(|r| r.is_array()).collect()
    } else if let Some((_, rows)) = find_stock_table(payload) {
        rows.into_iter().collect()
    } else {
        return outcome;
    };

    for row in rows {
        let cells = row_cells(row);
        outcome.push(heuristic_quote(&cells));
    }
    outcome
}

/// Locate change as the first signed cell after the name, and close as the
/// nearest plausible number before it. Without any signed cell, the last
/// plausible number is the close and the change is zero.
fn heuristic_quote(cells: &[String]) -> Option<Security> {
    if cells.len() < 3 {
        return None;
    }

    let mut change: Option<(usize, f64)> = None;
    for i in 2..cells.len() {
        let cell = strip_html(&cells[i]);
        let cell = cell.trim();
        if cell == "+" || cell == "-" {
            if let Some(magnitude) = cells.get(i + 1).and_then(|c| parse_number(c)) {
                change = Some((i, parse_sign(cell) * magnitude.abs()));
                break;
            }
        } else if (cell.starts_with('+') || cell.starts_with('-')) && cell.len() > 1 {
            if let Some(value) = parse_number(cell) {
                change = Some((i, value));
                break;
            }
        }
    }

    let plausible = |c: &String| parse_number(c).filter(|v| *v > PLAUSIBLE_PRICE.0 && *v < PLAUSIBLE_PRICE.1);

    let (close, change) = match change {
        Some((idx, change)) => (cells[2..idx].iter().rev().find_map(plausible)?, change),
        None => (cells[2..].iter().rev().find_map(plausible)?, 0.0),
    };

    Some(Security::from_quote(&cells[0], &cells[1], close, change))
}

// ============================================================================
// Cell helpers
// ============================================================================

fn html_tag() -> Option<&'static Regex> {
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[^>]*>").ok()).as_ref()
}

fn strip_html(s: &str) -> String {
    match html_tag() {
        Some(re) => re.replace_all(s, "").into_owned(),
        None => s.to_string(),
    }
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn row_cells(row: &Value) -> Vec<String> {
    row.as_array()
        .map(|cells| cells.iter().map(cell_text).collect())
        .unwrap_or_default()
}

fn string_list(v: Option<&Value>) -> Vec<String> {
    v.and_then(Value::as_array)
        .map(|items| items.iter().map(cell_text).collect())
        .unwrap_or_default()
}

fn field_index(fields: &[String], names: &[&str]) -> Option<usize> {
    fields.iter().position(|f| names.iter().any(|n| f.trim() == *n))
}

fn is_stock_table(fields: &[String]) -> bool {
    field_index(fields, &["證券代號"]).is_some() && field_index(fields, &["收盤價"]).is_some()
}

/// Find the per-security table in an MI_INDEX report.
fn find_stock_table(payload: &Value) -> Option<(Vec<String>, Vec<&Value>)> {
    if let Some(tables) = payload.get("tables").and_then(Value::as_array) {
        for table in tables {
            let fields = string_list(table.get("fields"));
            if is_stock_table(&fields) {
                let rows = table.get("data").and_then(Value::as_array)?;
                return Some((fields, rows.iter().collect()));
            }
        }
    }

    // Older reports number their tables: fields1/data1 ... fields9/data9
    (1..=12).find_map(|n| {
        let fields = string_list(payload.get(format!("fields{}", n)));
        if !is_stock_table(&fields) {
            return None;
        }
        let rows = payload.get(format!("data{}", n)).and_then(Value::as_array)?;
        Some((fields, rows.iter().collect()))
    })
}

/// Parse a numeric cell. Tolerates thousands separators, HTML wrappers, and
/// the `X` marker the exchange prefixes to non-comparable changes.
pub(crate) fn parse_number(cell: &str) -> Option<f64> {
    let cleaned = strip_html(cell).replace(',', "");
    let cleaned = cleaned.trim().trim_start_matches(['X', 'x']).trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '-') {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Direction of a sign cell. Missing or unknown markers count as positive so
/// the magnitude passes through unchanged (it is 0.00 on flat days).
fn parse_sign(cell: &str) -> f64 {
    let cleaned = strip_html(cell);
    if cleaned.trim().starts_with('-') {
        -1.0
    } else {
        1.0
    }
}
