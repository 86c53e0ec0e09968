//! Chat notifications.
//!
//! Messages go to a Telegram-style bot API as HTML. There are three kinds:
//! the top-N leaderboard, the watch-list alert, and the end-of-day summary.
//! Delivery is a single POST with no retries.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use twrs_common::util::{sanitize_for_log, truncate_with_ellipsis};
use twrs_common::{Config, Error, Result};

use crate::data::{Period, ReturnBasis, Security};
use crate::ranking::RankedSecurity;
use crate::state::{Settings, WatchEntry};

/// Bot API hard limit on message length.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Gainers and losers listed in the daily summary.
pub const SUMMARY_MOVERS: usize = 5;

/// Request body for `sendMessage`.
#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

/// Response from `sendMessage`. Only `ok` and the error text matter.
#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: Option<bool>,
    description: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// Bot API client.
pub struct NotificationClient {
    api_base: String,
    client: reqwest::Client,
}

impl NotificationClient {
    pub fn new(api_base: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.notification.api_base,
            Duration::from_secs(config.notification.timeout_secs.max(1)),
        )
    }

    /// Send with the credentials stored in settings.
    pub async fn send(&self, settings: &Settings, text: &str) -> Result<()> {
        let (token, chat_id) = settings
            .credentials()
            .ok_or_else(|| Error::Notification("credentials not configured".into()))?;
        self.send_text(token, chat_id, text).await
    }

    /// POST one message. Fails on transport errors, non-2xx, or `ok: false`.
    pub async fn send_text(&self, token: &str, chat_id: &str, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, token);
        let text = fit_message(text, MAX_MESSAGE_CHARS);
        let body = SendMessageRequest {
            chat_id,
            text: &text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Notification(sanitize_for_log(&e.to_string())))?;

        let status = response.status();
        let raw = response.text().await.unwrap_or_default();
        let parsed: Option<SendMessageResponse> = serde_json::from_str(&raw).ok();

        if !status.is_success() {
            let detail = parsed
                .and_then(|r| r.description)
                .unwrap_or_else(|| truncate_with_ellipsis(&raw, 200));
            return Err(Error::Notification(format!("HTTP {}: {}", status, detail)));
        }

        if let Some(SendMessageResponse { ok: Some(false), description }) = parsed {
            return Err(Error::Notification(
                description.unwrap_or_else(|| "bot API returned ok=false".into()),
            ));
        }

        tracing::info!(
            url = %sanitize_for_log(&url),
            chars = text.chars().count(),
            "Notification sent"
        );
        Ok(())
    }
}

/// Marker appended to a message that was cut.
const CUT_MARKER: &str = "\n...";

/// Fit a message into `max_chars` for a single send.
///
/// Every formatter closes its tags on the line that opens them, so the cut
/// goes at the last line break that fits. A single over-long line is cut
/// before its last tag opening instead.
fn fit_message(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let budget = max_chars.saturating_sub(CUT_MARKER.chars().count());
    let limit = text
        .char_indices()
        .nth(budget)
        .map_or(text.len(), |(idx, _)| idx);
    let head = &text[..limit];

    let cut = match head.rfind('\n') {
        Some(pos) if pos > 0 => pos,
        _ => head.rfind('<').unwrap_or(limit),
    };
    format!("{}{}", head[..cut].trim_end(), CUT_MARKER)
}

// ============================================================================
// Watch status
// ============================================================================

/// Live view of a watch entry.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchStatus {
    pub code: String,
    pub name: String,
    /// Price when the entry was added
    pub snapshot_price: f64,
    /// Today's quote and score within the full universe, if listed today
    pub live: Option<LiveQuote>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveQuote {
    pub price: f64,
    pub change_percent: f64,
    pub score: u8,
}

impl WatchStatus {
    /// Whether today's move reaches the alert threshold.
    pub fn is_alert(&self, threshold_pct: f64) -> bool {
        self.live
            .map(|q| q.change_percent.abs() >= threshold_pct)
            .unwrap_or(false)
    }

    /// Move since the entry was added, in percent.
    pub fn since_added_pct(&self) -> Option<f64> {
        let live = self.live?;
        if self.snapshot_price > 0.0 {
            Some((live.price / self.snapshot_price - 1.0) * 100.0)
        } else {
            None
        }
    }
}

/// Join watch entries with a ranking of the full universe.
pub fn watch_statuses(watchlist: &[WatchEntry], universe: &[RankedSecurity]) -> Vec<WatchStatus> {
    watchlist
        .iter()
        .map(|entry| {
            let live = universe
                .iter()
                .find(|r| r.security.code == entry.security.code)
                .map(|r| LiveQuote {
                    price: r.security.price,
                    change_percent: r.security.change_percent,
                    score: r.score,
                });
            WatchStatus {
                code: entry.security.code.clone(),
                name: entry.security.name.clone(),
                snapshot_price: entry.security.price,
                live,
            }
        })
        .collect()
}

// ============================================================================
// Formatters
// ============================================================================

/// Escape text for HTML parse mode.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn signed_pct(v: f64) -> String {
    format!("{:+.2}%", v)
}

fn trend_emoji(v: f64) -> &'static str {
    if v > 0.0 {
        "🔺"
    } else if v < 0.0 {
        "🔻"
    } else {
        "➖"
    }
}

/// Top-N leaderboard. `ranked` must already be sorted by score.
pub fn format_top_n(date: NaiveDate, period: Period, ranked: &[RankedSecurity], n: usize) -> String {
    let mut msg = format!(
        "🏆 <b>相對強度排行 Top {}</b>\n📅 {} · 期間 {}\n",
        n,
        date,
        period.label()
    );

    if ranked.is_empty() {
        msg.push_str("\n(無符合條件的股票)");
        return msg;
    }

    msg.push('\n');
    for (i, r) in ranked.iter().take(n).enumerate() {
        let _ = writeln!(
            msg,
            "{}. <code>{}</code> {}  RS <b>{}</b>  {:.2}  {} {}",
            i + 1,
            r.security.code,
            escape_html(&r.security.name),
            r.score,
            r.security.price,
            trend_emoji(r.security.change_percent),
            signed_pct(r.security.change_percent)
        );
    }

    if ranked
        .iter()
        .take(n)
        .any(|r| r.security.return_basis(period) == Some(ReturnBasis::Estimated))
    {
        msg.push_str("\n<i>* 期間報酬含估算值</i>");
    }
    msg
}

/// Watch-list alert with every entry, flagged ones first.
pub fn format_watch_alert(date: NaiveDate, statuses: &[WatchStatus], threshold_pct: f64) -> String {
    let mut msg = format!("👀 <b>自選股監控</b>\n📅 {}\n", date);

    if statuses.is_empty() {
        msg.push_str("\n(自選清單為空)");
        return msg;
    }

    let alerts = statuses.iter().filter(|s| s.is_alert(threshold_pct)).count();
    if alerts > 0 {
        let _ = writeln!(msg, "⚠️ {} 檔漲跌幅達 {:.1}%", alerts, threshold_pct);
    }

    let mut ordered: Vec<&WatchStatus> = statuses.iter().collect();
    ordered.sort_by_key(|s| !s.is_alert(threshold_pct));

    msg.push('\n');
    for status in ordered {
        write_watch_line(&mut msg, status, threshold_pct);
    }
    msg
}

fn write_watch_line(msg: &mut String, status: &WatchStatus, threshold_pct: f64) {
    let flag = if status.is_alert(threshold_pct) { "⚠️ " } else { "" };
    match status.live {
        Some(q) => {
            let since = status
                .since_added_pct()
                .map(|p| format!("  加入後 {}", signed_pct(p)))
                .unwrap_or_default();
            let _ = writeln!(
                msg,
                "{}<code>{}</code> {}  {:.2}  {} {}  RS {}{}",
                flag,
                status.code,
                escape_html(&status.name),
                q.price,
                trend_emoji(q.change_percent),
                signed_pct(q.change_percent),
                q.score,
                since
            );
        }
        None => {
            let _ = writeln!(
                msg,
                "<code>{}</code> {}  今日無報價",
                status.code,
                escape_html(&status.name)
            );
        }
    }
}

/// Inputs for the end-of-day summary.
pub struct DailySummary<'a> {
    pub date: NaiveDate,
    pub period: Period,
    /// Full universe ranking, sorted by score
    pub ranked: &'a [RankedSecurity],
    pub top_n: usize,
    pub gainers: &'a [Security],
    pub losers: &'a [Security],
    pub watch: &'a [WatchStatus],
    pub alert_change_pct: f64,
}

/// End-of-day summary: top scores, top gainers, top losers, watch list.
pub fn format_daily_summary(summary: &DailySummary<'_>) -> String {
    let mut msg = format!(
        "📋 <b>每日收盤摘要</b>\n📅 {} · {} 檔上市股票\n",
        summary.date,
        summary.ranked.len()
    );

    let _ = writeln!(msg, "\n🏆 <b>RS 前 {} 名</b>（{}）", summary.top_n, summary.period.label());
    for (i, r) in summary.ranked.iter().take(summary.top_n).enumerate() {
        let _ = writeln!(
            msg,
            "{}. <code>{}</code> {}  RS <b>{}</b>",
            i + 1,
            r.security.code,
            escape_html(&r.security.name),
            r.score
        );
    }

    for (title, movers) in [("📈 <b>漲幅前五</b>", summary.gainers), ("📉 <b>跌幅前五</b>", summary.losers)] {
        let _ = writeln!(msg, "\n{}", title);
        for s in movers {
            let _ = writeln!(
                msg,
                "<code>{}</code> {}  {:.2}  {}",
                s.code,
                escape_html(&s.name),
                s.price,
                signed_pct(s.change_percent)
            );
        }
    }

    if !summary.watch.is_empty() {
        msg.push_str("\n👀 <b>自選股</b>\n");
        for status in summary.watch {
            write_watch_line(&mut msg, status, summary.alert_change_pct);
        }
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ReturnProjector;
    use crate::view::{build_view, top_movers, ViewFilter};
    use chrono::Utc;

    fn universe() -> Vec<Security> {
        let mut securities = vec![
            Security::from_quote("2330", "台積電", 1035.0, 15.0),
            Security::from_quote("2303", "聯電", 50.0, 3.0),
            Security::from_quote("2881", "富邦金", 89.5, -0.5),
            Security::from_quote("1101", "A&B<C>", 33.1, 0.0),
        ];
        ReturnProjector::default().project_estimated(&mut securities);
        securities
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 16).unwrap()
    }

    fn crowded_universe(n: usize) -> Vec<RankedSecurity> {
        let mut securities: Vec<Security> = (0..n)
            .map(|i| {
                let change = (i % 17) as f64 - 8.0;
                Security::from_quote(&format!("{}", 1100 + i), "測試股份有限公司", 50.0 + i as f64 / 10.0, change)
            })
            .collect();
        ReturnProjector::default().project_estimated(&mut securities);
        build_view(&securities, &ViewFilter::all(Period::ThreeMonths))
    }

    #[test]
    fn test_fit_message_short_is_untouched() {
        assert_eq!(fit_message("<b>hi</b>\nthere", 100), "<b>hi</b>\nthere");
    }

    #[test]
    fn test_fit_message_cuts_on_line_break() {
        let msg = format_top_n(date(), Period::ThreeMonths, &crowded_universe(300), 200);
        assert!(msg.chars().count() > MAX_MESSAGE_CHARS);

        let fitted = fit_message(&msg, MAX_MESSAGE_CHARS);
        assert!(fitted.chars().count() <= MAX_MESSAGE_CHARS);
        assert!(fitted.ends_with(CUT_MARKER));
        let body = fitted.trim_end_matches(CUT_MARKER);
        assert!(msg.starts_with(body));
        assert!(msg[body.len()..].starts_with('\n'));
        assert_eq!(body.matches("<b>").count(), body.matches("</b>").count());
        assert_eq!(body.matches("<code>").count(), body.matches("</code>").count());
    }

    #[test]
    fn test_fit_message_single_line_avoids_partial_tag() {
        let line = format!("{}<b>tail</b>", "x".repeat(60));
        let fitted = fit_message(&line, 66);
        assert_eq!(fitted, format!("{}{}", "x".repeat(60), CUT_MARKER));
    }

    #[test]
    fn test_top_n_format() {
        let view = build_view(&universe(), &ViewFilter::default());
        let msg = format_top_n(date(), Period::ThreeMonths, &view, 2);
        assert!(msg.contains("Top 2"));
        assert!(msg.contains("3個月"));
        assert!(msg.contains("1. <code>2303</code>"));
        assert!(!msg.contains("2881"));
        assert!(msg.contains("估算"));
    }

    #[test]
    fn test_html_escaped() {
        let view = build_view(&universe(), &ViewFilter::default());
        let msg = format_top_n(date(), Period::OneWeek, &view, 10);
        assert!(msg.contains("A&amp;B&lt;C&gt;"));
    }

    #[test]
    fn test_watch_alert_flags_threshold() {
        let securities = universe();
        let watchlist: Vec<WatchEntry> = ["2303", "2881", "9999"]
            .iter()
            .map(|code| WatchEntry {
                security: securities
                    .iter()
                    .find(|s| s.code == *code)
                    .cloned()
                    .unwrap_or_else(|| Security::from_quote(code, "下市", 10.0, 0.0)),
                added_at: Utc::now(),
            })
            .collect();

        let ranked = build_view(
            &securities,
            &ViewFilter {
                max_price: f64::MAX,
                ..ViewFilter::default()
            },
        );
        let statuses = watch_statuses(&watchlist, &ranked);
        assert!(statuses[0].is_alert(5.0));
        assert!(!statuses[1].is_alert(5.0));
        assert!(statuses[2].live.is_none());

        let msg = format_watch_alert(date(), &statuses, 5.0);
        assert!(msg.contains("1 檔"));
        assert!(msg.contains("今日無報價"));
        let flagged = msg.find("⚠️ <code>2303</code>").unwrap();
        let calm = msg.find("<code>2881</code>").unwrap();
        assert!(flagged < calm);
    }

    #[test]
    fn test_daily_summary_sections() {
        let securities = universe();
        let ranked = build_view(&securities, &ViewFilter::default());
        let gainers = top_movers(&securities, SUMMARY_MOVERS, true);
        let losers = top_movers(&securities, SUMMARY_MOVERS, false);
        let msg = format_daily_summary(&DailySummary {
            date: date(),
            period: Period::ThreeMonths,
            ranked: &ranked,
            top_n: 3,
            gainers: &gainers,
            losers: &losers,
            watch: &[],
            alert_change_pct: 5.0,
        });
        assert!(msg.contains("每日收盤摘要"));
        assert!(msg.contains("RS 前 3 名"));
        assert!(msg.contains("漲幅前五"));
        assert!(msg.contains("跌幅前五"));
        assert!(!msg.contains("自選股"));
    }

    #[test]
    fn test_empty_leaderboard() {
        let msg = format_top_n(date(), Period::OneWeek, &[], 10);
        assert!(msg.contains("無符合條件"));
    }
}
