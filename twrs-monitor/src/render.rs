//! Terminal rendering for the CLI.

use console::{pad_str, style, Alignment, StyledObject};
use twrs_common::util::{format_duration_secs, truncate_with_ellipsis};

use twrs_monitor::data::{MarketSnapshot, Period, ReturnBasis, Security};
use twrs_monitor::ranking::RankedSecurity;
use twrs_monitor::state::{Settings, WatchEntry};
use twrs_monitor::view::ViewStats;

const NAME_WIDTH: usize = 12;

/// Colour a score by band.
pub fn score_style(score: u8) -> StyledObject<String> {
    let text = format!("{:>3}", score);
    if score >= 80 {
        style(text).green().bold()
    } else if score >= 60 {
        style(text).blue()
    } else if score >= 40 {
        style(text)
    } else {
        style(text).red()
    }
}

fn pct_style(v: f64) -> StyledObject<String> {
    let text = format!("{:>+8.2}%", v);
    if v > 0.0 {
        style(text).red()
    } else if v < 0.0 {
        style(text).green()
    } else {
        style(text)
    }
}

fn cell(s: &str, width: usize, align: Alignment) -> String {
    let s = truncate_with_ellipsis(s, width);
    pad_str(&s, width, align, None).into_owned()
}

/// Header line for a view plus its score summary.
pub fn print_header(snapshot: &MarketSnapshot, period: Period, shown: usize, stats: &ViewStats) {
    println!(
        "{} {}  期間 {}  顯示 {}/{} 檔  來源 {}",
        style("📊").bold(),
        style(snapshot.date).bold(),
        style(period.label()).cyan(),
        shown,
        stats.count,
        style(&snapshot.source).dim()
    );
    println!(
        "   RS ≥ 80 (強勢) {}  RS 60-79 (中強) {}  平均 RS {}",
        style(stats.strong).green().bold(),
        style(stats.moderate).blue(),
        stats.average_score
    );
}

/// Ranked table, optionally with a detail row under each security.
pub fn print_ranking(ranked: &[RankedSecurity], period: Period, detail: bool) {
    println!(
        "{}  {}  {}  {}  {}  {}  {}",
        cell("#", 4, Alignment::Right),
        cell("代號", 4, Alignment::Left),
        cell("名稱", NAME_WIDTH, Alignment::Left),
        cell("RS", 3, Alignment::Right),
        cell("收盤", 9, Alignment::Right),
        cell("漲跌幅", 9, Alignment::Right),
        cell(&format!("{}報酬", period.label()), 10, Alignment::Right),
    );

    for (i, r) in ranked.iter().enumerate() {
        let estimated = r.security.return_basis(period) == Some(ReturnBasis::Estimated);
        println!(
            "{}  {}  {}  {}  {:>9.2}  {}  {}{}",
            cell(&(i + 1).to_string(), 4, Alignment::Right),
            style(&r.security.code).bold(),
            cell(&r.security.name, NAME_WIDTH, Alignment::Left),
            score_style(r.score),
            r.security.price,
            pct_style(r.security.change_percent),
            pct_style(r.period_return),
            if estimated { style("*").dim().to_string() } else { " ".into() }
        );
        if detail {
            print_detail(&r.security);
        }
    }

    if ranked.is_empty() {
        println!("{}", style("(無符合條件的股票)").dim());
    } else if ranked.iter().any(|r| r.security.return_basis(period) == Some(ReturnBasis::Estimated)) {
        println!("{}", style("* 估算值：日漲跌幅 × 期間倍數").dim());
    }
}

fn print_detail(security: &Security) {
    let returns: Vec<String> = Period::ALL
        .iter()
        .filter_map(|p| {
            let r = security.returns.get(p)?;
            let mark = if r.basis == ReturnBasis::Estimated { "*" } else { "" };
            Some(format!("{} {:+.2}%{}", p.label(), r.value, mark))
        })
        .collect();

    println!(
        "      {} {}  漲跌 {:+.2}  {}",
        style("└").dim(),
        style(&security.industry).cyan(),
        security.change,
        style(returns.join("  ")).dim()
    );
}

pub fn print_industries(labels: &[(String, usize)]) {
    for (label, count) in labels {
        println!("{}  {:>4}", cell(label, 14, Alignment::Left), count);
    }
}

/// Watch list with live prices when a universe is available.
pub fn print_watchlist(entries: &[WatchEntry], live: Option<&MarketSnapshot>) {
    if entries.is_empty() {
        println!("{}", style("(自選清單為空)").dim());
        return;
    }

    for entry in entries {
        let s = &entry.security;
        let added = entry.added_at.format("%Y-%m-%d");
        match live.and_then(|snap| snap.find(&s.code)) {
            Some(now) => {
                let since = if s.price > 0.0 {
                    (now.price / s.price - 1.0) * 100.0
                } else {
                    0.0
                };
                println!(
                    "{}  {}  加入 {:.2} ({})  現價 {:.2} {}  加入後 {}",
                    style(&s.code).bold(),
                    cell(&s.name, NAME_WIDTH, Alignment::Left),
                    s.price,
                    added,
                    now.price,
                    pct_style(now.change_percent),
                    pct_style(since)
                );
            }
            None => println!(
                "{}  {}  加入 {:.2} ({})",
                style(&s.code).bold(),
                cell(&s.name, NAME_WIDTH, Alignment::Left),
                s.price,
                added
            ),
        }
    }
}

fn on_off(flag: bool) -> StyledObject<&'static str> {
    if flag {
        style("開啟").green()
    } else {
        style("關閉").dim()
    }
}

fn mask(secret: Option<&str>) -> String {
    match secret.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) if s.chars().count() > 8 => {
            let head: String = s.chars().take(4).collect();
            format!("{}…({} chars)", head, s.chars().count())
        }
        Some(_) => "****".into(),
        None => style("未設定").red().to_string(),
    }
}

pub fn print_settings(settings: &Settings, last_report: Option<chrono::NaiveDate>) {
    println!("{}", style("通知設定").bold());
    println!("  Bot token      {}", mask(settings.bot_token.as_deref()));
    println!(
        "  Chat ID        {}",
        settings
            .chat_id
            .clone()
            .unwrap_or_else(|| style("未設定").red().to_string())
    );
    println!(
        "  自動更新       {}  每 {}  推播排行 {}",
        on_off(settings.auto_refresh),
        format_duration_secs(settings.refresh_interval_secs),
        on_off(settings.push_top_on_refresh)
    );
    println!(
        "  每日摘要       {}  {}-{}  上次 {}",
        on_off(settings.daily_report),
        settings.report_window.start.format("%H:%M"),
        settings.report_window.end.format("%H:%M"),
        last_report
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".into())
    );
    println!("  排行筆數       {}", settings.top_n);
    println!("  警示門檻       {:.1}%", settings.alert_change_pct);
}
