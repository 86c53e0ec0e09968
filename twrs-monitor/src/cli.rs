//! Command-line interface.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use twrs_common::util::parse_duration_secs;
use twrs_common::{config, Config};

use twrs_monitor::data::{DemoFeed, MarketFeed, Period, TwseFeed};
use twrs_monitor::state::{ReportWindow, SqliteStore, Store};
use twrs_monitor::view::{parse_industry, view_stats, ViewFilter};
use twrs_monitor::MonitorService;

use crate::render;

/// twrs - TWSE relative-strength monitor
#[derive(Parser, Debug)]
#[command(name = "twrs")]
#[command(version)]
#[command(about = "TWSE end-of-day relative-strength ranking with chat notifications", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.twrs/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Use the offline demo universe instead of the exchange feed
    #[arg(long, global = true)]
    pub demo: bool,

    /// Log at the configured level for one-shot commands too
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rank the market by relative strength
    Rank {
        /// Return period (1w, 1m, 3m, 6m, 1y)
        #[arg(short, long, default_value = "3m")]
        period: Period,

        /// Only this industry label (全部 or all for every industry)
        #[arg(short, long)]
        industry: Option<String>,

        /// Minimum close (inclusive)
        #[arg(long, default_value_t = 0.0)]
        min: f64,

        /// Maximum close (inclusive)
        #[arg(long, default_value_t = 1000.0)]
        max: f64,

        /// Substring of code or name
        #[arg(short, long)]
        search: Option<String>,

        /// Rows to show
        #[arg(short, long, default_value_t = 30)]
        top: usize,

        /// Trading day (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Show a detail row per security
        #[arg(long)]
        detail: bool,
    },

    /// List industries in today's universe
    Industries {
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Manage the watch list
    Watch {
        #[command(subcommand)]
        action: WatchCommands,
    },

    /// Send a notification now
    Notify {
        #[command(subcommand)]
        action: NotifyCommands,
    },

    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommands,
    },

    /// Run in the foreground with scheduled refresh and daily summary
    Run,

    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum WatchCommands {
    /// Add a code from today's universe
    Add { code: String },
    /// Remove a code
    Remove { code: String },
    /// List entries with live prices
    List,
}

#[derive(Subcommand, Debug)]
pub enum NotifyCommands {
    /// Top-N leaderboard
    Top {
        #[arg(short, long, default_value = "3m")]
        period: Period,
    },
    /// Watch-list alert
    Watch,
    /// End-of-day summary
    Summary {
        #[arg(short, long, default_value = "3m")]
        period: Period,
    },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// Print current settings
    Show,
    /// Set bot credentials
    Credentials {
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        chat: Option<String>,
    },
    /// Configure background refresh
    Refresh {
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
        /// Interval such as 300, 5m, 1h
        #[arg(long)]
        interval: Option<String>,
        /// Push the top-N leaderboard after each refresh
        #[arg(long)]
        push_top: Option<bool>,
    },
    /// Configure the daily summary
    DailyReport {
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
        /// Window start (HH:MM, exchange time)
        #[arg(long)]
        start: Option<String>,
        /// Window end (HH:MM, exchange time)
        #[arg(long)]
        end: Option<String>,
    },
    /// Leaderboard size
    TopN { n: usize },
    /// Watch alert threshold in percent
    AlertThreshold { pct: f64 },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the config file path
    Path,
    /// Print the effective config
    Show,
    /// Write the default config
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ============================================================================
// Execution
// ============================================================================

fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").with_context(|| format!("'{}' is not HH:MM", s))
}

async fn build_service(cli: &Cli, config: &Config) -> Result<Arc<MonitorService>> {
    let feed: Arc<dyn MarketFeed> = if cli.demo {
        Arc::new(DemoFeed::new())
    } else {
        Arc::new(TwseFeed::from_config(config)?)
    };

    // Synthetic closes must never mix with the real history
    let db_path = if cli.demo {
        config.storage.db_path().with_file_name("demo.db")
    } else {
        config.storage.db_path()
    };
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db_path)?);

    Ok(Arc::new(MonitorService::new(config, feed, store).await?))
}

pub async fn execute(cli: Cli, config: Config) -> Result<()> {
    if let Commands::Config { action } = &cli.command {
        return execute_config(action, &cli, &config);
    }

    let service = build_service(&cli, &config).await?;

    match cli.command {
        Commands::Rank {
            period,
            industry,
            min,
            max,
            search,
            top,
            date,
            detail,
        } => {
            if min > max {
                bail!("--min {} is above --max {}", min, max);
            }
            let industry = industry.as_deref().map(parse_industry).transpose()?.flatten();
            service.ensure_snapshot(date).await?;
            let filter = ViewFilter {
                industry,
                min_price: min,
                max_price: max,
                search,
                period,
            };
            let ranked = service.view(&filter).await?;
            if let Some(snapshot) = service.snapshot().await {
                render::print_header(&snapshot, period, ranked.len().min(top), &view_stats(&ranked));
            }
            render::print_ranking(&ranked[..ranked.len().min(top)], period, detail);
        }

        Commands::Industries { date } => {
            service.ensure_snapshot(date).await?;
            render::print_industries(&service.industries().await?);
        }

        Commands::Watch { action } => match action {
            WatchCommands::Add { code } => {
                service.ensure_snapshot(None).await?;
                if service.add_watch(code.trim()).await? {
                    println!("{} 已加入自選 {}", style("✓").green(), code);
                } else {
                    println!("{} {} 已在自選清單中", style("•").dim(), code);
                }
            }
            WatchCommands::Remove { code } => {
                if service.remove_watch(code.trim()).await? {
                    println!("{} 已移除 {}", style("✓").green(), code);
                } else {
                    println!("{} {} 不在自選清單中", style("•").dim(), code);
                }
            }
            WatchCommands::List => {
                // A missing live universe is fine here
                if service.ensure_snapshot(None).await.is_err() {
                    if let Some(message) = service.last_error().await {
                        println!("{} {}", style("!").yellow(), message);
                    }
                }
                let snapshot = service.snapshot().await;
                render::print_watchlist(&service.watchlist().await, snapshot.as_ref());
            }
        },

        Commands::Notify { action } => {
            service.ensure_snapshot(None).await?;
            match action {
                NotifyCommands::Top { period } => service.send_top(period).await?,
                NotifyCommands::Watch => service.send_watch(Period::default()).await?,
                NotifyCommands::Summary { period } => service.send_summary(period).await?,
            }
            println!("{} 通知已送出", style("✓").green());
        }

        Commands::Settings { action } => execute_settings(action, &service).await?,

        Commands::Run => {
            let check_every = Duration::from_secs(config.schedule.check_interval_secs.max(1));
            service.run(check_every).await?;
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}

async fn execute_settings(action: SettingsCommands, service: &MonitorService) -> Result<()> {
    match action {
        SettingsCommands::Show => {}
        SettingsCommands::Credentials { token, chat } => {
            if token.is_none() && chat.is_none() {
                bail!("give --token and/or --chat");
            }
            service
                .update_settings(|s| {
                    if let Some(token) = token {
                        s.bot_token = Some(token.trim().to_string());
                    }
                    if let Some(chat) = chat {
                        s.chat_id = Some(chat.trim().to_string());
                    }
                })
                .await?;
        }
        SettingsCommands::Refresh {
            enable,
            disable,
            interval,
            push_top,
        } => {
            let interval = interval
                .as_deref()
                .map(parse_duration_secs)
                .transpose()
                .map_err(anyhow::Error::msg)?;
            service
                .update_settings(|s| {
                    if enable {
                        s.auto_refresh = true;
                    }
                    if disable {
                        s.auto_refresh = false;
                    }
                    if let Some(secs) = interval {
                        s.refresh_interval_secs = secs;
                    }
                    if let Some(push) = push_top {
                        s.push_top_on_refresh = push;
                    }
                })
                .await?;
        }
        SettingsCommands::DailyReport {
            enable,
            disable,
            start,
            end,
        } => {
            let current = service.settings().await.report_window;
            let start = start.as_deref().map(parse_hhmm).transpose()?.unwrap_or(current.start);
            let end = end.as_deref().map(parse_hhmm).transpose()?.unwrap_or(current.end);
            let window = ReportWindow::new(start, end)?;
            service
                .update_settings(|s| {
                    if enable {
                        s.daily_report = true;
                    }
                    if disable {
                        s.daily_report = false;
                    }
                    s.report_window = window;
                })
                .await?;
        }
        SettingsCommands::TopN { n } => {
            if n == 0 {
                bail!("top-n must be at least 1");
            }
            service.update_settings(|s| s.top_n = n).await?;
        }
        SettingsCommands::AlertThreshold { pct } => {
            if !pct.is_finite() || pct < 0.0 {
                bail!("alert threshold must be a non-negative number");
            }
            service.update_settings(|s| s.alert_change_pct = pct).await?;
        }
    }

    render::print_settings(&service.settings().await, service.last_report_date().await);
    Ok(())
}

fn execute_config(action: &ConfigCommands, cli: &Cli, config: &Config) -> Result<()> {
    let path = cli.config.clone().unwrap_or_else(config::config_path);
    match action {
        ConfigCommands::Path => println!("{}", path.display()),
        ConfigCommands::Show => println!("{}", serde_json::to_string_pretty(config)?),
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default().save_to(&path)?;
            println!("{} 已寫入 {}", style("✓").green(), path.display());
        }
    }
    Ok(())
}
