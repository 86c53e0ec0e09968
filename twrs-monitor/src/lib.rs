//! TWSE relative-strength monitor.
//!
//! Pulls the exchange's end-of-day file, scores every listed security
//! against the rest of the (filtered) market, and pushes leaderboards,
//! watch-list alerts, and a daily summary to a chat bot.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         MonitorService                          │
//! ├────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐  │
//! │  │ MarketFeed   │→ │ Projector    │→ │ Ranking / View       │  │
//! │  │ (TWSE, demo) │  │ (history)    │  │ (filtered RS score)  │  │
//! │  └──────────────┘  └──────────────┘  └──────────────────────┘  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐  │
//! │  │ AppState     │  │ Notification │  │ Scheduler            │  │
//! │  │ (Store port) │  │ (bot API)    │  │ (refresh, daily)     │  │
//! │  └──────────────┘  └──────────────┘  └──────────────────────┘  │
//! └────────────────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod data;
pub mod notification;
pub mod ranking;
pub mod scheduler;
pub mod state;
pub mod view;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};
use twrs_common::{Config, Error, NotificationConfig, Result};

use crate::data::{MarketFeed, MarketSnapshot, Period, ReturnProjector, Security};
use crate::notification::{
    format_daily_summary, format_top_n, format_watch_alert, watch_statuses, DailySummary,
    NotificationClient, SUMMARY_MOVERS,
};
use crate::ranking::RankedSecurity;
use crate::scheduler::{daily_report_due, DailyReportTask, RefreshTask, TaskHandle};
use crate::state::{AppState, Settings, Store, WatchEntry};
use crate::view::{build_view, industries, top_movers, ViewFilter};

/// Mutable service state.
pub struct MonitorState {
    /// Settings, watch list, report marker
    pub app: AppState,
    /// Latest universe, replaced wholesale on every successful fetch
    pub snapshot: Option<MarketSnapshot>,
    /// Message of the last failed refresh, cleared on success
    pub last_error: Option<String>,
}

/// Monitor service: feed, store, notifier, and the state they share.
pub struct MonitorService {
    feed: Arc<dyn MarketFeed>,
    notifier: NotificationClient,
    projector: ReturnProjector,
    offset: FixedOffset,
    seed: NotificationConfig,
    state: RwLock<MonitorState>,
}

impl MonitorService {
    /// Create the service and load persisted state.
    pub async fn new(config: &Config, feed: Arc<dyn MarketFeed>, store: Arc<dyn Store>) -> Result<Self> {
        let app = AppState::load(store, &config.notification).await?;

        info!(feed = feed.name(), "Monitor service initialized");

        Ok(Self {
            feed,
            notifier: NotificationClient::from_config(config),
            projector: ReturnProjector::new(config.projection.clone()),
            offset: config.schedule.exchange_offset(),
            seed: config.notification.clone(),
            state: RwLock::new(MonitorState {
                app,
                snapshot: None,
                last_error: None,
            }),
        })
    }

    // ========================================================================
    // Clock
    // ========================================================================

    /// Current time at the exchange.
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    /// Current trading-calendar date at the exchange.
    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    // ========================================================================
    // Market data
    // ========================================================================

    /// Fetch a day (today by default), project returns, record closes, and
    /// replace the universe. Returns the number of securities.
    pub async fn refresh(&self, date: Option<NaiveDate>) -> Result<usize> {
        let date = date.unwrap_or_else(|| self.today());

        let mut snapshot = match self.feed.fetch_day(date).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                if e.is_feed_unavailable() {
                    info!(date = %date, reason = %e, "No data for this day yet");
                } else {
                    warn!(date = %date, error = %e, "Refresh failed");
                }
                self.state.write().await.last_error = Some(e.user_message());
                return Err(e);
            }
        };

        let store = self.state.read().await.app.store();
        let historical = self
            .projector
            .project(date, &mut snapshot.securities, store.as_ref())
            .await;

        if let Err(e) = store.record_closes(date, &snapshot.securities).await {
            warn!(date = %date, error = %e, "Failed to record closes");
        }

        let count = snapshot.len();
        info!(date = %date, securities = count, historical, source = %snapshot.source, "Universe refreshed");

        let mut state = self.state.write().await;
        state.snapshot = Some(snapshot);
        state.last_error = None;
        Ok(count)
    }

    /// Refresh unless the current universe is already for `date`.
    pub async fn ensure_snapshot(&self, date: Option<NaiveDate>) -> Result<()> {
        let date = date.unwrap_or_else(|| self.today());
        let current = self.state.read().await.snapshot.as_ref().map(|s| s.date);
        if current == Some(date) {
            return Ok(());
        }
        self.refresh(Some(date)).await.map(|_| ())
    }

    /// Copy of the current universe.
    pub async fn snapshot(&self) -> Option<MarketSnapshot> {
        self.state.read().await.snapshot.clone()
    }

    /// Message of the last failed refresh, if nothing has succeeded since.
    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error.clone()
    }

    async fn with_snapshot<T>(&self, f: impl FnOnce(&MarketSnapshot, &AppState) -> T) -> Result<T> {
        let state = self.state.read().await;
        let snapshot = state
            .snapshot
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("尚未取得行情資料，請先更新".into()))?;
        Ok(f(snapshot, &state.app))
    }

    /// Filtered, scored, sorted view of the current universe.
    pub async fn view(&self, filter: &ViewFilter) -> Result<Vec<RankedSecurity>> {
        self.with_snapshot(|snapshot, _| build_view(&snapshot.securities, filter))
            .await
    }

    /// Industry labels present in the current universe, with counts.
    pub async fn industries(&self) -> Result<Vec<(String, usize)>> {
        self.with_snapshot(|snapshot, _| industries(&snapshot.securities))
            .await
    }

    // ========================================================================
    // Settings and watch list
    // ========================================================================

    pub async fn settings(&self) -> Settings {
        self.state.read().await.app.settings().clone()
    }

    pub async fn last_report_date(&self) -> Option<NaiveDate> {
        self.state.read().await.app.last_report_date()
    }

    pub async fn update_settings<F>(&self, change: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut state = self.state.write().await;
        state.app.update_settings(change).await.cloned()
    }

    /// Re-read settings and markers from the store (another process may have
    /// changed them).
    pub async fn reload_state(&self) -> Result<()> {
        let store = self.state.read().await.app.store();
        let app = AppState::load(store, &self.seed).await?;
        self.state.write().await.app = app;
        Ok(())
    }

    pub async fn watchlist(&self) -> Vec<WatchEntry> {
        self.state.read().await.app.watchlist().to_vec()
    }

    /// Watch a code from the current universe. Returns `false` if already
    /// watched.
    pub async fn add_watch(&self, code: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let security: Security = state
            .snapshot
            .as_ref()
            .and_then(|s| s.find(code))
            .cloned()
            .ok_or_else(|| Error::InvalidInput(format!("今日行情中找不到代號 {}", code)))?;
        state.app.add_watch(&security).await
    }

    pub async fn remove_watch(&self, code: &str) -> Result<bool> {
        self.state.write().await.app.remove_watch(code).await
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// Top-N leaderboard over the whole market.
    pub async fn send_top(&self, period: Period) -> Result<()> {
        let (settings, text) = self
            .with_snapshot(|snapshot, app| {
                let settings = app.settings().clone();
                let ranked = build_view(&snapshot.securities, &ViewFilter::all(period));
                let text = format_top_n(snapshot.date, period, &ranked, settings.top_n);
                (settings, text)
            })
            .await?;
        self.notifier.send(&settings, &text).await
    }

    /// Watch-list status with threshold flags.
    pub async fn send_watch(&self, period: Period) -> Result<()> {
        let (settings, text) = self
            .with_snapshot(|snapshot, app| {
                let settings = app.settings().clone();
                let ranked = build_view(&snapshot.securities, &ViewFilter::all(period));
                let statuses = watch_statuses(app.watchlist(), &ranked);
                let text = format_watch_alert(snapshot.date, &statuses, settings.alert_change_pct);
                (settings, text)
            })
            .await?;
        self.notifier.send(&settings, &text).await
    }

    /// End-of-day summary.
    pub async fn send_summary(&self, period: Period) -> Result<()> {
        let (settings, text) = self
            .with_snapshot(|snapshot, app| {
                let settings = app.settings().clone();
                let ranked = build_view(&snapshot.securities, &ViewFilter::all(period));
                let gainers = top_movers(&snapshot.securities, SUMMARY_MOVERS, true);
                let losers = top_movers(&snapshot.securities, SUMMARY_MOVERS, false);
                let watch = watch_statuses(app.watchlist(), &ranked);
                let text = format_daily_summary(&DailySummary {
                    date: snapshot.date,
                    period,
                    ranked: &ranked,
                    top_n: settings.top_n,
                    gainers: &gainers,
                    losers: &losers,
                    watch: &watch,
                    alert_change_pct: settings.alert_change_pct,
                });
                (settings, text)
            })
            .await?;
        self.notifier.send(&settings, &text).await
    }

    /// Send the daily summary if it is due at `now`. Returns whether it was
    /// sent. The report marker is written only after a successful send.
    pub async fn check_daily_report(&self, now: DateTime<FixedOffset>) -> Result<bool> {
        let due = {
            let state = self.state.read().await;
            daily_report_due(now, state.app.settings(), state.app.last_report_date())
        };
        if !due {
            return Ok(false);
        }

        let today = now.date_naive();
        self.ensure_snapshot(Some(today)).await?;
        self.send_summary(Period::default()).await?;

        self.state.write().await.app.mark_reported(today).await?;
        info!(date = %today, "Daily summary sent");
        Ok(true)
    }

    // ========================================================================
    // Background
    // ========================================================================

    /// Refresh tick: failures are logged, never raised.
    pub async fn background_refresh(&self) {
        if let Err(e) = self.refresh(None).await {
            warn!(error = %e, "Background refresh failed");
            return;
        }

        if self.settings().await.push_top_on_refresh {
            if let Err(e) = self.send_top(Period::default()).await {
                warn!(error = %e, "Background top-N notification failed");
            }
        }
    }

    /// Daily-report tick: failures are logged, never raised.
    pub async fn background_daily_check(&self) {
        if let Err(e) = self.check_daily_report(self.now()).await {
            warn!(error = %e, "Daily summary check failed");
        }
    }

    /// Long-running mode. Starts both tasks, follows settings changes made
    /// from other processes, and stops on Ctrl-C.
    pub async fn run(self: Arc<Self>, check_every: Duration) -> Result<()> {
        if let Err(e) = self.refresh(None).await {
            warn!(error = %e, "Initial refresh failed, will retry on schedule");
        }

        let mut refresh = self.refresh_task_for(&self.settings().await);
        let _daily = DailyReportTask::start(Arc::clone(&self), check_every);

        let mut settings_check = tokio::time::interval(check_every);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        info!("Monitor running, press Ctrl-C to stop");
        loop {
            tokio::select! {
                result = &mut ctrl_c => {
                    if let Err(e) = result {
                        warn!(error = %e, "Failed to listen for Ctrl-C");
                    }
                    break;
                }
                _ = settings_check.tick() => {
                    if let Err(e) = self.reload_state().await {
                        warn!(error = %e, "Failed to reload settings");
                        continue;
                    }
                    let settings = self.settings().await;
                    let wanted = settings
                        .auto_refresh
                        .then(|| Duration::from_secs(settings.refresh_interval_secs));
                    let current = refresh.as_ref().map(TaskHandle::period);
                    if wanted != current {
                        info!(?wanted, ?current, "Refresh settings changed, restarting task");
                        if let Some(mut task) = refresh.take() {
                            task.stop();
                        }
                        refresh = self.refresh_task_for(&settings);
                    }
                }
            }
        }

        info!("Monitor stopped");
        Ok(())
    }

    fn refresh_task_for(self: &Arc<Self>, settings: &Settings) -> Option<TaskHandle> {
        settings.auto_refresh.then(|| {
            RefreshTask::start(
                Arc::clone(self),
                Duration::from_secs(settings.refresh_interval_secs),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DemoFeed;
    use crate::state::MemoryStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn demo_service() -> MonitorService {
        MonitorService::new(
            &Config::default(),
            Arc::new(DemoFeed::new()),
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap()
    }

    struct ClosedFeed;

    #[async_trait::async_trait]
    impl MarketFeed for ClosedFeed {
        fn name(&self) -> &str {
            "closed"
        }

        async fn fetch_day(&self, date: NaiveDate) -> Result<MarketSnapshot> {
            Err(Error::FeedUnavailable(format!("{} 休市", date)))
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_is_remembered_until_success() {
        let service = MonitorService::new(
            &Config::default(),
            Arc::new(ClosedFeed),
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 10, 16).unwrap();

        let err = service.refresh(Some(day)).await.unwrap_err();
        assert!(err.is_feed_unavailable());
        assert!(service.last_error().await.unwrap().contains("休市"));
        assert!(service.snapshot().await.is_none());

        let service = demo_service().await;
        service.state.write().await.last_error = Some("stale".into());
        service.refresh(Some(day)).await.unwrap();
        assert_eq!(service.last_error().await, None);
    }

    #[tokio::test]
    async fn test_view_requires_snapshot() {
        let service = demo_service().await;
        assert!(service.view(&ViewFilter::default()).await.is_err());

        service.refresh(None).await.unwrap();
        let view = service.view(&ViewFilter::all(Period::OneWeek)).await.unwrap();
        assert_eq!(view.len(), service.snapshot().await.unwrap().len());
    }

    #[tokio::test]
    async fn test_watch_requires_listed_code() {
        let service = demo_service().await;
        service.refresh(None).await.unwrap();
        let code = service.snapshot().await.unwrap().securities[0].code.clone();

        assert!(service.add_watch(&code).await.unwrap());
        assert!(!service.add_watch(&code).await.unwrap());
        assert!(matches!(service.add_watch("0000").await, Err(Error::InvalidInput(_))));
        assert_eq!(service.watchlist().await.len(), 1);
    }

    #[tokio::test]
    async fn test_send_without_credentials_fails() {
        let service = demo_service().await;
        service.refresh(None).await.unwrap();
        let err = service.send_top(Period::default()).await.unwrap_err();
        assert!(matches!(err, Error::Notification(ref m) if m.contains("credentials")));
    }

    async fn reporting_service(api_base: String) -> MonitorService {
        let mut config = Config::default();
        config.notification.api_base = api_base;
        let service = MonitorService::new(
            &config,
            Arc::new(DemoFeed::new()),
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();
        service
            .update_settings(|s| {
                s.bot_token = Some("42:abc".into());
                s.chat_id = Some("-100".into());
                s.daily_report = true;
            })
            .await
            .unwrap();
        service
    }

    fn taipei(h: u32, m: u32) -> DateTime<FixedOffset> {
        use chrono::TimeZone;
        // Wednesday
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 10, 16, h, m, 0)
            .unwrap()
    }

    async fn mount_bot(server: &MockServer, status: u16) {
        Mock::given(method("POST"))
            .and(path("/bot42:abc/sendMessage"))
            .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({"ok": status == 200})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_daily_report_sent_once_across_window() {
        let server = MockServer::start().await;
        mount_bot(&server, 200).await;
        let service = reporting_service(server.uri()).await;

        let mut sent = 0;
        for minute in 0..60 {
            let now = taipei(14, 30) + chrono::Duration::minutes(minute);
            if service.check_daily_report(now).await.unwrap() {
                sent += 1;
            }
        }

        assert_eq!(sent, 1);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert_eq!(service.last_report_date().await, NaiveDate::from_ymd_opt(2024, 10, 16));
    }

    #[tokio::test]
    async fn test_failed_daily_report_retries_next_minute() {
        let server = MockServer::start().await;
        mount_bot(&server, 500).await;
        let service = reporting_service(server.uri()).await;

        let err = service.check_daily_report(taipei(14, 30)).await.unwrap_err();
        assert!(matches!(err, Error::Notification(_)));
        assert_eq!(service.last_report_date().await, None);

        server.reset().await;
        mount_bot(&server, 200).await;

        assert!(service.check_daily_report(taipei(14, 31)).await.unwrap());
        assert_eq!(service.last_report_date().await, NaiveDate::from_ymd_opt(2024, 10, 16));
        assert!(!service.check_daily_report(taipei(14, 32)).await.unwrap());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_daily_report_not_due_when_disabled() {
        let service = demo_service().await;
        assert!(!service.check_daily_report(service.now()).await.unwrap());
        assert_eq!(service.last_report_date().await, None);
    }
}
