//! Background scheduling for the `run` command.
//!
//! Two independent tasks:
//!
//! - **Refresh**: every `refresh_interval_secs`, refetch the universe and
//!   optionally push the top-N leaderboard.
//! - **Daily report**: every minute, check whether the end-of-day summary is
//!   due and send it at most once per calendar day.
//!
//! Each task is owned by a [`TaskHandle`]. Stopping or dropping the handle
//! aborts the task, so a task never outlives the setting that started it.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::state::Settings;
use crate::MonitorService;

/// Scheduled task type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduledTask {
    /// Periodic universe refresh
    Refresh,
    /// Once-a-day summary check
    DailyReport,
}

impl ScheduledTask {
    /// Get task name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Refresh => "refresh",
            Self::DailyReport => "daily_report",
        }
    }
}

/// Whether the daily summary should go out now.
///
/// True only on a weekday, inside the report window, with daily reports
/// enabled, and when the last successful report was not today.
pub fn daily_report_due(
    now: DateTime<FixedOffset>,
    settings: &Settings,
    last_report: Option<NaiveDate>,
) -> bool {
    if !settings.daily_report {
        return false;
    }
    if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    if !settings.report_window.contains(now.time()) {
        return false;
    }
    last_report != Some(now.date_naive())
}

// ============================================================================
// Task handles
// ============================================================================

/// Owner of a running background task.
pub struct TaskHandle {
    task: ScheduledTask,
    period: Duration,
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn task(&self) -> ScheduledTask {
        self.task
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Abort the task. Idempotent.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!(task = self.task.name(), "Stopped scheduled task");
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn `tick` every `period`. With `immediate`, the first tick fires right
/// away; otherwise after one period.
pub fn spawn_interval<F, Fut>(
    task: ScheduledTask,
    period: Duration,
    immediate: bool,
    mut tick: F,
) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let start = if immediate {
        Instant::now()
    } else {
        Instant::now() + period
    };

    let handle = tokio::spawn(async move {
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            debug!(task = task.name(), "Scheduled task tick");
            tick().await;
        }
    });

    info!(task = task.name(), period_secs = period.as_secs(), "Started scheduled task");
    TaskHandle {
        task,
        period,
        handle: Some(handle),
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// Interval refresh of the universe.
pub struct RefreshTask;

impl RefreshTask {
    pub fn start(service: Arc<MonitorService>, every: Duration) -> TaskHandle {
        spawn_interval(ScheduledTask::Refresh, every, false, move || {
            let service = Arc::clone(&service);
            async move { service.background_refresh().await }
        })
    }
}

/// Minute check for the end-of-day summary.
pub struct DailyReportTask;

impl DailyReportTask {
    pub fn start(service: Arc<MonitorService>, check_every: Duration) -> TaskHandle {
        spawn_interval(ScheduledTask::DailyReport, check_every, true, move || {
            let service = Arc::clone(&service);
            async move { service.background_daily_check().await }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn taipei(d: u32, h: u32, m: u32) -> DateTime<FixedOffset> {
        // October 2024: the 14th is a Monday
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 10, d, h, m, 0)
            .unwrap()
    }

    fn enabled() -> Settings {
        Settings {
            daily_report: true,
            ..Settings::default()
        }
    }

    #[test]
    fn test_due_only_inside_window_on_weekdays() {
        let s = enabled();
        assert!(daily_report_due(taipei(16, 14, 30), &s, None));
        assert!(daily_report_due(taipei(16, 15, 59), &s, None));
        assert!(!daily_report_due(taipei(16, 14, 29), &s, None));
        assert!(!daily_report_due(taipei(16, 16, 0), &s, None));
        // Saturday
        assert!(!daily_report_due(taipei(19, 15, 0), &s, None));
        assert!(!daily_report_due(taipei(16, 15, 0), &Settings::default(), None));
    }

    #[test]
    fn test_at_most_once_per_day() {
        let s = enabled();
        let mut last: Option<NaiveDate> = None;
        let mut sent = 0;

        // Minute checks across the whole window
        for minute in 0..90 {
            let now = taipei(16, 14, 30) + chrono::Duration::minutes(minute);
            if daily_report_due(now, &s, last) {
                sent += 1;
                last = Some(now.date_naive());
            }
        }
        assert_eq!(sent, 1);

        // Next day fires again
        assert!(daily_report_due(taipei(17, 15, 0), &s, last));
    }

    #[test]
    fn test_custom_window() {
        let mut s = enabled();
        s.report_window.start = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
        s.report_window.end = NaiveTime::from_hms_opt(18, 0, 0).unwrap();
        assert!(!daily_report_due(taipei(16, 15, 0), &s, None));
        assert!(daily_report_due(taipei(16, 17, 30), &s, None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_ticks_and_stop() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let mut handle = spawn_interval(ScheduledTask::Refresh, Duration::from_secs(30), false, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        handle.stop();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_task() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        {
            let _handle = spawn_interval(ScheduledTask::DailyReport, Duration::from_secs(60), true, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        let after_drop = count.load(Ordering::SeqCst);
        assert_eq!(after_drop, 1);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_drop);
    }
}
