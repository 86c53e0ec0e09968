//! Persistence tests: settings, watch list, report marker, and close
//! history survive a store reopen.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tempfile::TempDir;

use twrs_common::NotificationConfig;
use twrs_monitor::data::{Period, ReturnBasis, ReturnProjector, Security};
use twrs_monitor::state::{AppState, CloseHistory, ReportWindow, SqliteStore, Store};

fn open(dir: &TempDir) -> Arc<dyn Store> {
    Arc::new(SqliteStore::open(&dir.path().join("state").join("twrs.db")).unwrap())
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn test_settings_and_watchlist_survive_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let mut app = AppState::load(open(&dir), &NotificationConfig::default())
            .await
            .unwrap();
        app.update_settings(|s| {
            s.bot_token = Some("42:abc".into());
            s.chat_id = Some("-100".into());
            s.auto_refresh = true;
            s.refresh_interval_secs = 600;
            s.report_window = ReportWindow::new(
                NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            )
            .unwrap();
            s.top_n = 20;
        })
        .await
        .unwrap();

        assert!(app.add_watch(&Security::from_quote("2330", "台積電", 1030.0, 15.0)).await.unwrap());
        assert!(app.add_watch(&Security::from_quote("2603", "長榮", 186.0, -4.0)).await.unwrap());
        assert!(app.remove_watch("2603").await.unwrap());
        app.mark_reported(day(2024, 10, 14)).await.unwrap();
    }

    let app = AppState::load(open(&dir), &NotificationConfig::default())
        .await
        .unwrap();
    let settings = app.settings();
    assert_eq!(settings.credentials(), Some(("42:abc", "-100")));
    assert!(settings.auto_refresh);
    assert_eq!(settings.refresh_interval_secs, 600);
    assert_eq!(settings.top_n, 20);
    assert_eq!(settings.report_window.start, NaiveTime::from_hms_opt(15, 0, 0).unwrap());

    let watch = app.watchlist();
    assert_eq!(watch.len(), 1);
    assert_eq!(watch[0].security.code, "2330");
    assert!((watch[0].security.price - 1030.0).abs() < 1e-9);
    assert_eq!(app.last_report_date(), Some(day(2024, 10, 14)));
}

#[tokio::test]
async fn test_stored_credentials_beat_seed() {
    let dir = TempDir::new().unwrap();
    {
        let mut app = AppState::load(open(&dir), &NotificationConfig::default())
            .await
            .unwrap();
        app.update_settings(|s| s.chat_id = Some("stored".into()))
            .await
            .unwrap();
    }

    let seed = NotificationConfig {
        bot_token: Some("seed-token".into()),
        chat_id: Some("seed-chat".into()),
        ..NotificationConfig::default()
    };
    let app = AppState::load(open(&dir), &seed).await.unwrap();
    assert_eq!(app.settings().credentials(), Some(("seed-token", "stored")));
}

#[tokio::test]
async fn test_recorded_closes_drive_historical_returns() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(&dir);
        store
            .record_closes(day(2024, 9, 13), &[Security::from_quote("2330", "台積電", 900.0, 0.0)])
            .await
            .unwrap();
    }

    let store = open(&dir);
    let mut today = vec![Security::from_quote("2330", "台積電", 990.0, 10.0)];
    let historical = ReturnProjector::default()
        .project(day(2024, 10, 14), &mut today, store.as_ref())
        .await;

    assert_eq!(historical, 1);
    assert_eq!(today[0].return_basis(Period::OneMonth), Some(ReturnBasis::Historical));
    assert!((today[0].period_return(Period::OneMonth).unwrap() - 10.0).abs() < 1e-9);
    assert_eq!(today[0].return_basis(Period::ThreeMonths), Some(ReturnBasis::Estimated));
}
