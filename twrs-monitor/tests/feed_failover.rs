//! Integration tests for end-of-day feed failover.
//!
//! Each test stands up a mock exchange and checks which endpoint wins and
//! how failures are reported when none does.

use std::time::Duration;

use chrono::NaiveDate;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use twrs_common::Error;
use twrs_monitor::data::{FeedEndpoint, MarketFeed, RowLayout, TwseFeed};

// ============================================================================
// Fixtures
// ============================================================================

/// A Monday well in the past, so publish-time rules never apply.
fn trading_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 10, 14).unwrap()
}

fn day_all_body() -> serde_json::Value {
    json!({
        "stat": "OK",
        "date": "20241014",
        "fields": ["證券代號", "證券名稱", "成交股數", "成交金額", "開盤價", "最高價", "最低價", "收盤價", "漲跌價差", "成交筆數"],
        "data": [
            ["2330", "台積電", "30,123,456", "31,000,000,000", "1,020.00", "1,035.00", "1,015.00", "1,030.00", "+15.00", "40,000"],
            ["2317", "鴻海", "50,000,000", "10,000,000,000", "200.00", "205.00", "199.50", "204.50", "-1.50", "30,000"],
            ["2881", "富邦金", "12,000,000", "1,000,000,000", "85.00", "86.00", "84.70", "85.80", "0.00", "9,000"]
        ]
    })
}

fn mi_index_body() -> serde_json::Value {
    json!({
        "stat": "OK",
        "date": "20241014",
        "tables": [
            {"title": "大盤統計資訊", "fields": ["指數", "收盤指數"], "data": [["發行量加權股價指數", "22,000.00"]]},
            {
                "title": "每日收盤行情",
                "fields": ["證券代號", "證券名稱", "成交股數", "成交筆數", "成交金額", "開盤價", "最高價", "最低價", "收盤價", "漲跌(+/-)", "漲跌價差"],
                "data": [
                    ["2330", "台積電", "1", "1", "1", "1,020.00", "1,035.00", "1,015.00", "1,030.00", "<p style= color:red>+</p>", "15.00"],
                    ["2603", "長榮", "1", "1", "1", "190.00", "192.00", "185.00", "186.00", "<p style= color:green>-</p>", "4.00"]
                ]
            }
        ]
    })
}

fn feed_for(server: &MockServer, endpoints: &[(&str, RowLayout)]) -> TwseFeed {
    let endpoints = endpoints
        .iter()
        .map(|(route, layout)| FeedEndpoint::new(format!("{}{}", server.uri(), route), *layout))
        .collect();
    TwseFeed::new(endpoints, Duration::from_secs(5), "twrs-test")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_primary_endpoint_wins() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/day_all"))
        .and(query_param("date", "20241014"))
        .respond_with(ResponseTemplate::new(200).set_body_json(day_all_body()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mi_index"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mi_index_body()))
        .expect(0)
        .mount(&server)
        .await;

    let feed = feed_for(
        &server,
        &[
            ("/day_all?date={date}", RowLayout::DayAll),
            ("/mi_index?date={date}", RowLayout::MiIndex),
        ],
    );
    let snapshot = feed.fetch_day(trading_day()).await.unwrap();

    assert_eq!(snapshot.date, trading_day());
    assert_eq!(snapshot.len(), 3);
    let tsmc = snapshot.find("2330").unwrap();
    assert!((tsmc.price - 1030.0).abs() < 1e-9);
    assert!((tsmc.change - 15.0).abs() < 1e-9);
    assert_eq!(tsmc.industry, "半導體業");
}

#[tokio::test]
async fn test_fails_over_after_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/day_all"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mi_index"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mi_index_body()))
        .mount(&server)
        .await;

    let feed = feed_for(
        &server,
        &[
            ("/day_all?date={date}", RowLayout::DayAll),
            ("/mi_index?date={date}", RowLayout::MiIndex),
        ],
    );
    let snapshot = feed.fetch_day(trading_day()).await.unwrap();

    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.source.contains("/mi_index"));
    let evergreen = snapshot.find("2603").unwrap();
    assert!((evergreen.change + 4.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_fails_over_after_no_data_stat() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/day_all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"stat": "很抱歉，沒有符合條件的資料!"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mi_index"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mi_index_body()))
        .mount(&server)
        .await;

    let feed = feed_for(
        &server,
        &[
            ("/day_all?date={date}", RowLayout::DayAll),
            ("/mi_index?date={date}", RowLayout::MiIndex),
        ],
    );
    assert_eq!(feed.fetch_day(trading_day()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_stale_publication_is_skipped() {
    let server = MockServer::start().await;
    let mut stale = day_all_body();
    stale["date"] = json!("20241011");
    Mock::given(method("GET"))
        .and(path("/day_all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stale))
        .mount(&server)
        .await;

    let feed = feed_for(&server, &[("/day_all", RowLayout::DayAll)]);
    let err = feed.fetch_day(trading_day()).await.unwrap_err();
    assert!(err.is_feed_unavailable(), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_all_server_errors_is_network_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let feed = feed_for(
        &server,
        &[("/a", RowLayout::DayAll), ("/b", RowLayout::MiIndex)],
    );
    let err = feed.fetch_day(trading_day()).await.unwrap_err();
    assert!(matches!(err, Error::Network(_)), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_unparseable_rows_is_parse_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stat": "OK",
            "data": [["abc", "??", "--"], ["def", "??", "--"]]
        })))
        .mount(&server)
        .await;

    let feed = feed_for(&server, &[("/day_all", RowLayout::DayAll)]);
    let err = feed.fetch_day(trading_day()).await.unwrap_err();
    assert!(matches!(err, Error::Parse(_)), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_weekend_is_reported_as_closed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"stat": "很抱歉，沒有符合條件的資料!"})))
        .mount(&server)
        .await;

    let feed = feed_for(&server, &[("/day_all", RowLayout::DayAll)]);
    let saturday = NaiveDate::from_ymd_opt(2024, 10, 12).unwrap();
    let err = feed.fetch_day(saturday).await.unwrap_err();
    assert!(err.is_feed_unavailable());
    assert!(err.user_message().contains("非交易日"));
}

#[tokio::test]
async fn test_html_error_page_is_parse_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>Service busy</body></html>"))
        .mount(&server)
        .await;

    let feed = feed_for(&server, &[("/day_all", RowLayout::DayAll)]);
    let err = feed.fetch_day(trading_day()).await.unwrap_err();
    assert!(matches!(err, Error::Parse(_)), "unexpected error: {}", err);
}
