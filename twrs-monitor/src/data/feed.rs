//! End-of-day feed client with ordered endpoint failover.
//!
//! Each endpoint is tried once, in configuration order. The first response
//! that passes the status check and yields valid rows wins. When every
//! endpoint fails, the failures are folded into a single error whose message
//! tells the user what most likely happened.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Offset, Utc, Weekday};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use twrs_common::util::sanitize_for_log;
use twrs_common::{Config, Error, FeedEndpointConfig, Result};

use super::parser::{parse_payload, payload_date, ParseError, RowLayout};
use super::MarketSnapshot;

// ============================================================================
// Feed Trait
// ============================================================================

/// A source of full-market end-of-day snapshots.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Feed name for logs.
    fn name(&self) -> &str;

    /// Fetch the whole universe for one trading day.
    async fn fetch_day(&self, date: NaiveDate) -> Result<MarketSnapshot>;
}

// ============================================================================
// Endpoints
// ============================================================================

/// One candidate URL plus the layout its rows are expected in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEndpoint {
    /// URL with an optional `{date}` placeholder
    pub url_template: String,
    /// Declared row layout, tried first
    pub layout: RowLayout,
}

impl FeedEndpoint {
    pub fn new(url_template: impl Into<String>, layout: RowLayout) -> Self {
        Self {
            url_template: url_template.into(),
            layout,
        }
    }

    /// Build from a config entry, rejecting unknown layout tags.
    pub fn from_config(entry: &FeedEndpointConfig) -> Result<Self> {
        let layout = entry
            .layout
            .parse::<RowLayout>()
            .map_err(Error::Config)?;
        Ok(Self::new(entry.url.clone(), layout))
    }

    /// Concrete URL for a trading day.
    pub fn url_for(&self, date: NaiveDate) -> String {
        self.url_template
            .replace("{date}", &date.format("%Y%m%d").to_string())
    }
}

/// Why one endpoint did not produce a snapshot.
#[derive(Debug, Clone, PartialEq)]
enum EndpointFailure {
    /// Answered, but had nothing for the day
    Unavailable(String),
    /// Answered with rows, none usable
    Parse(String),
    /// Request failed or non-2xx
    Network(String),
}

impl From<ParseError> for EndpointFailure {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Unavailable(msg) => Self::Unavailable(msg),
            ParseError::NoRows(msg) => Self::Parse(msg),
        }
    }
}

// ============================================================================
// TWSE Feed
// ============================================================================

/// HTTP feed over the exchange's public end-of-day endpoints.
pub struct TwseFeed {
    client: reqwest::Client,
    endpoints: Vec<FeedEndpoint>,
    publish_time: NaiveTime,
    offset: FixedOffset,
}

impl TwseFeed {
    /// Create a feed over explicit endpoints.
    pub fn new(endpoints: Vec<FeedEndpoint>, timeout: Duration, user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoints,
            publish_time: default_publish_time(),
            offset: FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix()),
        }
    }

    /// Create from config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let endpoints = config
            .feed
            .endpoints
            .iter()
            .map(FeedEndpoint::from_config)
            .collect::<Result<Vec<_>>>()?;

        if endpoints.is_empty() {
            return Err(Error::Config("feed.endpoints is empty".into()));
        }

        let publish_time = NaiveTime::parse_from_str(config.feed.publish_time.trim(), "%H:%M")
            .map_err(|e| {
                Error::Config(format!(
                    "feed.publish_time '{}' is not HH:MM: {}",
                    config.feed.publish_time, e
                ))
            })?;

        let mut feed = Self::new(
            endpoints,
            Duration::from_secs(config.feed.timeout_secs.max(1)),
            &config.feed.user_agent,
        );
        feed.publish_time = publish_time;
        feed.offset = config.schedule.exchange_offset();
        Ok(feed)
    }

    pub fn endpoints(&self) -> &[FeedEndpoint] {
        &self.endpoints
    }

    async fn fetch_endpoint(
        &self,
        endpoint: &FeedEndpoint,
        date: NaiveDate,
    ) -> std::result::Result<MarketSnapshot, EndpointFailure> {
        let url = endpoint.url_for(date);
        debug!(url = %sanitize_for_log(&url), layout = %endpoint.layout, "Requesting end-of-day data");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| EndpointFailure::Network(sanitize_for_log(&e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EndpointFailure::Network(format!("HTTP {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| EndpointFailure::Network(sanitize_for_log(&e.to_string())))?;

        // The exchange answers some invalid requests with an HTML page
        let payload: Value = serde_json::from_str(body.trim_start_matches('\u{feff}'))
            .map_err(|e| EndpointFailure::Parse(format!("response is not JSON: {}", e)))?;

        let securities = parse_payload(endpoint.layout, &payload)?;

        if let Some(published) = payload_date(&payload) {
            if published != date {
                return Err(EndpointFailure::Unavailable(format!(
                    "latest published day is {}",
                    published
                )));
            }
        }

        Ok(MarketSnapshot {
            date,
            source: url,
            securities,
        })
    }
}

#[async_trait]
impl MarketFeed for TwseFeed {
    fn name(&self) -> &str {
        "twse"
    }

    async fn fetch_day(&self, date: NaiveDate) -> Result<MarketSnapshot> {
        let mut failures = Vec::with_capacity(self.endpoints.len());

        for endpoint in &self.endpoints {
            match self.fetch_endpoint(endpoint, date).await {
                Ok(snapshot) => {
                    info!(
                        date = %date,
                        layout = %endpoint.layout,
                        securities = snapshot.len(),
                        "Fetched end-of-day snapshot"
                    );
                    return Ok(snapshot);
                }
                Err(failure) => {
                    warn!(
                        url = %sanitize_for_log(&endpoint.url_for(date)),
                        failure = ?failure,
                        "Endpoint failed, trying next"
                    );
                    failures.push(failure);
                }
            }
        }

        let now = Utc::now().with_timezone(&self.offset);
        Err(classify_failures(date, now, self.publish_time, &failures))
    }
}

fn default_publish_time() -> NaiveTime {
    NaiveTime::from_hms_opt(14, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Fold per-endpoint failures into one user-facing error.
///
/// Order: weekend date, all-network, requested today before publish time,
/// any parse failure, plain unavailability.
fn classify_failures(
    date: NaiveDate,
    now: DateTime<FixedOffset>,
    publish_time: NaiveTime,
    failures: &[EndpointFailure],
) -> Error {
    if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        return Error::FeedUnavailable(format!("{} 為非交易日（週末休市）", date));
    }

    let last_network = failures.iter().rev().find_map(|f| match f {
        EndpointFailure::Network(msg) => Some(msg.clone()),
        _ => None,
    });
    let all_network = !failures.is_empty()
        && failures
            .iter()
            .all(|f| matches!(f, EndpointFailure::Network(_)));
    if all_network {
        return Error::Network(format!(
            "網路連線失敗: {}",
            last_network.unwrap_or_default()
        ));
    }

    if date == now.date_naive() && now.time() < publish_time {
        return Error::FeedUnavailable(format!(
            "{} 資料尚未更新，收盤資料約於 {} 後公布",
            date,
            publish_time.format("%H:%M")
        ));
    }

    if let Some(EndpointFailure::Parse(msg)) = failures
        .iter()
        .find(|f| matches!(f, EndpointFailure::Parse(_)))
    {
        return Error::Parse(format!("無法解析 {} 的收盤資料: {}", date, msg));
    }

    let reason = failures
        .iter()
        .find_map(|f| match f {
            EndpointFailure::Unavailable(msg) => Some(msg.as_str()),
            _ => None,
        })
        .unwrap_or("no endpoint configured");
    Error::FeedUnavailable(format!("查無 {} 的收盤資料（{}）", date, reason))
}
