//! Offline demo feed.
//!
//! Generates a synthetic universe spread over the known industry prefixes.
//! The generator is seeded from the trading day, so repeated fetches for the
//! same day return identical data.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use twrs_common::Result;

use super::{MarketFeed, MarketSnapshot, Security};

/// Code prefixes and a few name stems for each.
const DEMO_SECTORS: &[(&str, &[&str])] = &[
    ("11", &["水泥", "建泥", "亞泥"]),
    ("12", &["食品", "統一", "味全"]),
    ("13", &["塑膠", "台塑", "南亞"]),
    ("14", &["紡織", "遠東", "儒鴻"]),
    ("15", &["機電", "東元", "上銀"]),
    ("20", &["鋼鐵", "中鋼", "豐興"]),
    ("23", &["半導", "晶圓", "聯電"]),
    ("24", &["電子", "光寶", "國巨"]),
    ("26", &["航運", "長榮", "陽明"]),
    ("28", &["金控", "富邦", "國泰"]),
    ("30", &["通路", "大聯", "文曄"]),
    ("31", &["光電", "友達", "群創"]),
    ("49", &["網通", "智邦", "中磊"]),
    ("00", &["ETF", "高股息", "科技"]),
];

const SECURITIES_PER_SECTOR: usize = 11;

/// Deterministic synthetic feed for offline use.
#[derive(Debug, Clone, Default)]
pub struct DemoFeed {
    seed: u64,
}

impl DemoFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different base seed (tests).
    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    /// Build the universe for a day without going through the trait.
    pub fn generate(&self, date: NaiveDate) -> MarketSnapshot {
        let mut rng = StdRng::seed_from_u64(self.seed ^ date.num_days_from_ce() as u64);
        let mut securities = Vec::with_capacity(DEMO_SECTORS.len() * SECURITIES_PER_SECTOR);

        for (prefix, stems) in DEMO_SECTORS {
            for n in 0..SECURITIES_PER_SECTOR {
                let code = format!("{}{:02}", prefix, 10 + n * 7 % 90);
                let stem = stems[n % stems.len()];
                let name = format!("{}{}", stem, n + 1);

                let price: f64 = round2(rng.gen_range(20.0..520.0));
                let change_pct: f64 = rng.gen_range(-10.0..10.0);
                let previous = price / (1.0 + change_pct / 100.0);
                let change = round2(price - previous);

                securities.push(Security::from_quote(&code, &name, price, change));
            }
        }

        securities.retain(Security::is_valid);
        MarketSnapshot {
            date,
            source: "demo".into(),
            securities,
        }
    }
}

#[async_trait]
impl MarketFeed for DemoFeed {
    fn name(&self) -> &str {
        "demo"
    }

    async fn fetch_day(&self, date: NaiveDate) -> Result<MarketSnapshot> {
        let snapshot = self.generate(date);
        info!(date = %date, securities = snapshot.len(), "Generated demo snapshot");
        Ok(snapshot)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
