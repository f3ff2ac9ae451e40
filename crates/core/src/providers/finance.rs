//! # Finance Provider
//!
//! Daily price series for publicly traded companies, wrapped behind a
//! trait so the visualization agent can be exercised without the
//! network. The HTTP implementation targets an Alpha Vantage style
//! endpoint with a bounded timeout.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use std::time::Duration;

pub const ALPHAVANTAGE_API_KEY_ENV: &str = "ALPHAVANTAGE_API_KEY";
const ALPHAVANTAGE_ENDPOINT: &str = "https://www.alphavantage.co/query";

/// One trading day close.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Capability needed by the visualization agent.
#[async_trait]
pub trait FinanceProvider: Send + Sync {
    /// Daily closes, oldest to newest, at most `days` entries.
    async fn daily_series(&self, symbol: &str, days: u32) -> Result<Vec<PricePoint>>;

    /// Citation URL recorded against the produced section.
    fn source_url(&self, symbol: &str) -> String;
}

/// Alpha Vantage backed implementation. The API key is resolved lazily
/// so constructing the provider never fails at startup.
pub struct AlphaVantageFinance {
    client: reqwest::Client,
}

impl AlphaVantageFinance {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    fn api_key(&self) -> Result<String> {
        std::env::var(ALPHAVANTAGE_API_KEY_ENV)
            .map_err(|_| anyhow!("{} is not set in environment/.env", ALPHAVANTAGE_API_KEY_ENV))
    }
}

impl Default for AlphaVantageFinance {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FinanceProvider for AlphaVantageFinance {
    async fn daily_series(&self, symbol: &str, days: u32) -> Result<Vec<PricePoint>> {
        let key = self.api_key()?;
        let url = format!(
            "{}?function=TIME_SERIES_DAILY_ADJUSTED&symbol={}&apikey={}",
            ALPHAVANTAGE_ENDPOINT,
            urlencoding::encode(symbol),
            key
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("finance API request failed")?;
        let data: Value = response
            .json()
            .await
            .context("finance API returned non-JSON body")?;

        if let Some(msg) = data.get("Error Message").and_then(|v| v.as_str()) {
            return Err(anyhow!("finance API error: {}", msg));
        }
        if let Some(note) = data.get("Note").and_then(|v| v.as_str()) {
            // Usually rate limits / quota.
            return Err(anyhow!("finance API note (likely rate limit): {}", note));
        }

        let mut points = extract_daily_closes(&data)?;
        if days > 0 && points.len() > days as usize {
            points = points.split_off(points.len() - days as usize);
        }
        Ok(points)
    }

    fn source_url(&self, symbol: &str) -> String {
        format!(
            "{}?function=TIME_SERIES_DAILY_ADJUSTED&symbol={}",
            ALPHAVANTAGE_ENDPOINT,
            urlencoding::encode(symbol)
        )
    }
}

/// Pull `[(date, close)]` out of a time-series response, sorted oldest
/// to newest. Tolerates the provider's varying close-field spellings.
fn extract_daily_closes(data: &Value) -> Result<Vec<PricePoint>> {
    let series = data
        .as_object()
        .and_then(|obj| {
            obj.iter()
                .find(|(k, _)| k.contains("Time Series"))
                .map(|(_, v)| v)
        })
        .and_then(|v| v.as_object())
        .ok_or_else(|| anyhow!("could not find time series key in response"))?;

    let mut points = Vec::new();
    for (date_str, ohlc) in series {
        let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };
        let close = ohlc
            .get("4. close")
            .or_else(|| ohlc.get("5. adjusted close"))
            .or_else(|| ohlc.get("4. Close"))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok());
        if let Some(close) = close {
            points.push(PricePoint { date, close });
        }
    }

    points.sort_by_key(|p| p.date);
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_daily_closes_sorts_ascending() {
        let data = json!({
            "Meta Data": {},
            "Time Series (Daily)": {
                "2024-01-03": {"4. close": "101.5"},
                "2024-01-02": {"4. close": "100.0"},
                "2024-01-04": {"5. adjusted close": "102.25"},
            }
        });
        let points = extract_daily_closes(&data).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].close, 100.0);
        assert_eq!(points[2].close, 102.25);
        assert!(points[0].date < points[2].date);
    }

    #[test]
    fn test_extract_skips_unparseable_rows() {
        let data = json!({
            "Time Series (Daily)": {
                "2024-01-02": {"4. close": "not-a-number"},
                "2024-01-03": {"4. close": "99.0"},
                "garbage-date": {"4. close": "1.0"},
            }
        });
        let points = extract_daily_closes(&data).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].close, 99.0);
    }

    #[test]
    fn test_missing_series_key_is_an_error() {
        let data = json!({"Meta Data": {}});
        assert!(extract_daily_closes(&data).is_err());
    }
}
