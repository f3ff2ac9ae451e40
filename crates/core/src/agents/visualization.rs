//! # Visualization Agent
//!
//! Stock price series for publicly traded companies. The ticker comes
//! from the request, the prior fundamentals section, or a small LLM
//! lookup; the series itself comes from the finance provider. Private
//! companies get an explicit not-listed payload rather than a failure.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agents::{ResearchRequest, RunContext, SectionAgent};
use crate::models::ModelConfig;
use crate::providers::FinanceProvider;
use crate::report::{Citation, SectionKind, SectionPayload, SectionResult};
use crate::run_section_function;

/// Single point on the stock price chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockPoint {
    /// Trading day (UTC)
    pub date: NaiveDate,
    /// Daily close price in quote currency
    pub close: f64,
}

/// Price series payload; empty points plus a note means "not listed".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StockSeries {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    /// Ordered oldest to newest, suitable for plotting
    #[serde(default)]
    pub points: Vec<StockPoint>,
    #[serde(default)]
    pub note: Option<String>,
}

impl StockSeries {
    /// Marker payload for companies with no public listing.
    pub fn not_listed(company_name: &str) -> Self {
        Self {
            company_name: Some(company_name.to_string()),
            note: Some("not publicly traded".to_string()),
            ..Default::default()
        }
    }
}

/// LLM output resolving whether the company trades publicly.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct TickerLookup {
    /// One of "public", "private", "subsidiary", "unknown"
    pub public_status: String,
    /// Bare ticker symbol without exchange prefix, e.g. "AAPL"
    #[serde(default)]
    pub symbol: Option<String>,
}

/// Strip an exchange prefix like "NASDAQ:CRM" down to "CRM".
pub(crate) fn normalize_ticker(raw: &str) -> Option<String> {
    let bare = raw.rsplit(':').next().unwrap_or(raw).trim();
    if bare.is_empty() {
        None
    } else {
        Some(bare.to_uppercase())
    }
}

/// Ask the LLM whether the company is listed and under which symbol.
async fn lookup_ticker(
    request: &ResearchRequest,
    config: &ModelConfig,
) -> anyhow::Result<TickerLookup> {
    let prompt = request.context_lines();
    run_section_function!(config, TickerLookup, TICKER_PROMPT, prompt)
}

/// Section agent producing the stock chart payload.
pub struct VisualizationAgent {
    config: ModelConfig,
    finance: Arc<dyn FinanceProvider>,
    days: u32,
}

impl VisualizationAgent {
    pub fn new(config: ModelConfig, finance: Arc<dyn FinanceProvider>, days: u32) -> Self {
        Self {
            config,
            finance,
            days,
        }
    }

    async fn resolve_symbol(
        &self,
        request: &ResearchRequest,
        context: &RunContext,
    ) -> anyhow::Result<Option<String>> {
        if let Some(ticker) = request.ticker.as_deref().and_then(normalize_ticker) {
            return Ok(Some(ticker));
        }
        if let Some(ticker) = context.known_ticker() {
            return Ok(Some(ticker));
        }
        let lookup = lookup_ticker(request, &self.config).await?;
        if lookup.public_status == "public" {
            Ok(lookup.symbol.as_deref().and_then(normalize_ticker))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl SectionAgent for VisualizationAgent {
    fn kind(&self) -> SectionKind {
        SectionKind::Visualization
    }

    async fn produce(&self, request: &ResearchRequest, context: &RunContext) -> SectionResult {
        let symbol = match self.resolve_symbol(request, context).await {
            Ok(Some(symbol)) => symbol,
            Ok(None) => {
                let series = StockSeries::not_listed(&request.company_name);
                return SectionResult::ok(SectionPayload::Visualization(series), Vec::new());
            }
            Err(e) => return SectionResult::failed(SectionKind::Visualization, e.to_string()),
        };

        match self.finance.daily_series(&symbol, self.days).await {
            Ok(points) if points.is_empty() => SectionResult::partial(
                SectionPayload::Visualization(StockSeries {
                    symbol: Some(symbol),
                    company_name: Some(request.company_name.clone()),
                    ..Default::default()
                }),
                "provider returned no price points",
            ),
            Ok(points) => {
                let citation = Citation {
                    url: self.finance.source_url(&symbol),
                    retrieved_at: Utc::now(),
                };
                let series = StockSeries {
                    symbol: Some(symbol),
                    company_name: Some(request.company_name.clone()),
                    currency: None,
                    points: points
                        .into_iter()
                        .map(|p| StockPoint {
                            date: p.date,
                            close: p.close,
                        })
                        .collect(),
                    note: None,
                };
                SectionResult::ok(SectionPayload::Visualization(series), vec![citation])
            }
            Err(e) => SectionResult::failed(SectionKind::Visualization, e.to_string()),
        }
    }
}

const TICKER_PROMPT: &str = include_str!("defaults/ticker_lookup.md");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_ticker_strips_exchange_prefix() {
        assert_eq!(normalize_ticker("NASDAQ:CRM").as_deref(), Some("CRM"));
        assert_eq!(normalize_ticker("aapl").as_deref(), Some("AAPL"));
        assert_eq!(normalize_ticker(" "), None);
    }

    #[test]
    fn test_not_listed_marker() {
        let series = StockSeries::not_listed("Stripe");
        assert!(series.points.is_empty());
        assert_eq!(series.note.as_deref(), Some("not publicly traded"));
    }

    #[test]
    fn test_series_roundtrip() {
        let series = StockSeries {
            symbol: Some("AAPL".to_string()),
            company_name: Some("Apple".to_string()),
            currency: Some("USD".to_string()),
            points: vec![StockPoint {
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                close: 185.64,
            }],
            note: None,
        };
        let json = serde_json::to_string(&series).unwrap();
        let parsed: StockSeries = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.points.len(), 1);
        assert_eq!(parsed.points[0].close, 185.64);
    }
}
