//! # Market News Agent
//!
//! Builds the "latest news" section: recent, high-signal items with
//! sentiment and themes. Item count is capped after the provider call.

use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agents::{citations_from, ResearchRequest, RunContext, SectionAgent};
use crate::models::ModelConfig;
use crate::report::{SectionKind, SectionPayload, SectionResult};
use crate::run_section_function;

/// Single news item shown in the "Latest news" section.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct NewsItem {
    /// Headline/title of the article
    pub title: String,
    /// 2-4 sentence summary of what this article says
    pub summary: String,
    /// Link to the original article/blog/press release
    pub url: String,
    /// Publication date as ISO string if available
    #[serde(default)]
    pub published_at: Option<String>,
    /// Sentiment for the company: "positive", "negative", "neutral", "mixed"
    #[serde(default)]
    pub sentiment: Option<String>,
    /// Short topic tags, e.g. ["product launch", "security incident"]
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Top-level output for the Market News agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct MarketNewsSummary {
    /// Canonical company name
    #[serde(default)]
    pub company_name: String,
    /// Overall sentiment across the listed items
    #[serde(default)]
    pub overall_sentiment: Option<String>,
    /// Key themes / storylines from the recent news
    #[serde(default)]
    pub key_themes: Vec<String>,
    /// Chronologically recent, de-duplicated news items
    #[serde(default)]
    pub items: Vec<NewsItem>,
}

/// Keep at most `max_items` news items.
pub(crate) fn cap_items(summary: &mut MarketNewsSummary, max_items: usize) {
    if summary.items.len() > max_items {
        summary.items.truncate(max_items);
    }
}

/// Fetch the news summary via the configured LLM provider.
pub async fn fetch_market_news(
    request: &ResearchRequest,
    context: &RunContext,
    config: &ModelConfig,
    max_items: usize,
) -> anyhow::Result<MarketNewsSummary> {
    let prompt = format!(
        "{}\n\nInclude at most {} high-signal items.\n\n{}",
        request.context_lines(),
        max_items,
        context.section_context(SectionKind::News)
    );
    let mut summary: MarketNewsSummary =
        run_section_function!(config, MarketNewsSummary, SYSTEM_PROMPT, prompt)?;
    cap_items(&mut summary, max_items);
    Ok(summary)
}

/// Section agent wrapper around [`fetch_market_news`].
pub struct MarketNewsAgent {
    config: ModelConfig,
    max_items: usize,
}

impl MarketNewsAgent {
    pub fn new(config: ModelConfig, max_items: usize) -> Self {
        Self { config, max_items }
    }
}

#[async_trait]
impl SectionAgent for MarketNewsAgent {
    fn kind(&self) -> SectionKind {
        SectionKind::News
    }

    async fn produce(&self, request: &ResearchRequest, context: &RunContext) -> SectionResult {
        match fetch_market_news(request, context, &self.config, self.max_items).await {
            Ok(out) => {
                let urls: Vec<String> = out.items.iter().map(|i| i.url.clone()).collect();
                let citations = citations_from(&urls);
                if out.items.is_empty() {
                    SectionResult::partial(SectionPayload::News(out), "no recent news found")
                } else {
                    SectionResult::ok(SectionPayload::News(out), citations)
                }
            }
            Err(e) => SectionResult::failed(SectionKind::News, e.to_string()),
        }
    }
}

const SYSTEM_PROMPT: &str = include_str!("defaults/market_news.md");

#[cfg(test)]
mod tests {
    use super::*;

    fn item(n: usize) -> NewsItem {
        NewsItem {
            title: format!("Item {}", n),
            summary: "Summary.".to_string(),
            url: format!("https://example.com/{}", n),
            published_at: None,
            sentiment: None,
            topics: Vec::new(),
        }
    }

    #[test]
    fn test_cap_items_truncates() {
        let mut summary = MarketNewsSummary {
            items: (0..10).map(item).collect(),
            ..Default::default()
        };
        cap_items(&mut summary, 6);
        assert_eq!(summary.items.len(), 6);
        assert_eq!(summary.items[0].title, "Item 0");
    }

    #[test]
    fn test_cap_items_noop_under_limit() {
        let mut summary = MarketNewsSummary {
            items: (0..3).map(item).collect(),
            ..Default::default()
        };
        cap_items(&mut summary, 6);
        assert_eq!(summary.items.len(), 3);
    }
}
