//! # Fundamentals Agent
//!
//! Produces the company profile + key numbers section. Backed by a
//! structured LLM call; the prompt carries the prior section and recent
//! memory facts so refreshes stay incremental.

use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agents::{citations_from, ResearchRequest, RunContext, SectionAgent};
use crate::models::ModelConfig;
use crate::report::{SectionKind, SectionPayload, SectionResult};
use crate::run_section_function;

/// Basic identity of the target company.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct CompanyProfile {
    /// Canonical company name
    pub company_name: String,
    /// Primary website URL if known
    #[serde(default)]
    pub website: Option<String>,
    /// City + country of HQ, e.g. "San Francisco, USA"
    #[serde(default)]
    pub headquarters: Option<String>,
    /// High-level industry, e.g. "SaaS", "Fintech", "Manufacturing"
    #[serde(default)]
    pub industry: Option<String>,
    /// One of "public", "private", "subsidiary", "unknown"
    #[serde(default = "unknown_status")]
    pub public_status: String,
    /// Exchange ticker symbol if publicly traded, e.g. "NASDAQ:CRM"
    #[serde(default)]
    pub stock_ticker: Option<String>,
    /// Rough size bucket: "1-50", "51-200", "201-1000", "1000+"
    #[serde(default)]
    pub employee_count_bucket: Option<String>,
    /// Key geographies where the company operates
    #[serde(default)]
    pub primary_regions: Vec<String>,
    /// 1-3 sentence plain-English description of what the company does
    #[serde(default)]
    pub short_description: Option<String>,
}

fn unknown_status() -> String {
    "unknown".to_string()
}

/// Lightweight numeric signals used later by the strategy agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct KeyNumbers {
    /// Approximate latest annual revenue in billions USD if known
    #[serde(default)]
    pub latest_revenue_usd_bil: Option<f64>,
    /// Approximate year-over-year revenue growth percentage if known
    #[serde(default)]
    pub yoy_revenue_growth_pct: Option<f64>,
    /// Estimated employee count if a concrete number is available
    #[serde(default)]
    pub employee_count_estimate: Option<u64>,
    /// Year the company was founded
    #[serde(default)]
    pub founded_year: Option<i32>,
}

/// Top-level output for the Fundamentals agent.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct CompanyFundamentals {
    pub profile: CompanyProfile,
    #[serde(default)]
    pub key_numbers: KeyNumbers,
    /// Short explanation of how the company makes money
    #[serde(default)]
    pub business_model: Option<String>,
    /// 1-2 sentences describing the types of customers they target
    #[serde(default)]
    pub ideal_customer_profile: Option<String>,
    /// Important customer / market segments, e.g. "enterprise banks"
    #[serde(default)]
    pub key_segments: Vec<String>,
    /// Bullet points with any important contextual notes
    #[serde(default)]
    pub notable_notes: Vec<String>,
    /// URLs of the web sources this section was drawn from
    #[serde(default)]
    pub source_urls: Vec<String>,
}

/// Fetch structured company fundamentals via the configured LLM provider.
pub async fn fetch_company_fundamentals(
    request: &ResearchRequest,
    context: &RunContext,
    config: &ModelConfig,
) -> anyhow::Result<CompanyFundamentals> {
    let prompt = format!(
        "{}\n\n{}",
        request.context_lines(),
        context.section_context(SectionKind::Fundamentals)
    );
    run_section_function!(config, CompanyFundamentals, SYSTEM_PROMPT, prompt)
}

/// Section agent wrapper around [`fetch_company_fundamentals`].
pub struct FundamentalsAgent {
    config: ModelConfig,
}

impl FundamentalsAgent {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SectionAgent for FundamentalsAgent {
    fn kind(&self) -> SectionKind {
        SectionKind::Fundamentals
    }

    async fn produce(&self, request: &ResearchRequest, context: &RunContext) -> SectionResult {
        match fetch_company_fundamentals(request, context, &self.config).await {
            Ok(out) => {
                let citations = citations_from(&out.source_urls);
                SectionResult::ok(SectionPayload::Fundamentals(out), citations)
            }
            Err(e) => SectionResult::failed(SectionKind::Fundamentals, e.to_string()),
        }
    }
}

const SYSTEM_PROMPT: &str = include_str!("defaults/fundamentals.md");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_json_fills_defaults() {
        let json = r#"{"profile":{"company_name":"Stripe"},"key_numbers":{}}"#;
        let parsed: CompanyFundamentals = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.profile.company_name, "Stripe");
        assert_eq!(parsed.profile.public_status, "unknown");
        assert!(parsed.key_segments.is_empty());
        assert!(parsed.key_numbers.founded_year.is_none());
    }

    #[test]
    fn test_profile_roundtrip() {
        let profile = CompanyProfile {
            company_name: "Stripe".to_string(),
            website: Some("https://stripe.com".to_string()),
            headquarters: Some("San Francisco, USA".to_string()),
            industry: Some("Fintech".to_string()),
            public_status: "private".to_string(),
            stock_ticker: None,
            employee_count_bucket: Some("1000+".to_string()),
            primary_regions: vec!["US".to_string(), "EU".to_string()],
            short_description: None,
        };
        let json = serde_json::to_string(&profile).unwrap();
        let parsed: CompanyProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.public_status, "private");
        assert_eq!(parsed.primary_regions.len(), 2);
    }
}
