//! # Leadership Agent
//!
//! Identifies the executives and decision makers that matter for the
//! account. Returns `partial` rather than `ok` when nobody could be
//! identified, so the orchestrator keeps any prior list.

use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agents::{citations_from, ResearchRequest, RunContext, SectionAgent};
use crate::models::ModelConfig;
use crate::report::{SectionKind, SectionPayload, SectionResult};
use crate::run_section_function;

/// Single executive / key stakeholder at the target company.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct Leader {
    /// Full name of the person
    pub name: String,
    /// Current role/title at the company
    pub title: String,
    /// LinkedIn profile URL if available
    #[serde(default)]
    pub linkedin_url: Option<String>,
    /// Location if known, e.g. "Bangalore, India"
    #[serde(default)]
    pub location: Option<String>,
    /// Short note on why they matter for the account
    #[serde(default)]
    pub notes: Option<String>,
}

/// Top-level output for the Leadership agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct LeadershipSummary {
    /// Canonical company name
    #[serde(default)]
    pub company_name: String,
    /// Top 3-7 relevant leaders for this account
    #[serde(default)]
    pub leaders: Vec<Leader>,
    /// Any overall notes or warnings about leadership
    #[serde(default)]
    pub notes: Option<String>,
    /// URLs of the web sources this section was drawn from
    #[serde(default)]
    pub source_urls: Vec<String>,
}

/// Fetch the leadership summary via the configured LLM provider.
pub async fn fetch_leadership(
    request: &ResearchRequest,
    context: &RunContext,
    config: &ModelConfig,
) -> anyhow::Result<LeadershipSummary> {
    let prompt = format!(
        "{}\n\n{}",
        request.context_lines(),
        context.section_context(SectionKind::Leadership)
    );
    run_section_function!(config, LeadershipSummary, SYSTEM_PROMPT, prompt)
}

/// Section agent wrapper around [`fetch_leadership`].
pub struct LeadershipAgent {
    config: ModelConfig,
}

impl LeadershipAgent {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SectionAgent for LeadershipAgent {
    fn kind(&self) -> SectionKind {
        SectionKind::Leadership
    }

    async fn produce(&self, request: &ResearchRequest, context: &RunContext) -> SectionResult {
        match fetch_leadership(request, context, &self.config).await {
            Ok(out) => {
                let citations = citations_from(&out.source_urls);
                if out.leaders.is_empty() {
                    SectionResult::partial(
                        SectionPayload::Leadership(out),
                        "no leaders identified",
                    )
                    .with_citations(citations)
                } else {
                    SectionResult::ok(SectionPayload::Leadership(out), citations)
                }
            }
            Err(e) => SectionResult::failed(SectionKind::Leadership, e.to_string()),
        }
    }
}

const SYSTEM_PROMPT: &str = include_str!("defaults/leadership.md");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_summary_parses() {
        let parsed: LeadershipSummary = serde_json::from_str("{}").unwrap();
        assert!(parsed.leaders.is_empty());
        assert!(parsed.notes.is_none());
    }

    #[test]
    fn test_leader_optional_fields_default() {
        let json = r#"{"name":"Jane Doe","title":"CTO"}"#;
        let leader: Leader = serde_json::from_str(json).unwrap();
        assert!(leader.linkedin_url.is_none());
        assert!(leader.location.is_none());
    }
}
