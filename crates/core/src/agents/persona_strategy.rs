//! # Persona Strategy Agent
//!
//! The "why it matters / opportunities / risks / next steps" section,
//! reasoned from the persona plus whatever fundamentals/news/tech
//! context the run already holds. Chat edits land in this section, so
//! its subfields are the ones the merge layer knows how to overwrite.

use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agents::{citations_from, ResearchRequest, RunContext, SectionAgent};
use crate::models::ModelConfig;
use crate::report::{SectionKind, SectionPayload, SectionResult};
use crate::run_section_function;

/// A concrete opportunity for this persona with this account.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct OpportunityItem {
    /// Short title of the opportunity
    pub title: String,
    /// 2-4 sentences explaining why this is a real opportunity
    #[serde(default)]
    pub description: String,
    /// Bullets tying this back to fundamentals/news/tech/persona
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// An important open question about the account.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct UnknownItem {
    /// What do we NOT know yet?
    pub question: String,
    /// Why this unknown matters for working the account
    #[serde(default)]
    pub why_it_matters: String,
    /// How we might answer this (e.g. "ask customer", "internal CRM")
    #[serde(default)]
    pub how_to_find_out: Option<String>,
}

/// A risk or blocker for the account.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct RiskItem {
    /// Risk or blocker title
    pub risk: String,
    /// Short explanation of impact if this risk is real
    #[serde(default)]
    pub impact: String,
    /// Concrete mitigation ideas, if any
    #[serde(default)]
    pub mitigation: Option<String>,
}

/// A tactical next action.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct NextStepItem {
    /// Specific next action, e.g. "Email X", "Research Y"
    pub action: String,
    /// Who should own this (persona, teammate, etc.)
    #[serde(default)]
    pub owner: Option<String>,
    /// Rough timeframe, e.g. "this week", "next 2 weeks"
    #[serde(default)]
    pub timeframe: Option<String>,
}

/// Top-level output for the Persona Strategy agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct PersonaStrategy {
    /// Short narrative linking persona to target company
    #[serde(default)]
    pub why_it_matters: String,
    /// Concrete opportunities for this persona with this account
    #[serde(default)]
    pub opportunities: Vec<OpportunityItem>,
    /// Important open questions we still need to answer
    #[serde(default)]
    pub key_unknowns: Vec<UnknownItem>,
    /// Risks that might stop progress on this account
    #[serde(default)]
    pub risks: Vec<RiskItem>,
    /// Tactical next actions to progress this account
    #[serde(default)]
    pub next_steps: Vec<NextStepItem>,
    /// Natural-language follow-up questions to surface in the UI
    #[serde(default)]
    pub suggested_followups: Vec<String>,
    /// URLs of the web sources this section was drawn from
    #[serde(default)]
    pub source_urls: Vec<String>,
}

/// Build the persona strategy via the configured LLM provider.
///
/// Unlike the other sections, the prompt also carries a digest of the
/// account's current fundamentals/news/tech sections so the strategy can
/// tie opportunities back to evidence.
pub async fn build_persona_strategy(
    request: &ResearchRequest,
    context: &RunContext,
    config: &ModelConfig,
) -> anyhow::Result<PersonaStrategy> {
    let prompt = format!(
        "{}\n\nPersona:\n{}\n\nAccount context:\n{}\n\n{}",
        request.context_lines(),
        context.persona_digest(),
        context.strategy_inputs(),
        context.section_context(SectionKind::Strategy)
    );
    run_section_function!(config, PersonaStrategy, SYSTEM_PROMPT, prompt)
}

/// Section agent wrapper around [`build_persona_strategy`].
pub struct PersonaStrategyAgent {
    config: ModelConfig,
}

impl PersonaStrategyAgent {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SectionAgent for PersonaStrategyAgent {
    fn kind(&self) -> SectionKind {
        SectionKind::Strategy
    }

    async fn produce(&self, request: &ResearchRequest, context: &RunContext) -> SectionResult {
        match build_persona_strategy(request, context, &self.config).await {
            Ok(out) => {
                let citations = citations_from(&out.source_urls);
                SectionResult::ok(SectionPayload::Strategy(out), citations)
            }
            Err(e) => SectionResult::failed(SectionKind::Strategy, e.to_string()),
        }
    }
}

const SYSTEM_PROMPT: &str = include_str!("defaults/persona_strategy.md");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_strategy_is_empty() {
        let strategy = PersonaStrategy::default();
        assert!(strategy.why_it_matters.is_empty());
        assert!(strategy.risks.is_empty());
    }

    #[test]
    fn test_risk_item_defaults() {
        let json = r#"{"risk":"Incumbent vendor lock-in"}"#;
        let risk: RiskItem = serde_json::from_str(json).unwrap();
        assert!(risk.impact.is_empty());
        assert!(risk.mitigation.is_none());
    }
}
