//! # Tech & Services Agent
//!
//! Produces the "products / services" and "tech stack" section from
//! public signals only - docs, careers pages, engineering blogs.

use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agents::{citations_from, ResearchRequest, RunContext, SectionAgent};
use crate::models::ModelConfig;
use crate::report::{SectionKind, SectionPayload, SectionResult};
use crate::run_section_function;

/// Core offering that matters to the persona.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ProductOrService {
    /// Name of the product / service
    pub name: String,
    /// Short category label, e.g. "cloud database", "HR SaaS"
    #[serde(default)]
    pub category: Option<String>,
    /// 1-2 sentence explanation of what this offering does
    #[serde(default)]
    pub description: Option<String>,
    /// Roles / teams that typically use this offering
    #[serde(default)]
    pub target_users: Vec<String>,
}

/// High-level tech stack component (no guessing deep internals).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct TechComponent {
    /// Area of the stack, e.g. "cloud provider", "database", "frontend"
    pub area: String,
    /// Technologies that appear to be in use, e.g. "AWS", "PostgreSQL"
    #[serde(default)]
    pub technologies: Vec<String>,
    /// Short note on how confident this inference is
    #[serde(default)]
    pub confidence_comment: Option<String>,
}

/// Top-level output for the Tech & Services agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct TechServicesSummary {
    /// Canonical company name
    #[serde(default)]
    pub company_name: String,
    /// Short list of core offerings
    #[serde(default)]
    pub products_and_services: Vec<ProductOrService>,
    /// Simplified view of the tech stack, focused on what matters
    #[serde(default)]
    pub tech_stack: Vec<TechComponent>,
    /// Any relevant notes, e.g. "heavily multi-cloud", "on-premise focus"
    #[serde(default)]
    pub notes: Option<String>,
    /// URLs of the web sources this section was drawn from
    #[serde(default)]
    pub source_urls: Vec<String>,
}

/// Fetch the tech & services summary via the configured LLM provider.
pub async fn fetch_tech_and_services(
    request: &ResearchRequest,
    context: &RunContext,
    config: &ModelConfig,
) -> anyhow::Result<TechServicesSummary> {
    let prompt = format!(
        "{}\n\n{}",
        request.context_lines(),
        context.section_context(SectionKind::TechServices)
    );
    run_section_function!(config, TechServicesSummary, SYSTEM_PROMPT, prompt)
}

/// Section agent wrapper around [`fetch_tech_and_services`].
pub struct TechServicesAgent {
    config: ModelConfig,
}

impl TechServicesAgent {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SectionAgent for TechServicesAgent {
    fn kind(&self) -> SectionKind {
        SectionKind::TechServices
    }

    async fn produce(&self, request: &ResearchRequest, context: &RunContext) -> SectionResult {
        match fetch_tech_and_services(request, context, &self.config).await {
            Ok(out) => {
                let citations = citations_from(&out.source_urls);
                SectionResult::ok(SectionPayload::TechServices(out), citations)
            }
            Err(e) => SectionResult::failed(SectionKind::TechServices, e.to_string()),
        }
    }
}

const SYSTEM_PROMPT: &str = include_str!("defaults/tech_services.md");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_defaults() {
        let json = r#"{"area":"cloud provider"}"#;
        let component: TechComponent = serde_json::from_str(json).unwrap();
        assert!(component.technologies.is_empty());
        assert!(component.confidence_comment.is_none());
    }
}
