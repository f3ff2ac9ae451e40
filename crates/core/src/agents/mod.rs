//! # Section Agents
//!
//! The six research capabilities behind one contract:
//!
//! ```text
//! Orchestrator
//!   └── AgentSet (registry by SectionKind)
//!         └── SectionAgent::produce(request, context) -> SectionResult
//! ```
//!
//! Every `produce` resolves its own errors into `failed`/`partial`
//! results - an agent never takes the run down with it. Agents are
//! stateless and independently retryable; all report/memory writes
//! happen in the orchestrator after the join point, so a result that
//! arrives after the deadline is simply discarded.

pub mod fundamentals;
pub mod leadership;
pub mod llm_helpers;
pub mod market_news;
pub mod persona_strategy;
pub mod tech_services;
pub mod visualization;

pub use fundamentals::{CompanyFundamentals, CompanyProfile, FundamentalsAgent, KeyNumbers};
pub use leadership::{Leader, LeadershipAgent, LeadershipSummary};
pub use market_news::{MarketNewsAgent, MarketNewsSummary, NewsItem};
pub use persona_strategy::{
    NextStepItem, OpportunityItem, PersonaStrategy, PersonaStrategyAgent, RiskItem, UnknownItem,
};
pub use tech_services::{ProductOrService, TechComponent, TechServicesAgent, TechServicesSummary};
pub use visualization::{StockPoint, StockSeries, VisualizationAgent};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::company;
use crate::error::{CoreError, CoreResult};
use crate::memory::MemoryFact;
use crate::report::{Citation, Report, SectionKind, SectionOrigin, SectionResult};
use crate::state::personas::Persona;

/// Identity of the company a run is researching.
///
/// Validated at construction; carries the normalized key every lookup
/// uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub company_name: String,
    pub company_key: String,
    pub website: Option<String>,
    pub region_hint: Option<String>,
    pub ticker: Option<String>,
}

impl ResearchRequest {
    pub fn new(company_name: &str) -> CoreResult<Self> {
        let trimmed = company_name.trim();
        let company_key = company::company_key(trimmed);
        if company_key.is_empty() {
            return Err(CoreError::InvalidRequest(format!(
                "company name {:?} has no identifying content",
                company_name
            )));
        }
        Ok(Self {
            company_name: trimmed.to_string(),
            company_key,
            website: None,
            region_hint: None,
            ticker: None,
        })
    }

    pub fn with_website(mut self, url: impl Into<String>) -> Self {
        self.website = Some(url.into());
        self
    }

    pub fn with_region_hint(mut self, hint: impl Into<String>) -> Self {
        self.region_hint = Some(hint.into());
        self
    }

    pub fn with_ticker(mut self, ticker: impl Into<String>) -> Self {
        self.ticker = Some(ticker.into());
        self
    }

    /// Prompt header shared by every section prompt.
    pub fn context_lines(&self) -> String {
        let mut lines = vec![format!("Company name: {}", self.company_name)];
        if let Some(website) = &self.website {
            lines.push(format!("Website: {}", website));
        }
        if let Some(hint) = &self.region_hint {
            lines.push(format!("Region hint: {}", hint));
        }
        lines.join("\n")
    }
}

/// Context handed to every agent: the persona, prior report sections,
/// and recent memory facts. Lets agents target updates ("refresh news
/// since last run") instead of re-deriving everything.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub persona: Persona,
    pub prior: Option<Report>,
    pub facts: Vec<MemoryFact>,
}

impl RunContext {
    pub fn new(persona: Persona, prior: Option<Report>, facts: Vec<MemoryFact>) -> Self {
        Self {
            persona,
            prior,
            facts,
        }
    }

    /// Compact JSON view of the persona for prompts.
    pub fn persona_digest(&self) -> String {
        serde_json::json!({
            "name": self.persona.name,
            "role": self.persona.role,
            "company": self.persona.company,
            "region": self.persona.region,
            "goal": self.persona.goal,
            "notes": self.persona.notes,
        })
        .to_string()
    }

    /// Prior-section + memory context rendered for one section's prompt.
    pub fn section_context(&self, kind: SectionKind) -> String {
        let mut out = String::new();

        if let Some(prior) = &self.prior {
            let slot = prior.sections.slot(kind);
            if let Some(current) = &slot.current {
                if let Ok(json) = serde_json::to_string_pretty(&current.payload) {
                    out.push_str(&format!(
                        "Previous {} section (generated {}):\n{}\n",
                        kind.label(),
                        current.generated_at.format("%Y-%m-%d"),
                        json
                    ));
                }
                if slot.origin == SectionOrigin::Chat {
                    out.push_str(
                        "The previous section was manually edited by the user. \
                         Treat its content as authoritative context; do not drop it \
                         unless new evidence clearly contradicts it.\n",
                    );
                }
            }
        }

        if !self.facts.is_empty() {
            out.push_str("Known facts about this account:\n");
            for fact in &self.facts {
                out.push_str(&format!("- {}\n", fact.statement));
            }
        }

        if out.is_empty() {
            "No prior research for this account.".to_string()
        } else {
            out
        }
    }

    /// Digest of the account's current fundamentals/news/tech payloads,
    /// consumed by the strategy agent.
    pub fn strategy_inputs(&self) -> String {
        let Some(prior) = &self.prior else {
            return "(no prior sections yet)".to_string();
        };
        let digest = serde_json::json!({
            "fundamentals": prior.sections.fundamentals.payload(),
            "news": prior.sections.news.payload(),
            "tech_services": prior.sections.tech_services.payload(),
        });
        serde_json::to_string_pretty(&digest).unwrap_or_else(|_| "{}".to_string())
    }

    /// Ticker recorded in the prior fundamentals section, if any.
    pub fn known_ticker(&self) -> Option<String> {
        let prior = self.prior.as_ref()?;
        let fundamentals = prior.sections.fundamentals.payload()?.as_fundamentals()?;
        let raw = fundamentals.profile.stock_ticker.as_deref()?;
        visualization::normalize_ticker(raw)
    }
}

/// The capability contract shared by all six section agents.
///
/// `produce` must resolve every internal error to a `failed`/`partial`
/// result; the orchestrator imposes the shared deadline on top and maps
/// overruns to `failed(timeout)`.
#[async_trait]
pub trait SectionAgent: Send + Sync {
    fn kind(&self) -> SectionKind;
    async fn produce(&self, request: &ResearchRequest, context: &RunContext) -> SectionResult;
}

/// Registry of section agents keyed by kind.
#[derive(Clone, Default)]
pub struct AgentSet {
    agents: BTreeMap<SectionKind, Arc<dyn SectionAgent>>,
}

impl AgentSet {
    pub fn new(agents: Vec<Arc<dyn SectionAgent>>) -> Self {
        let agents = agents.into_iter().map(|a| (a.kind(), a)).collect();
        Self { agents }
    }

    pub fn get(&self, kind: SectionKind) -> Option<&Arc<dyn SectionAgent>> {
        self.agents.get(&kind)
    }

    pub fn kinds(&self) -> Vec<SectionKind> {
        self.agents.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Convert LLM-reported source URLs into ordered, de-duplicated citations.
pub fn citations_from(urls: &[String]) -> Vec<Citation> {
    let mut seen = Vec::new();
    let now = Utc::now();
    for url in urls {
        let url = url.trim();
        if url.is_empty() || seen.iter().any(|c: &Citation| c.url == url) {
            continue;
        }
        seen.push(Citation {
            url: url.to_string(),
            retrieved_at: now,
        });
    }
    seen
}
