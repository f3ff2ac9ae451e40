//! # Chat Orchestrator
//!
//! Persona-aware conversation over the latest report and memory. Every
//! message lands in one of three handling modes:
//!
//! - informational: answered from the latest report + facts, no agents
//! - refresh: delegates the implicated sections to the research
//!   orchestrator
//! - destructive edit ("replace risks with ..."): direct section
//!   overwrite, tagged `chat`, no agents
//!
//! Every turn appends a summary fact so later turns and later research
//! runs stay consistent with what the user already knows.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::memory::{MemoryFact, MemoryStore, NewFact};
use crate::report::{apply_chat_edit, EditTarget, Report, SectionEdit, SectionKind};
use crate::state::personas::Persona;
use crate::state::reports::{CompanyRef, ReportRepository, SaveError};

use super::research::ResearchOrchestrator;
use crate::agents::ResearchRequest;

/// How a chat message should be handled.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatIntent {
    /// Answer from the latest report and memory; no agent calls.
    Informational,
    /// Re-run the implicated sections.
    Refresh { sections: BTreeSet<SectionKind> },
    /// Overwrite one strategy subfield with the given text.
    Edit { target: EditTarget, text: String },
}

/// Rule-based intent classification. Deterministic on purpose: edits
/// and refreshes are destructive enough that we do not want a model
/// guessing at them.
pub fn classify_message(message: &str) -> ChatIntent {
    let lowered = message.trim().to_lowercase();

    if lowered.starts_with("replace ") {
        if let Some(idx) = lowered.find(" with ") {
            let target = match lowered["replace ".len()..idx].trim() {
                t if t.contains("risk") => Some(EditTarget::Risks),
                t if t.contains("opportunit") => Some(EditTarget::Opportunities),
                t if t.contains("next step") => Some(EditTarget::NextSteps),
                t if t.contains("why it matters") || t.contains("narrative") => {
                    Some(EditTarget::WhyItMatters)
                }
                _ => None,
            };
            if let Some(target) = target {
                // Preserve the user's casing when the byte offsets line up
                // (they always do for ASCII input).
                let start = idx + " with ".len();
                let text = if message.len() == lowered.len() && message.is_char_boundary(start) {
                    message[start..].trim().to_string()
                } else {
                    lowered[start..].trim().to_string()
                };
                return ChatIntent::Edit { target, text };
            }
        }
    }

    const REFRESH_VERBS: [&str; 6] = [
        "refresh",
        "update",
        "re-run",
        "rerun",
        "dig deeper",
        "latest on",
    ];
    if REFRESH_VERBS.iter().any(|v| lowered.contains(v)) {
        let mut sections = implicated_sections(&lowered);
        if sections.is_empty() {
            sections = SectionKind::ALL.into_iter().collect();
        }
        return ChatIntent::Refresh { sections };
    }

    ChatIntent::Informational
}

/// Sections named (directly or by topic) in the message.
fn implicated_sections(lowered: &str) -> BTreeSet<SectionKind> {
    let mut sections = BTreeSet::new();
    let keywords: [(&str, SectionKind); 13] = [
        ("news", SectionKind::News),
        ("headline", SectionKind::News),
        ("leadership", SectionKind::Leadership),
        ("leader", SectionKind::Leadership),
        ("people", SectionKind::Leadership),
        ("tech", SectionKind::TechServices),
        ("stack", SectionKind::TechServices),
        ("product", SectionKind::TechServices),
        ("strategy", SectionKind::Strategy),
        ("opportunit", SectionKind::Strategy),
        ("risk", SectionKind::Strategy),
        ("fundamentals", SectionKind::Fundamentals),
        ("stock", SectionKind::Visualization),
    ];
    for (keyword, kind) in keywords {
        if lowered.contains(keyword) {
            sections.insert(kind);
        }
    }
    sections
}

/// Pick which known company the message is about; falls back to the
/// most recently updated report.
fn resolve_company(message: &str, known: &[CompanyRef]) -> Option<CompanyRef> {
    let lowered = message.to_lowercase();
    known
        .iter()
        .find(|c| lowered.contains(&c.company_name.to_lowercase()))
        .or_else(|| known.first())
        .cloned()
}

/// The chat orchestrator
pub struct ChatOrchestrator {
    research: Arc<ResearchOrchestrator>,
    reports: Arc<dyn ReportRepository>,
    memory: Arc<dyn MemoryStore>,
}

impl ChatOrchestrator {
    pub fn new(
        research: Arc<ResearchOrchestrator>,
        reports: Arc<dyn ReportRepository>,
        memory: Arc<dyn MemoryStore>,
    ) -> Self {
        Self {
            research,
            reports,
            memory,
        }
    }

    /// Handle one chat turn and return the reply text.
    #[tracing::instrument(skip(self, persona, message), fields(persona = %persona.id))]
    pub async fn chat(&self, persona: &Persona, message: &str) -> CoreResult<String> {
        if message.trim().is_empty() {
            return Err(CoreError::InvalidRequest("empty chat message".to_string()));
        }

        let known = self
            .reports
            .list_companies(&persona.user_id, &persona.id)
            .unwrap_or_else(|e| {
                tracing::warn!("could not list companies: {e:#}");
                Vec::new()
            });
        let company = resolve_company(message, &known);

        let intent = classify_message(message);
        let reply = match intent {
            ChatIntent::Informational => self.answer(persona, message, company.as_ref()),
            ChatIntent::Refresh { sections } => {
                self.refresh(persona, company.as_ref(), &sections).await?
            }
            ChatIntent::Edit { target, text } => {
                self.apply_edit(persona, company.as_ref(), target, &text)?
            }
        };

        self.record_turn(persona, message, &reply);
        Ok(reply)
    }

    /// Informational mode: render an answer from stored state only.
    fn answer(&self, persona: &Persona, message: &str, company: Option<&CompanyRef>) -> String {
        let Some(company) = company else {
            return "I have no research for this persona yet. Run research on a company first."
                .to_string();
        };

        let report = self
            .reports
            .get_latest(&persona.user_id, &persona.id, &company.company_key)
            .ok()
            .flatten();
        let facts = self
            .memory
            .search(&persona.user_id, &persona.id, message, 5)
            .unwrap_or_default();

        match report {
            Some(report) => render_answer(&report, &facts, message),
            None => format!(
                "I know about {} but could not load its report. Try refreshing it.",
                company.company_name
            ),
        }
    }

    /// Refresh mode: delegate to the research orchestrator.
    async fn refresh(
        &self,
        persona: &Persona,
        company: Option<&CompanyRef>,
        sections: &BTreeSet<SectionKind>,
    ) -> CoreResult<String> {
        let Some(company) = company else {
            return Ok(
                "I could not tell which company to refresh. Run research on it first.".to_string(),
            );
        };

        let request = ResearchRequest::new(&company.company_name)?;
        let report = self
            .research
            .run_targeted_update(persona, &request, sections, true)
            .await?;

        let mut refreshed = Vec::new();
        let mut failed = Vec::new();
        for kind in sections {
            let slot = report.sections.slot(*kind);
            match &slot.last_attempt {
                Some(a) if a.status == crate::report::SectionStatus::Failed => {
                    failed.push(kind.label())
                }
                _ => refreshed.push(kind.label()),
            }
        }

        let mut reply = format!(
            "Refreshed {} for {} (now version {}).",
            refreshed.join(", "),
            company.company_name,
            report.version
        );
        if !failed.is_empty() {
            reply.push_str(&format!(
                " Could not refresh {}; the previous content is still shown.",
                failed.join(", ")
            ));
        }
        Ok(reply)
    }

    /// Destructive edit mode: overwrite without agent calls, with the
    /// same optimistic save and single retry as a research run.
    fn apply_edit(
        &self,
        persona: &Persona,
        company: Option<&CompanyRef>,
        target: EditTarget,
        text: &str,
    ) -> CoreResult<String> {
        let Some(company) = company else {
            return Ok("There is no report to edit yet. Run research first.".to_string());
        };

        let mut attempt = 0;
        loop {
            let Some(mut report) = self
                .reports
                .get_latest(&persona.user_id, &persona.id, &company.company_key)?
            else {
                return Ok("There is no report to edit yet. Run research first.".to_string());
            };

            let expected = report.version;
            apply_chat_edit(
                &mut report,
                &SectionEdit {
                    target,
                    text: text.to_string(),
                },
            );

            match self.reports.save(&report, expected) {
                Ok(stored) => {
                    return Ok(format!(
                        "Replaced the {} for {} (version {}). Future research will treat this as a manual edit.",
                        target.label(),
                        company.company_name,
                        stored.version
                    ));
                }
                Err(SaveError::Conflict { latest }) if attempt == 0 => {
                    attempt += 1;
                    tracing::info!(latest, "edit hit a newer version; re-applying");
                    continue;
                }
                Err(SaveError::Conflict { latest }) => {
                    return Err(CoreError::VersionConflict {
                        expected,
                        latest,
                    });
                }
                Err(SaveError::Storage(e)) => {
                    return Err(CoreError::Other(anyhow::anyhow!(
                        "could not persist edit: {}",
                        e
                    )));
                }
            }
        }
    }

    fn record_turn(&self, persona: &Persona, message: &str, reply: &str) {
        let statement = format!(
            "Chat turn. User: {} | Assistant: {}",
            snippet(message, 160),
            snippet(reply, 160)
        );
        if let Err(e) = self
            .memory
            .add(NewFact::chat(&persona.user_id, &persona.id, statement))
        {
            tracing::warn!("failed to record chat turn: {e:#}");
        }
    }
}

/// Render an informational answer from the report and facts. Section
/// keywords pick the most relevant slice; otherwise a short overview.
fn render_answer(report: &Report, facts: &[MemoryFact], message: &str) -> String {
    let lowered = message.to_lowercase();
    let sections = implicated_sections(&lowered);

    let mut parts = Vec::new();
    for kind in &sections {
        if let Some(text) = summarize_section(report, *kind) {
            parts.push(text);
        }
    }

    if parts.is_empty() {
        parts.push(overview(report));
    }

    if !facts.is_empty() {
        let recalled: Vec<String> = facts
            .iter()
            .take(2)
            .map(|f| format!("- {}", snippet(&f.statement, 120)))
            .collect();
        parts.push(format!("From earlier context:\n{}", recalled.join("\n")));
    }

    parts.join("\n\n")
}

fn overview(report: &Report) -> String {
    let mut lines = vec![format!(
        "{} (report version {}):",
        report.company_name, report.version
    )];

    if let Some(f) = report
        .sections
        .fundamentals
        .payload()
        .and_then(|p| p.as_fundamentals())
    {
        if let Some(desc) = &f.profile.short_description {
            lines.push(desc.clone());
        }
        if let Some(industry) = &f.profile.industry {
            lines.push(format!("Industry: {}", industry));
        }
    }
    if let Some(s) = report
        .sections
        .strategy
        .payload()
        .and_then(|p| p.as_strategy())
    {
        if !s.why_it_matters.is_empty() {
            lines.push(format!("Why it matters: {}", snippet(&s.why_it_matters, 240)));
        }
    }
    if lines.len() == 1 {
        lines.push("No detail sections are available yet.".to_string());
    }
    lines.join("\n")
}

fn summarize_section(report: &Report, kind: SectionKind) -> Option<String> {
    let payload = report.sections.slot(kind).payload()?;
    let text = match kind {
        SectionKind::Fundamentals => {
            let f = payload.as_fundamentals()?;
            format!(
                "Fundamentals: {} | HQ: {} | Status: {}",
                f.profile.industry.as_deref().unwrap_or("unknown industry"),
                f.profile.headquarters.as_deref().unwrap_or("unknown"),
                f.profile.public_status
            )
        }
        SectionKind::Leadership => {
            let l = payload.as_leadership()?;
            let names: Vec<String> = l
                .leaders
                .iter()
                .take(3)
                .map(|x| format!("{} ({})", x.name, x.title))
                .collect();
            format!("Key people: {}", names.join(", "))
        }
        SectionKind::News => {
            let n = payload.as_news()?;
            format!(
                "News sentiment: {} | Themes: {}",
                n.overall_sentiment.as_deref().unwrap_or("unknown"),
                n.key_themes.join(", ")
            )
        }
        SectionKind::TechServices => {
            let t = payload.as_tech_services()?;
            let products: Vec<&str> = t
                .products_and_services
                .iter()
                .take(3)
                .map(|p| p.name.as_str())
                .collect();
            format!("Products: {}", products.join(", "))
        }
        SectionKind::Strategy => {
            let s = payload.as_strategy()?;
            let risks: Vec<&str> = s.risks.iter().take(3).map(|r| r.risk.as_str()).collect();
            let opps: Vec<&str> = s
                .opportunities
                .iter()
                .take(3)
                .map(|o| o.title.as_str())
                .collect();
            format!(
                "Opportunities: {} | Risks: {}",
                if opps.is_empty() { "none noted".to_string() } else { opps.join(", ") },
                if risks.is_empty() { "none noted".to_string() } else { risks.join(", ") },
            )
        }
        SectionKind::Visualization => {
            let v = payload.as_stock()?;
            match (&v.symbol, v.points.last()) {
                (Some(symbol), Some(last)) => {
                    format!("Stock {}: last close {:.2} on {}", symbol, last.close, last.date)
                }
                _ => "Not publicly traded.".to_string(),
            }
        }
    };
    Some(text)
}

fn snippet(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
