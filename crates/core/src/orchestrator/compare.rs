//! # Compare Orchestrator
//!
//! Two-company comparison for one persona. Reuses fresh cached reports
//! (inside the freshness window) or re-runs research for the stale
//! side, then derives the comparison as a pure function of the two
//! reports - identical inputs always produce identical output.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::agents::ResearchRequest;
use crate::error::{CoreError, CoreResult};
use crate::report::{Report, SectionKind};
use crate::state::compare_sessions::{
    CompareSession, CompareSessionStore, ComparisonPayload, Recommendation, RecommendationBasis,
    SectionDelta, SideBySide,
};
use crate::state::personas::Persona;
use crate::state::reports::ReportRepository;

use super::research::ResearchOrchestrator;

/// Configuration for the compare orchestrator
#[derive(Debug, Clone)]
pub struct CompareConfig {
    /// Maximum age of a persisted report still eligible for cache reuse
    pub freshness_window_hours: i64,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            freshness_window_hours: 24,
        }
    }
}

/// The compare orchestrator
pub struct CompareOrchestrator {
    research: Arc<ResearchOrchestrator>,
    reports: Arc<dyn ReportRepository>,
    sessions: CompareSessionStore,
    config: CompareConfig,
}

impl CompareOrchestrator {
    pub fn new(
        research: Arc<ResearchOrchestrator>,
        reports: Arc<dyn ReportRepository>,
        sessions: CompareSessionStore,
        config: CompareConfig,
    ) -> Self {
        Self {
            research,
            reports,
            sessions,
            config,
        }
    }

    /// Compare two companies for a persona and persist the immutable
    /// session. With `use_cached`, a fresh-enough report skips agents
    /// entirely for that side.
    #[tracing::instrument(skip(self, persona), fields(persona = %persona.id))]
    pub async fn compare_companies(
        &self,
        persona: &Persona,
        company_a: &str,
        company_b: &str,
        use_cached: bool,
    ) -> CoreResult<CompareSession> {
        let request_a = ResearchRequest::new(company_a)?;
        let request_b = ResearchRequest::new(company_b)?;
        if request_a.company_key == request_b.company_key {
            return Err(CoreError::InvalidRequest(
                "cannot compare a company with itself".to_string(),
            ));
        }

        let report_a = self.report_for(persona, &request_a, use_cached).await?;
        let report_b = self.report_for(persona, &request_b, use_cached).await?;

        let comparison = compare_reports(persona, &report_a, &report_b);
        let session = self.sessions.create(
            &persona.user_id,
            &persona.id,
            &report_a,
            &report_b,
            comparison,
        )?;
        Ok(session)
    }

    async fn report_for(
        &self,
        persona: &Persona,
        request: &ResearchRequest,
        use_cached: bool,
    ) -> CoreResult<Report> {
        if use_cached {
            if let Some(existing) = self.reports.get_latest(
                &persona.user_id,
                &persona.id,
                &request.company_key,
            )? {
                let age = Utc::now() - existing.updated_at;
                if age < Duration::hours(self.config.freshness_window_hours) {
                    return Ok(existing);
                }
                tracing::info!(company = %request.company_key, "cached report is stale; re-running research");
            }
        }
        self.research.run_full_research(persona, request, true).await
    }
}

/// Derive the comparison payload. Pure and deterministic: no clocks, no
/// randomness, only the two reports and the persona.
pub fn compare_reports(persona: &Persona, a: &Report, b: &Report) -> ComparisonPayload {
    let section_deltas = SectionKind::ALL
        .iter()
        .map(|kind| SectionDelta {
            kind: *kind,
            company_a: side_line(a, *kind),
            company_b: side_line(b, *kind),
        })
        .collect();

    ComparisonPayload {
        summary: build_summary(a, b),
        section_deltas,
        opportunities: SideBySide {
            company_a: opportunity_titles(a),
            company_b: opportunity_titles(b),
        },
        risks: SideBySide {
            company_a: risk_titles(a),
            company_b: risk_titles(b),
        },
        recommendation: recommend(persona, a, b),
    }
}

/// Fixed precedence: persona goal alignment > opportunity surface >
/// risk surface; ties go to the side with more complete data, and a
/// full tie falls back to key order so repeated calls agree.
fn recommend(persona: &Persona, a: &Report, b: &Report) -> Recommendation {
    if let Some(goal) = persona.goal.as_deref().filter(|g| !g.trim().is_empty()) {
        let score_a = goal_alignment(goal, a);
        let score_b = goal_alignment(goal, b);
        if score_a != score_b {
            let (winner, hi, lo) = if score_a > score_b {
                (a, score_a, score_b)
            } else {
                (b, score_b, score_a)
            };
            return recommendation(
                winner,
                RecommendationBasis::GoalAlignment,
                format!(
                    "Stronger alignment with the persona goal ({} vs {} matching signals)",
                    hi, lo
                ),
            );
        }
    }

    let opps_a = opportunity_titles(a).len();
    let opps_b = opportunity_titles(b).len();
    if opps_a != opps_b {
        let (winner, hi, lo) = if opps_a > opps_b {
            (a, opps_a, opps_b)
        } else {
            (b, opps_b, opps_a)
        };
        return recommendation(
            winner,
            RecommendationBasis::OpportunitySurface,
            format!("More opportunities ({} vs {})", hi, lo),
        );
    }

    let risks_a = risk_titles(a).len();
    let risks_b = risk_titles(b).len();
    if risks_a != risks_b {
        let (winner, lo, hi) = if risks_a < risks_b {
            (a, risks_a, risks_b)
        } else {
            (b, risks_b, risks_a)
        };
        return recommendation(
            winner,
            RecommendationBasis::RiskSurface,
            format!("Lower risk profile ({} vs {} blockers)", lo, hi),
        );
    }

    let missing_a = a.incomplete_section_count();
    let missing_b = b.incomplete_section_count();
    if missing_a != missing_b {
        let (winner, lo, hi) = if missing_a < missing_b {
            (a, missing_a, missing_b)
        } else {
            (b, missing_b, missing_a)
        };
        return recommendation(
            winner,
            RecommendationBasis::DataCompleteness,
            format!("More complete data ({} vs {} sections missing)", lo, hi),
        );
    }

    let winner = if a.company_key <= b.company_key { a } else { b };
    recommendation(
        winner,
        RecommendationBasis::DataCompleteness,
        "Complete tie on every signal; picked by key order".to_string(),
    )
}

fn recommendation(winner: &Report, basis: RecommendationBasis, reason: String) -> Recommendation {
    Recommendation {
        company_key: winner.company_key.clone(),
        company_name: winner.company_name.clone(),
        basis,
        reason,
    }
}

/// Count persona-goal terms appearing in the strategy narrative and
/// opportunity text.
fn goal_alignment(goal: &str, report: &Report) -> usize {
    let Some(strategy) = report
        .sections
        .strategy
        .payload()
        .and_then(|p| p.as_strategy())
    else {
        return 0;
    };

    let mut haystack = strategy.why_it_matters.to_lowercase();
    for opp in &strategy.opportunities {
        haystack.push(' ');
        haystack.push_str(&opp.title.to_lowercase());
        haystack.push(' ');
        haystack.push_str(&opp.description.to_lowercase());
    }

    let mut terms: Vec<String> = goal
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 3)
        .map(|t| t.to_string())
        .collect();
    terms.dedup();

    terms
        .iter()
        .filter(|t| haystack.contains(t.as_str()))
        .count()
}

fn build_summary(a: &Report, b: &Report) -> String {
    let profile = |r: &Report| {
        r.sections
            .fundamentals
            .payload()
            .and_then(|p| p.as_fundamentals())
            .map(|f| f.profile.clone())
    };
    let pa = profile(a);
    let pb = profile(b);

    let hq = |p: &Option<crate::agents::CompanyProfile>| {
        p.as_ref()
            .and_then(|p| p.headquarters.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    };
    let industry = |p: &Option<crate::agents::CompanyProfile>| {
        p.as_ref()
            .and_then(|p| p.industry.clone())
            .unwrap_or_else(|| "N/A".to_string())
    };
    let status = |p: &Option<crate::agents::CompanyProfile>| {
        p.as_ref()
            .map(|p| p.public_status.clone())
            .unwrap_or_else(|| "unknown".to_string())
    };
    let description = |p: &Option<crate::agents::CompanyProfile>| {
        p.as_ref()
            .and_then(|p| p.short_description.clone())
            .unwrap_or_else(|| "N/A".to_string())
    };

    format!(
        "{} ({}) vs {} ({})\n\n{}: {}\n{}: {}\n\nIndustry: {} vs {}\nStatus: {} vs {}",
        a.company_name,
        hq(&pa),
        b.company_name,
        hq(&pb),
        a.company_name,
        description(&pa),
        b.company_name,
        description(&pb),
        industry(&pa),
        industry(&pb),
        status(&pa),
        status(&pb),
    )
}

fn opportunity_titles(report: &Report) -> Vec<String> {
    report
        .sections
        .strategy
        .payload()
        .and_then(|p| p.as_strategy())
        .map(|s| s.opportunities.iter().take(3).map(|o| o.title.clone()).collect())
        .unwrap_or_default()
}

fn risk_titles(report: &Report) -> Vec<String> {
    report
        .sections
        .strategy
        .payload()
        .and_then(|p| p.as_strategy())
        .map(|s| s.risks.iter().take(3).map(|r| r.risk.clone()).collect())
        .unwrap_or_default()
}

/// One-line digest of a section for the delta table.
fn side_line(report: &Report, kind: SectionKind) -> Option<String> {
    let payload = report.sections.slot(kind).payload()?;
    let line = match kind {
        SectionKind::Fundamentals => {
            let f = payload.as_fundamentals()?;
            format!(
                "{}, {}",
                f.profile.industry.as_deref().unwrap_or("unknown industry"),
                f.profile.public_status
            )
        }
        SectionKind::Leadership => {
            let l = payload.as_leadership()?;
            format!("{} leaders identified", l.leaders.len())
        }
        SectionKind::News => {
            let n = payload.as_news()?;
            format!(
                "{} items, sentiment {}",
                n.items.len(),
                n.overall_sentiment.as_deref().unwrap_or("unknown")
            )
        }
        SectionKind::TechServices => {
            let t = payload.as_tech_services()?;
            format!(
                "{} offerings, {} stack areas",
                t.products_and_services.len(),
                t.tech_stack.len()
            )
        }
        SectionKind::Strategy => {
            let s = payload.as_strategy()?;
            format!(
                "{} opportunities, {} risks",
                s.opportunities.len(),
                s.risks.len()
            )
        }
        SectionKind::Visualization => {
            let v = payload.as_stock()?;
            if v.points.is_empty() {
                "not publicly traded".to_string()
            } else {
                format!("{} price points", v.points.len())
            }
        }
    };
    Some(line)
}
