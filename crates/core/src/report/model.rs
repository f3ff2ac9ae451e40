//! # Report Model
//!
//! A report is six section slots plus a monotonically increasing version.
//! Each slot tracks the displayed payload (last known-good), the most
//! recent attempt (even when it failed), and any partial result parked
//! for review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::agents::{
    CompanyFundamentals, LeadershipSummary, MarketNewsSummary, PersonaStrategy, StockSeries,
    TechServicesSummary,
};

/// The six structured topic areas of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Fundamentals,
    Leadership,
    News,
    TechServices,
    Strategy,
    Visualization,
}

impl SectionKind {
    pub const ALL: [SectionKind; 6] = [
        SectionKind::Fundamentals,
        SectionKind::Leadership,
        SectionKind::News,
        SectionKind::TechServices,
        SectionKind::Strategy,
        SectionKind::Visualization,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SectionKind::Fundamentals => "fundamentals",
            SectionKind::Leadership => "leadership",
            SectionKind::News => "news",
            SectionKind::TechServices => "tech_services",
            SectionKind::Strategy => "strategy",
            SectionKind::Visualization => "visualization",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome class of a single agent attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Ok,
    Partial,
    Failed,
}

/// Reason string recorded when an agent misses the shared deadline.
pub const TIMEOUT_REASON: &str = "timeout";

/// A single source citation attached to a section result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    pub retrieved_at: DateTime<Utc>,
}

/// Typed payload for one section.
///
/// A closed union so merge and compare stay exhaustive-checkable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "section", rename_all = "snake_case")]
pub enum SectionPayload {
    Fundamentals(CompanyFundamentals),
    Leadership(LeadershipSummary),
    News(MarketNewsSummary),
    TechServices(TechServicesSummary),
    Strategy(PersonaStrategy),
    Visualization(StockSeries),
}

impl SectionPayload {
    pub fn kind(&self) -> SectionKind {
        match self {
            SectionPayload::Fundamentals(_) => SectionKind::Fundamentals,
            SectionPayload::Leadership(_) => SectionKind::Leadership,
            SectionPayload::News(_) => SectionKind::News,
            SectionPayload::TechServices(_) => SectionKind::TechServices,
            SectionPayload::Strategy(_) => SectionKind::Strategy,
            SectionPayload::Visualization(_) => SectionKind::Visualization,
        }
    }

    pub fn as_fundamentals(&self) -> Option<&CompanyFundamentals> {
        match self {
            SectionPayload::Fundamentals(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_leadership(&self) -> Option<&LeadershipSummary> {
        match self {
            SectionPayload::Leadership(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_news(&self) -> Option<&MarketNewsSummary> {
        match self {
            SectionPayload::News(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_tech_services(&self) -> Option<&TechServicesSummary> {
        match self {
            SectionPayload::TechServices(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_strategy(&self) -> Option<&PersonaStrategy> {
        match self {
            SectionPayload::Strategy(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_stock(&self) -> Option<&StockSeries> {
        match self {
            SectionPayload::Visualization(s) => Some(s),
            _ => None,
        }
    }
}

/// What one agent attempt yielded for one section.
///
/// Invariants (held by the constructors): `failed` carries no payload
/// and always a reason; `partial` carries a best-effort payload plus a
/// reason for incompleteness; `ok` carries a payload and no reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionResult {
    pub kind: SectionKind,
    pub status: SectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<SectionPayload>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    /// Failure reason for `failed`, incompleteness reason for `partial`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl SectionResult {
    pub fn ok(payload: SectionPayload, citations: Vec<Citation>) -> Self {
        Self {
            kind: payload.kind(),
            status: SectionStatus::Ok,
            payload: Some(payload),
            citations,
            error: None,
            generated_at: Utc::now(),
        }
    }

    pub fn partial(payload: SectionPayload, reason: impl Into<String>) -> Self {
        Self {
            kind: payload.kind(),
            status: SectionStatus::Partial,
            payload: Some(payload),
            citations: Vec::new(),
            error: Some(reason.into()),
            generated_at: Utc::now(),
        }
    }

    pub fn failed(kind: SectionKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            status: SectionStatus::Failed,
            payload: None,
            citations: Vec::new(),
            error: Some(reason.into()),
            generated_at: Utc::now(),
        }
    }

    /// Failure produced when an agent misses the shared run deadline.
    pub fn timed_out(kind: SectionKind) -> Self {
        Self::failed(kind, TIMEOUT_REASON)
    }

    pub fn is_ok(&self) -> bool {
        self.status == SectionStatus::Ok
    }

    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }
}

/// Record of the most recent attempt against a slot, kept even when the
/// attempt did not change the displayed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub status: SectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl From<&SectionResult> for AttemptRecord {
    fn from(result: &SectionResult) -> Self {
        Self {
            status: result.status,
            reason: result.error.clone(),
            at: result.generated_at,
        }
    }
}

/// Where a displayed section came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionOrigin {
    #[default]
    Research,
    Chat,
}

/// One of the six slots of a report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionSlot {
    /// Displayed payload: the last known-good result for this section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<SectionResult>,
    /// Most recent attempt, which may have failed without touching `current`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<AttemptRecord>,
    /// Best-effort result held for review; never merged automatically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<SectionResult>,
    #[serde(default)]
    pub origin: SectionOrigin,
}

impl SectionSlot {
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.last_attempt.is_none() && self.pending.is_none()
    }

    /// Payload currently shown for this slot, if any.
    pub fn payload(&self) -> Option<&SectionPayload> {
        self.current.as_ref().and_then(|r| r.payload.as_ref())
    }
}

/// All six slots, addressable by kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSections {
    #[serde(default)]
    pub fundamentals: SectionSlot,
    #[serde(default)]
    pub leadership: SectionSlot,
    #[serde(default)]
    pub news: SectionSlot,
    #[serde(default)]
    pub tech_services: SectionSlot,
    #[serde(default)]
    pub strategy: SectionSlot,
    #[serde(default)]
    pub visualization: SectionSlot,
}

impl ReportSections {
    pub fn slot(&self, kind: SectionKind) -> &SectionSlot {
        match kind {
            SectionKind::Fundamentals => &self.fundamentals,
            SectionKind::Leadership => &self.leadership,
            SectionKind::News => &self.news,
            SectionKind::TechServices => &self.tech_services,
            SectionKind::Strategy => &self.strategy,
            SectionKind::Visualization => &self.visualization,
        }
    }

    pub fn slot_mut(&mut self, kind: SectionKind) -> &mut SectionSlot {
        match kind {
            SectionKind::Fundamentals => &mut self.fundamentals,
            SectionKind::Leadership => &mut self.leadership,
            SectionKind::News => &mut self.news,
            SectionKind::TechServices => &mut self.tech_services,
            SectionKind::Strategy => &mut self.strategy,
            SectionKind::Visualization => &mut self.visualization,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (SectionKind, &SectionSlot)> {
        SectionKind::ALL.iter().map(move |k| (*k, self.slot(*k)))
    }
}

/// A versioned account plan owned by one (user, persona, company_key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub user_id: String,
    pub persona_id: String,
    pub company_key: String,
    pub company_name: String,
    /// Increases by exactly 1 on every persisted mutation.
    pub version: u64,
    pub sections: ReportSections,
    pub updated_at: DateTime<Utc>,
    /// Set when a finished run could not be persisted; the payload is
    /// still valid, the repository just never accepted it.
    #[serde(skip)]
    pub unsaved: bool,
}

impl Report {
    /// A version-0 shell; the first merge produces version 1.
    pub fn empty(
        user_id: impl Into<String>,
        persona_id: impl Into<String>,
        company_key: impl Into<String>,
        company_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            persona_id: persona_id.into(),
            company_key: company_key.into(),
            company_name: company_name.into(),
            version: 0,
            sections: ReportSections::default(),
            updated_at: Utc::now(),
            unsaved: false,
        }
    }

    /// Slots with a displayed payload.
    pub fn current_section_count(&self) -> usize {
        self.sections.iter().filter(|(_, s)| s.current.is_some()).count()
    }

    /// Slots with nothing to display; used as the compare tie-breaker
    /// (more complete data wins).
    pub fn incomplete_section_count(&self) -> usize {
        self.sections.iter().filter(|(_, s)| s.current.is_none()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::LeadershipSummary;

    fn leadership_payload() -> SectionPayload {
        SectionPayload::Leadership(LeadershipSummary {
            company_name: "Stripe".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_failed_result_has_reason_and_no_payload() {
        let result = SectionResult::failed(SectionKind::News, "provider unreachable");
        assert_eq!(result.status, SectionStatus::Failed);
        assert!(result.payload.is_none());
        assert_eq!(result.error.as_deref(), Some("provider unreachable"));
    }

    #[test]
    fn test_partial_result_keeps_payload_and_reason() {
        let result = SectionResult::partial(leadership_payload(), "no leaders identified");
        assert_eq!(result.status, SectionStatus::Partial);
        assert!(result.payload.is_some());
        assert!(result.error.is_some());
    }

    #[test]
    fn test_ok_result_kind_comes_from_payload() {
        let result = SectionResult::ok(leadership_payload(), Vec::new());
        assert_eq!(result.kind, SectionKind::Leadership);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_timed_out_uses_timeout_reason() {
        let result = SectionResult::timed_out(SectionKind::News);
        assert_eq!(result.error.as_deref(), Some(TIMEOUT_REASON));
    }

    #[test]
    fn test_section_kind_serialization() {
        let json = serde_json::to_string(&SectionKind::TechServices).unwrap();
        assert_eq!(json, "\"tech_services\"");
    }

    #[test]
    fn test_report_roundtrip() {
        let mut report = Report::empty("u1", "p1", "stripe", "Stripe");
        report.sections.leadership.current = Some(SectionResult::ok(leadership_payload(), vec![]));
        report.version = 3;

        let json = serde_json::to_string(&report).unwrap();
        let parsed: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.version, 3);
        assert_eq!(parsed.current_section_count(), 1);
        assert_eq!(parsed.incomplete_section_count(), 5);
        assert!(!parsed.unsaved);
    }
}
