//! # Report Merge
//!
//! Aggregation rules for folding fresh section results into the prior
//! report. The core rule: a working section is never regressed to empty
//! by a transient failure.

use chrono::Utc;

use super::model::{
    AttemptRecord, Report, SectionKind, SectionOrigin, SectionPayload, SectionResult,
    SectionSlot, SectionStatus,
};
use crate::agents::{NextStepItem, OpportunityItem, RiskItem};

/// Ownership triple plus display name for the report being merged.
#[derive(Debug, Clone)]
pub struct ReportIdentity {
    pub user_id: String,
    pub persona_id: String,
    pub company_key: String,
    pub company_name: String,
}

/// Fold one attempt into a slot.
///
/// - `ok` replaces the displayed payload - unless the slot holds a manual
///   chat edit, in which case the fresh result parks in `pending` so the
///   edit is not silently overwritten.
/// - `partial` fills an empty slot, otherwise parks in `pending`.
/// - `failed` only records the attempt; the displayed payload stays.
pub fn apply_attempt(slot: &mut SectionSlot, fresh: SectionResult) {
    slot.last_attempt = Some(AttemptRecord::from(&fresh));
    match fresh.status {
        SectionStatus::Ok => {
            if slot.origin == SectionOrigin::Chat && slot.current.is_some() {
                slot.pending = Some(fresh);
            } else {
                slot.current = Some(fresh);
                slot.pending = None;
                slot.origin = SectionOrigin::Research;
            }
        }
        SectionStatus::Partial => {
            if slot.current.is_none() {
                slot.current = Some(fresh);
                slot.origin = SectionOrigin::Research;
            } else {
                slot.pending = Some(fresh);
            }
        }
        SectionStatus::Failed => {}
    }
}

/// Merge a finished fan-out into the next report version.
///
/// Starts from the prior report when one exists, applies every fresh
/// result, and bumps the version by exactly 1. The result is a candidate;
/// the repository's optimistic check decides whether it lands.
pub fn merge_run(
    prior: Option<&Report>,
    identity: &ReportIdentity,
    fresh: &[SectionResult],
) -> Report {
    let mut report = match prior {
        Some(p) => p.clone(),
        None => Report::empty(
            identity.user_id.clone(),
            identity.persona_id.clone(),
            identity.company_key.clone(),
            identity.company_name.clone(),
        ),
    };

    for result in fresh {
        apply_attempt(report.sections.slot_mut(result.kind), result.clone());
    }

    report.company_name = identity.company_name.clone();
    report.version += 1;
    report.updated_at = Utc::now();
    report.unsaved = false;
    report
}

/// Strategy subfield a chat edit overwrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditTarget {
    Risks,
    Opportunities,
    NextSteps,
    WhyItMatters,
}

impl EditTarget {
    pub fn label(&self) -> &'static str {
        match self {
            EditTarget::Risks => "risks",
            EditTarget::Opportunities => "opportunities",
            EditTarget::NextSteps => "next steps",
            EditTarget::WhyItMatters => "why it matters",
        }
    }
}

/// A destructive edit requested from chat, applied without agent calls.
#[derive(Debug, Clone)]
pub struct SectionEdit {
    pub target: EditTarget,
    pub text: String,
}

/// Overwrite one strategy subfield in place and bump the version.
///
/// The slot is tagged `chat` so the next research pass treats the manual
/// content as authoritative context instead of silently replacing it.
pub fn apply_chat_edit(report: &mut Report, edit: &SectionEdit) {
    let slot = report.sections.slot_mut(SectionKind::Strategy);
    let mut strategy = slot
        .payload()
        .and_then(|p| p.as_strategy())
        .cloned()
        .unwrap_or_default();

    match edit.target {
        EditTarget::Risks => {
            strategy.risks = vec![RiskItem {
                risk: edit.text.clone(),
                impact: "Set by manual edit".to_string(),
                mitigation: None,
            }];
        }
        EditTarget::Opportunities => {
            strategy.opportunities = vec![OpportunityItem {
                title: edit.text.clone(),
                description: "Set by manual edit".to_string(),
                evidence: Vec::new(),
            }];
        }
        EditTarget::NextSteps => {
            strategy.next_steps = vec![NextStepItem {
                action: edit.text.clone(),
                owner: None,
                timeframe: None,
            }];
        }
        EditTarget::WhyItMatters => {
            strategy.why_it_matters = edit.text.clone();
        }
    }

    let result = SectionResult::ok(SectionPayload::Strategy(strategy), Vec::new());
    slot.last_attempt = Some(AttemptRecord::from(&result));
    slot.current = Some(result);
    slot.pending = None;
    slot.origin = SectionOrigin::Chat;

    report.version += 1;
    report.updated_at = Utc::now();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{LeadershipSummary, PersonaStrategy};
    use crate::report::model::TIMEOUT_REASON;

    fn identity() -> ReportIdentity {
        ReportIdentity {
            user_id: "u1".to_string(),
            persona_id: "p1".to_string(),
            company_key: "stripe".to_string(),
            company_name: "Stripe".to_string(),
        }
    }

    fn leadership_ok(note: &str) -> SectionResult {
        SectionResult::ok(
            SectionPayload::Leadership(LeadershipSummary {
                company_name: "Stripe".to_string(),
                notes: Some(note.to_string()),
                ..Default::default()
            }),
            Vec::new(),
        )
    }

    #[test]
    fn test_ok_replaces_displayed_payload() {
        let mut slot = SectionSlot::default();
        apply_attempt(&mut slot, leadership_ok("first"));
        apply_attempt(&mut slot, leadership_ok("second"));

        let notes = slot
            .payload()
            .and_then(|p| p.as_leadership())
            .and_then(|l| l.notes.clone());
        assert_eq!(notes.as_deref(), Some("second"));
        assert!(slot.pending.is_none());
    }

    #[test]
    fn test_failed_attempt_retains_prior_payload() {
        let mut slot = SectionSlot::default();
        apply_attempt(&mut slot, leadership_ok("good"));
        apply_attempt(&mut slot, SectionResult::timed_out(SectionKind::Leadership));

        assert!(slot.current.is_some(), "working section must not regress");
        let attempt = slot.last_attempt.as_ref().unwrap();
        assert_eq!(attempt.status, SectionStatus::Failed);
        assert_eq!(attempt.reason.as_deref(), Some(TIMEOUT_REASON));
    }

    #[test]
    fn test_partial_parks_in_pending_when_current_exists() {
        let mut slot = SectionSlot::default();
        apply_attempt(&mut slot, leadership_ok("good"));

        let partial = SectionResult::partial(
            SectionPayload::Leadership(LeadershipSummary::default()),
            "no leaders identified",
        );
        apply_attempt(&mut slot, partial);

        let notes = slot
            .payload()
            .and_then(|p| p.as_leadership())
            .and_then(|l| l.notes.clone());
        assert_eq!(notes.as_deref(), Some("good"));
        assert!(slot.pending.is_some());
    }

    #[test]
    fn test_partial_fills_empty_slot() {
        let mut slot = SectionSlot::default();
        let partial = SectionResult::partial(
            SectionPayload::Leadership(LeadershipSummary::default()),
            "no leaders identified",
        );
        apply_attempt(&mut slot, partial);
        assert!(slot.current.is_some());
        assert!(slot.pending.is_none());
    }

    #[test]
    fn test_chat_origin_protected_from_silent_overwrite() {
        let mut report = merge_run(None, &identity(), &[]);
        apply_chat_edit(
            &mut report,
            &SectionEdit {
                target: EditTarget::Risks,
                text: "Focus on fraud surface on BNPL".to_string(),
            },
        );

        let fresh_strategy = SectionResult::ok(
            SectionPayload::Strategy(PersonaStrategy {
                why_it_matters: "fresh research".to_string(),
                ..Default::default()
            }),
            Vec::new(),
        );
        let slot = report.sections.slot_mut(SectionKind::Strategy);
        apply_attempt(slot, fresh_strategy);

        let risks = slot
            .payload()
            .and_then(|p| p.as_strategy())
            .map(|s| s.risks.clone())
            .unwrap();
        assert_eq!(risks[0].risk, "Focus on fraud surface on BNPL");
        assert!(slot.pending.is_some(), "fresh result waits for review");
        assert_eq!(slot.origin, SectionOrigin::Chat);
    }

    #[test]
    fn test_merge_run_increments_version_by_one() {
        let v1 = merge_run(None, &identity(), &[leadership_ok("a")]);
        assert_eq!(v1.version, 1);

        let v2 = merge_run(Some(&v1), &identity(), &[leadership_ok("b")]);
        assert_eq!(v2.version, 2);
        assert_eq!(v2.current_section_count(), 1);
    }

    #[test]
    fn test_chat_edit_bumps_version_and_tags_origin() {
        let mut report = merge_run(None, &identity(), &[]);
        let before = report.version;
        apply_chat_edit(
            &mut report,
            &SectionEdit {
                target: EditTarget::WhyItMatters,
                text: "Strategic account for the fraud team".to_string(),
            },
        );

        assert_eq!(report.version, before + 1);
        let slot = report.sections.slot(SectionKind::Strategy);
        assert_eq!(slot.origin, SectionOrigin::Chat);
        let why = slot
            .payload()
            .and_then(|p| p.as_strategy())
            .map(|s| s.why_it_matters.clone())
            .unwrap();
        assert_eq!(why, "Strategic account for the fraud team");
    }
}
