//! # Run Events
//!
//! Progress events emitted while a research run is in flight, consumed
//! by the server's SSE feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::report::SectionKind;

/// Kind of run event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResearchEventKind {
    /// A research run started
    RunStarted,
    /// One section agent was dispatched
    AgentStarted,
    /// One section agent returned ok/partial
    AgentCompleted,
    /// One section agent failed or timed out
    AgentFailed,
    /// Fresh results were merged into a candidate report
    ReportMerged,
    /// The candidate was persisted
    ReportSaved,
    /// Optimistic save hit a newer version; re-merging
    SaveConflict,
    /// The run finished (report returned to the caller)
    RunCompleted,
    /// The run was cancelled before the join point
    RunCancelled,
}

/// An event in a research run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchEvent {
    /// Unique event ID
    pub id: String,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Kind of event
    pub kind: ResearchEventKind,
    /// Company the run is about
    pub company_key: String,
    /// Related section if applicable
    #[serde(default)]
    pub section: Option<SectionKind>,
    /// Associated data (JSON)
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl ResearchEvent {
    /// Create a new event
    pub fn new(kind: ResearchEventKind, company_key: &str) -> Self {
        Self {
            id: event_id(),
            timestamp: Utc::now(),
            kind,
            company_key: company_key.to_string(),
            section: None,
            data: None,
        }
    }

    /// Add the section this event concerns
    pub fn with_section(mut self, section: SectionKind) -> Self {
        self.section = Some(section);
        self
    }

    /// Add data to the event
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Generate a simple unique event id
fn event_id() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    let salt = RandomState::new().build_hasher().finish() as u32;
    format!("{:x}-{:x}", nanos, salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = ResearchEvent::new(ResearchEventKind::AgentStarted, "stripe")
            .with_section(SectionKind::News);

        assert_eq!(event.company_key, "stripe");
        assert_eq!(event.section, Some(SectionKind::News));
    }

    #[test]
    fn test_event_serialization() {
        let event = ResearchEvent::new(ResearchEventKind::AgentFailed, "stripe")
            .with_section(SectionKind::News)
            .with_data(serde_json::json!({ "reason": "timeout" }));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"agent_failed\""));
        assert!(json.contains("\"news\""));
        assert!(json.contains("timeout"));
    }
}
