//! # Account Memory
//!
//! Append-only facts scoped to (user, persona). Orchestrators write a
//! handful of derived facts per run and every chat turn; corrections
//! are new facts that supersede by recency, never in-place edits.

pub mod sqlite_store;

pub use sqlite_store::SqliteMemoryStore;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a fact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactSource {
    Research,
    Chat,
}

impl FactSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactSource::Research => "research",
            FactSource::Chat => "chat",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "chat" => FactSource::Chat,
            _ => FactSource::Research,
        }
    }
}

/// An atomic statement about an account, as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFact {
    pub id: i64,
    pub user_id: String,
    pub persona_id: String,
    pub statement: String,
    pub source: FactSource,
    pub created_at: DateTime<Utc>,
}

/// A fact not yet persisted.
#[derive(Debug, Clone)]
pub struct NewFact {
    pub user_id: String,
    pub persona_id: String,
    pub statement: String,
    pub source: FactSource,
}

impl NewFact {
    pub fn research(
        user_id: impl Into<String>,
        persona_id: impl Into<String>,
        statement: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            persona_id: persona_id.into(),
            statement: statement.into(),
            source: FactSource::Research,
        }
    }

    pub fn chat(
        user_id: impl Into<String>,
        persona_id: impl Into<String>,
        statement: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            persona_id: persona_id.into(),
            statement: statement.into(),
            source: FactSource::Chat,
        }
    }
}

/// The memory store adapter used by all three orchestrators.
///
/// `search` is relevance-ranked, finite, and restartable; appends are
/// commutative so no locking is required around them.
pub trait MemoryStore: Send + Sync {
    fn add(&self, fact: NewFact) -> Result<i64>;

    fn search(
        &self,
        user_id: &str,
        persona_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryFact>>;

    fn recent(&self, user_id: &str, persona_id: &str, limit: usize) -> Result<Vec<MemoryFact>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_source_roundtrip() {
        assert_eq!(FactSource::from_str("chat"), FactSource::Chat);
        assert_eq!(FactSource::from_str("research"), FactSource::Research);
        assert_eq!(FactSource::from_str("unknown"), FactSource::Research);
        assert_eq!(FactSource::Chat.as_str(), "chat");
    }
}
