//! # Compare Sessions
//!
//! Immutable records of a two-company comparison: which report versions
//! were compared, the derived payload, and the recommendation. A new
//! comparison supersedes an old one by existing, never by mutation.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use super::db::{new_row_id, parse_timestamp, DossierDb};
use crate::report::{Report, SectionKind};

/// One aligned section pair in a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionDelta {
    pub kind: SectionKind,
    #[serde(default)]
    pub company_a: Option<String>,
    #[serde(default)]
    pub company_b: Option<String>,
}

/// Parallel bullet lists, one side per company.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideBySide {
    pub company_a: Vec<String>,
    pub company_b: Vec<String>,
}

/// Which precedence rule decided the recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationBasis {
    GoalAlignment,
    OpportunitySurface,
    RiskSurface,
    DataCompleteness,
}

/// The recommended company and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub company_key: String,
    pub company_name: String,
    pub basis: RecommendationBasis,
    pub reason: String,
}

/// Derived comparison between two reports. Pure data; the derivation
/// lives in the compare orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonPayload {
    pub summary: String,
    pub section_deltas: Vec<SectionDelta>,
    pub opportunities: SideBySide,
    pub risks: SideBySide,
    pub recommendation: Recommendation,
}

/// A persisted comparison, immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareSession {
    pub id: String,
    pub user_id: String,
    pub persona_id: String,
    pub company_a_key: String,
    pub company_b_key: String,
    pub report_a_version: u64,
    pub report_b_version: u64,
    pub comparison: ComparisonPayload,
    pub created_at: DateTime<Utc>,
}

/// Manager for compare session storage in SQLite
pub struct CompareSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl CompareSessionStore {
    pub fn new(db: &DossierDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Persist a new comparison against the report versions it used.
    pub fn create(
        &self,
        user_id: &str,
        persona_id: &str,
        report_a: &Report,
        report_b: &Report,
        comparison: ComparisonPayload,
    ) -> Result<CompareSession> {
        let session = CompareSession {
            id: new_row_id("cmp"),
            user_id: user_id.to_string(),
            persona_id: persona_id.to_string(),
            company_a_key: report_a.company_key.clone(),
            company_b_key: report_b.company_key.clone(),
            report_a_version: report_a.version,
            report_b_version: report_b.version,
            comparison,
            created_at: Utc::now(),
        };

        let recommendation = format!(
            "{}: {}",
            session.comparison.recommendation.company_name,
            session.comparison.recommendation.reason
        );
        let json = serde_json::to_string(&session.comparison)
            .context("Failed to serialize comparison")?;

        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            INSERT INTO compare_sessions
                (id, user_id, persona_id, company_a_key, company_b_key,
                 report_a_version, report_b_version, comparison_json, recommendation, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                session.id,
                session.user_id,
                session.persona_id,
                session.company_a_key,
                session.company_b_key,
                session.report_a_version as i64,
                session.report_b_version as i64,
                json,
                recommendation,
                session.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert compare session")?;

        Ok(session)
    }

    /// Fetch a session by id
    pub fn get(&self, session_id: &str) -> Result<Option<CompareSession>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, user_id, persona_id, company_a_key, company_b_key,
                   report_a_version, report_b_version, comparison_json, created_at
            FROM compare_sessions WHERE id = ?1
            "#,
        )?;
        let mut rows = stmt.query_map(params![session_id], row_to_session)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All sessions for a persona, newest first
    pub fn list_for_persona(&self, user_id: &str, persona_id: &str) -> Result<Vec<CompareSession>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, user_id, persona_id, company_a_key, company_b_key,
                   report_a_version, report_b_version, comparison_json, created_at
            FROM compare_sessions
            WHERE user_id = ?1 AND persona_id = ?2
            ORDER BY created_at DESC
            "#,
        )?;
        let rows = stmt
            .query_map(params![user_id, persona_id], row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to list compare sessions")?;

        Ok(rows)
    }
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<CompareSession> {
    let json: String = row.get(7)?;
    let comparison: ComparisonPayload = serde_json::from_str(&json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let created_at: String = row.get(8)?;
    Ok(CompareSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        persona_id: row.get(2)?,
        company_a_key: row.get(3)?,
        company_b_key: row.get(4)?,
        report_a_version: row.get::<_, i64>(5)? as u64,
        report_b_version: row.get::<_, i64>(6)? as u64,
        comparison,
        created_at: parse_timestamp(&created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Report;
    use std::fs;

    fn payload(winner: &str) -> ComparisonPayload {
        ComparisonPayload {
            summary: "A vs B".to_string(),
            section_deltas: Vec::new(),
            opportunities: SideBySide::default(),
            risks: SideBySide::default(),
            recommendation: Recommendation {
                company_key: winner.to_lowercase(),
                company_name: winner.to_string(),
                basis: RecommendationBasis::OpportunitySurface,
                reason: "more opportunities".to_string(),
            },
        }
    }

    #[test]
    fn test_create_and_get_roundtrip() {
        let path = ".dossier/test_compare_roundtrip.db";
        let _ = fs::remove_file(path);
        let db = DossierDb::open_at(path).unwrap();
        let store = CompareSessionStore::new(&db);

        let mut a = Report::empty("u1", "p1", "stripe", "Stripe");
        a.version = 3;
        let mut b = Report::empty("u1", "p1", "razorpay", "Razorpay");
        b.version = 1;

        let session = store.create("u1", "p1", &a, &b, payload("Stripe")).unwrap();

        let fetched = store.get(&session.id).unwrap().unwrap();
        assert_eq!(fetched.company_a_key, "stripe");
        assert_eq!(fetched.report_a_version, 3);
        assert_eq!(fetched.report_b_version, 1);
        assert_eq!(fetched.comparison, session.comparison);

        let listed = store.list_for_persona("u1", "p1").unwrap();
        assert_eq!(listed.len(), 1);

        let _ = fs::remove_file(path);
    }
}
