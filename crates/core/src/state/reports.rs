//! # Report Repository
//!
//! Versioned report rows keyed by (user, persona, company_key). Saves
//! are optimistic: a write based on a stale version is rejected so
//! concurrent runs for the same account can never clobber each other.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::db::{parse_timestamp, DossierDb};
use crate::report::Report;

/// Why a save was refused.
#[derive(Debug, Error)]
pub enum SaveError {
    /// The expected version is stale; another writer persisted first.
    #[error("stale version: repository already holds version {latest}")]
    Conflict { latest: u64 },
    /// The store itself failed; fatal to the save step only.
    #[error("report store unavailable: {0}")]
    Storage(String),
}

/// Summary of one company's latest report, used to resolve which
/// account a chat message is about.
#[derive(Debug, Clone, Serialize)]
pub struct CompanyRef {
    pub company_key: String,
    pub company_name: String,
    pub latest_version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Durable home of reports.
pub trait ReportRepository: Send + Sync {
    fn get_latest(
        &self,
        user_id: &str,
        persona_id: &str,
        company_key: &str,
    ) -> Result<Option<Report>>;

    /// Persist `report` as version `expected_version + 1`. Fails with
    /// [`SaveError::Conflict`] when the repository has moved past
    /// `expected_version` in the meantime.
    fn save(&self, report: &Report, expected_version: u64) -> std::result::Result<Report, SaveError>;

    /// Companies this persona has reports for, most recently updated first.
    fn list_companies(&self, user_id: &str, persona_id: &str) -> Result<Vec<CompanyRef>>;
}

/// SQLite-backed repository over the shared DossierDb connection.
pub struct SqliteReportRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteReportRepository {
    pub fn new(db: &DossierDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }
}

impl ReportRepository for SqliteReportRepository {
    fn get_latest(
        &self,
        user_id: &str,
        persona_id: &str,
        company_key: &str,
    ) -> Result<Option<Report>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT report_json FROM reports
            WHERE user_id = ?1 AND persona_id = ?2 AND company_key = ?3
            ORDER BY version DESC
            LIMIT 1
            "#,
        )?;
        let mut rows = stmt.query_map(params![user_id, persona_id, company_key], |row| {
            row.get::<_, String>(0)
        })?;

        match rows.next() {
            Some(json) => {
                let report: Report =
                    serde_json::from_str(&json?).context("Failed to parse stored report")?;
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    fn save(
        &self,
        report: &Report,
        expected_version: u64,
    ) -> std::result::Result<Report, SaveError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| SaveError::Storage(format!("Lock error: {}", e)))?;

        let tx = conn
            .transaction()
            .map_err(|e| SaveError::Storage(e.to_string()))?;

        let latest: u64 = tx
            .query_row(
                r#"
                SELECT COALESCE(MAX(version), 0) FROM reports
                WHERE user_id = ?1 AND persona_id = ?2 AND company_key = ?3
                "#,
                params![report.user_id, report.persona_id, report.company_key],
                |row| row.get::<_, i64>(0),
            )
            .map(|v| v as u64)
            .map_err(|e| SaveError::Storage(e.to_string()))?;

        if latest != expected_version {
            return Err(SaveError::Conflict { latest });
        }

        let mut stored = report.clone();
        stored.version = expected_version + 1;
        stored.unsaved = false;

        let json = serde_json::to_string(&stored).map_err(|e| SaveError::Storage(e.to_string()))?;

        tx.execute(
            r#"
            INSERT INTO reports (user_id, persona_id, company_key, company_name, version, report_json, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                stored.user_id,
                stored.persona_id,
                stored.company_key,
                stored.company_name,
                stored.version as i64,
                json,
                stored.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| SaveError::Storage(e.to_string()))?;

        tx.commit().map_err(|e| SaveError::Storage(e.to_string()))?;

        Ok(stored)
    }

    fn list_companies(&self, user_id: &str, persona_id: &str) -> Result<Vec<CompanyRef>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        // SQLite resolves the bare columns against the MAX(version) row.
        let mut stmt = conn.prepare(
            r#"
            SELECT company_key, company_name, MAX(version), updated_at
            FROM reports
            WHERE user_id = ?1 AND persona_id = ?2
            GROUP BY company_key
            ORDER BY updated_at DESC
            "#,
        )?;
        let rows = stmt
            .query_map(params![user_id, persona_id], |row| {
                let updated_at: String = row.get(3)?;
                Ok(CompanyRef {
                    company_key: row.get(0)?,
                    company_name: row.get(1)?,
                    latest_version: row.get::<_, i64>(2)? as u64,
                    updated_at: parse_timestamp(&updated_at),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to list companies")?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn open(path: &str) -> DossierDb {
        let _ = fs::remove_file(path);
        DossierDb::open_at(path).unwrap()
    }

    fn report(version: u64, company: &str) -> Report {
        let mut r = Report::empty("u1", "p1", crate::company::company_key(company), company);
        r.version = version;
        r
    }

    #[test]
    fn test_save_then_get_latest_roundtrip() {
        let path = ".dossier/test_reports_roundtrip.db";
        let db = open(path);
        let repo = SqliteReportRepository::new(&db);

        assert!(repo.get_latest("u1", "p1", "stripe").unwrap().is_none());

        let stored = repo.save(&report(1, "Stripe"), 0).unwrap();
        assert_eq!(stored.version, 1);

        let latest = repo.get_latest("u1", "p1", "stripe").unwrap().unwrap();
        assert_eq!(latest.version, 1);
        assert_eq!(latest.company_name, "Stripe");

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_versions_increase_by_one() {
        let path = ".dossier/test_reports_versions.db";
        let db = open(path);
        let repo = SqliteReportRepository::new(&db);

        let v1 = repo.save(&report(1, "Stripe"), 0).unwrap();
        let v2 = repo.save(&v1, v1.version).unwrap();
        let v3 = repo.save(&v2, v2.version).unwrap();
        assert_eq!((v1.version, v2.version, v3.version), (1, 2, 3));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_stale_expected_version_conflicts() {
        let path = ".dossier/test_reports_conflict.db";
        let db = open(path);
        let repo = SqliteReportRepository::new(&db);

        repo.save(&report(1, "Stripe"), 0).unwrap();
        repo.save(&report(2, "Stripe"), 1).unwrap();

        // A writer that loaded version 1 must be rejected, never
        // silently overwrite.
        match repo.save(&report(2, "Stripe"), 1) {
            Err(SaveError::Conflict { latest }) => assert_eq!(latest, 2),
            other => panic!("expected conflict, got {:?}", other.map(|r| r.version)),
        }

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_list_companies_newest_first() {
        let path = ".dossier/test_reports_companies.db";
        let db = open(path);
        let repo = SqliteReportRepository::new(&db);

        repo.save(&report(1, "Stripe"), 0).unwrap();
        repo.save(&report(1, "Razorpay"), 0).unwrap();

        let companies = repo.list_companies("u1", "p1").unwrap();
        assert_eq!(companies.len(), 2);
        assert!(companies.iter().any(|c| c.company_key == "stripe"));
        assert!(companies.iter().any(|c| c.company_key == "razorpay"));

        let _ = fs::remove_file(path);
    }
}
