//! # SQLite Memory Store
//!
//! Keyword-ranked fact retrieval over the shared DossierDb connection.
//! Ranking is term-hit count, recency as tie-break. Good enough for
//! account-scoped volumes; a vector index can slot in behind the same
//! trait later.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

use super::{FactSource, MemoryFact, MemoryStore, NewFact};
use crate::state::db::{parse_timestamp, DossierDb};

/// How many recent rows the ranker scans per search.
const SCAN_WINDOW: usize = 200;

pub struct SqliteMemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMemoryStore {
    pub fn new(db: &DossierDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    fn recent_window(
        &self,
        user_id: &str,
        persona_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryFact>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, user_id, persona_id, statement, source, created_at
            FROM memories
            WHERE user_id = ?1 AND persona_id = ?2
            ORDER BY id DESC
            LIMIT ?3
            "#,
        )?;

        let facts = stmt
            .query_map(params![user_id, persona_id, limit as i64], |row| {
                let source: String = row.get(4)?;
                let created_at: String = row.get(5)?;
                Ok(MemoryFact {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    persona_id: row.get(2)?,
                    statement: row.get(3)?,
                    source: FactSource::from_str(&source),
                    created_at: parse_timestamp(&created_at),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to collect memory facts")?;

        Ok(facts)
    }
}

impl MemoryStore for SqliteMemoryStore {
    fn add(&self, fact: NewFact) -> Result<i64> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            INSERT INTO memories (user_id, persona_id, statement, source, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                fact.user_id,
                fact.persona_id,
                fact.statement,
                fact.source.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to insert memory fact")?;

        Ok(conn.last_insert_rowid())
    }

    fn search(
        &self,
        user_id: &str,
        persona_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryFact>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return self.recent(user_id, persona_id, limit);
        }

        let window = self.recent_window(user_id, persona_id, SCAN_WINDOW)?;
        let mut scored: Vec<(usize, MemoryFact)> = window
            .into_iter()
            .filter_map(|fact| {
                let score = relevance(&fact.statement, &terms);
                (score > 0).then_some((score, fact))
            })
            .collect();

        // Highest score first; the window is already newest-first, so
        // equal scores keep recency order.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(limit).map(|(_, f)| f).collect())
    }

    fn recent(&self, user_id: &str, persona_id: &str, limit: usize) -> Result<Vec<MemoryFact>> {
        self.recent_window(user_id, persona_id, limit)
    }
}

/// Lowercased search terms worth matching on.
fn query_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_string())
        .collect()
}

/// Number of query terms appearing in the statement.
fn relevance(statement: &str, terms: &[String]) -> usize {
    let lowered = statement.to_lowercase();
    terms.iter().filter(|t| lowered.contains(t.as_str())).count()
}
