//! # Persona Management
//!
//! Personas are the immutable identity key for every downstream lookup.
//! They change only through explicit edit, and deleting one removes its
//! reports, compare sessions, and memories.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use super::db::{new_row_id, parse_timestamp, DossierDb};

/// A B2B sales persona owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a persona.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonaDraft {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Explicit persona edit; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonaUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Manager for persona storage in SQLite
pub struct PersonaManager {
    conn: Arc<Mutex<Connection>>,
}

impl PersonaManager {
    /// Create a new PersonaManager from a DossierDb
    pub fn new(db: &DossierDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Create a new persona for a user
    pub fn create(&self, user_id: &str, draft: PersonaDraft) -> Result<Persona> {
        if draft.name.trim().is_empty() {
            anyhow::bail!("persona name must not be empty");
        }

        let now = Utc::now();
        let persona = Persona {
            id: new_row_id("per"),
            user_id: user_id.to_string(),
            name: draft.name.trim().to_string(),
            role: draft.role,
            company: draft.company,
            region: draft.region,
            goal: draft.goal,
            notes: draft.notes,
            created_at: now,
            updated_at: now,
        };

        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            INSERT INTO personas (id, user_id, name, role, company, region, goal, notes, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                persona.id,
                persona.user_id,
                persona.name,
                persona.role,
                persona.company,
                persona.region,
                persona.goal,
                persona.notes,
                persona.created_at.to_rfc3339(),
                persona.updated_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert persona")?;

        Ok(persona)
    }

    /// Fetch a persona by id
    pub fn get(&self, persona_id: &str) -> Result<Option<Persona>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, role, company, region, goal, notes, created_at, updated_at
             FROM personas WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![persona_id], row_to_persona)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// List all personas for a user, newest first
    pub fn list(&self, user_id: &str) -> Result<Vec<Persona>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, role, company, region, goal, notes, created_at, updated_at
             FROM personas WHERE user_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id], row_to_persona)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to list personas")?;

        Ok(rows)
    }

    /// Apply an explicit persona edit
    pub fn update(&self, persona_id: &str, update: PersonaUpdate) -> Result<Persona> {
        let mut persona = self
            .get(persona_id)?
            .with_context(|| format!("Persona '{}' not found", persona_id))?;

        if let Some(name) = update.name {
            persona.name = name;
        }
        if update.role.is_some() {
            persona.role = update.role;
        }
        if update.company.is_some() {
            persona.company = update.company;
        }
        if update.region.is_some() {
            persona.region = update.region;
        }
        if update.goal.is_some() {
            persona.goal = update.goal;
        }
        if update.notes.is_some() {
            persona.notes = update.notes;
        }
        persona.updated_at = Utc::now();

        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            UPDATE personas
            SET name = ?2, role = ?3, company = ?4, region = ?5, goal = ?6, notes = ?7, updated_at = ?8
            WHERE id = ?1
            "#,
            params![
                persona.id,
                persona.name,
                persona.role,
                persona.company,
                persona.region,
                persona.goal,
                persona.notes,
                persona.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(persona)
    }

    /// Delete a persona and everything scoped to it
    pub fn delete(&self, persona_id: &str) -> Result<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "DELETE FROM reports WHERE persona_id = ?1",
            params![persona_id],
        )?;
        conn.execute(
            "DELETE FROM compare_sessions WHERE persona_id = ?1",
            params![persona_id],
        )?;
        conn.execute(
            "DELETE FROM memories WHERE persona_id = ?1",
            params![persona_id],
        )?;
        let affected = conn.execute("DELETE FROM personas WHERE id = ?1", params![persona_id])?;

        Ok(affected > 0)
    }
}

fn row_to_persona(row: &Row<'_>) -> rusqlite::Result<Persona> {
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    Ok(Persona {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        role: row.get(3)?,
        company: row.get(4)?,
        region: row.get(5)?,
        goal: row.get(6)?,
        notes: row.get(7)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}
