//! # Unified Dossier Database
//!
//! Single SQLite database for all durable state: personas, versioned
//! reports, compare sessions, and account memories, in `.dossier/dossier.db`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Unified database manager for all Dossier state
pub struct DossierDb {
    conn: Arc<Mutex<Connection>>,
}

impl DossierDb {
    /// Open or create the unified database at `.dossier/dossier.db`
    pub fn open() -> Result<Self> {
        Self::open_at(".dossier/dossier.db")
    }

    /// Open database at a specific path (useful for testing)
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open dossier database")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Get a shared connection for use by other modules
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Run schema migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            self.migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        Ok(())
    }

    /// Migration to version 1 - complete schema
    fn migrate_v1(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS personas (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                role TEXT,
                company TEXT,
                region TEXT,
                goal TEXT,
                notes TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        // Versioned report rows; one row per persisted mutation.
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                persona_id TEXT NOT NULL,
                company_key TEXT NOT NULL,
                company_name TEXT NOT NULL,
                version INTEGER NOT NULL,
                report_json TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, persona_id, company_key, version)
            )
            "#,
            [],
        )?;

        // Immutable comparison sessions.
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS compare_sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                persona_id TEXT NOT NULL,
                company_a_key TEXT NOT NULL,
                company_b_key TEXT NOT NULL,
                report_a_version INTEGER NOT NULL,
                report_b_version INTEGER NOT NULL,
                comparison_json TEXT NOT NULL,
                recommendation TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        // Append-only account memory.
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                persona_id TEXT NOT NULL,
                statement TEXT NOT NULL,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_personas_user ON personas(user_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_reports_key ON reports(user_id, persona_id, company_key, version)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_compare_scope ON compare_sessions(user_id, persona_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memories_scope ON memories(user_id, persona_id)",
            [],
        )?;

        tracing::info!(
            "DossierDb initialized with schema version {}",
            SCHEMA_VERSION
        );

        Ok(())
    }
}

/// Generate a row id: timestamp plus a hash suffix. Not cryptographic,
/// unique enough for local single-writer use.
pub(crate) fn new_row_id(prefix: &str) -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    let salt = RandomState::new().build_hasher().finish() as u32;
    format!("{}-{:x}-{:x}", prefix, nanos, salt)
}

/// Parse a stored RFC 3339 timestamp; unparseable values collapse to
/// the epoch instead of poisoning the whole row.
pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_dossier_db_open_creates_tables() {
        let path = ".dossier/test_dossier_open.db";
        let _ = fs::remove_file(path);

        let db = DossierDb::open_at(path).unwrap();
        let conn = db.connection();
        let conn = conn.lock().unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"personas".to_string()));
        assert!(tables.contains(&"reports".to_string()));
        assert!(tables.contains(&"compare_sessions".to_string()));
        assert!(tables.contains(&"memories".to_string()));

        drop(conn);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_schema_version_tracking() {
        let path = ".dossier/test_dossier_version.db";
        let _ = fs::remove_file(path);

        let db1 = DossierDb::open_at(path).unwrap();
        drop(db1);

        let db2 = DossierDb::open_at(path).unwrap();
        let conn = db2.connection();
        let conn = conn.lock().unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();

        assert_eq!(version, SCHEMA_VERSION);

        drop(conn);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_new_row_id_is_prefixed_and_unique() {
        let a = new_row_id("per");
        let b = new_row_id("per");
        assert!(a.starts_with("per-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_timestamp_fallback() {
        let ts = Utc::now();
        let parsed = parse_timestamp(&ts.to_rfc3339());
        assert_eq!(parsed.timestamp(), ts.timestamp());
        assert_eq!(parse_timestamp("garbage"), DateTime::UNIX_EPOCH);
    }
}
