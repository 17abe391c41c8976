//! Store schema and migrations
//!
//! Each entry of [`MIGRATIONS`] upgrades the schema by one revision; entry
//! `n` takes revision `n` to `n + 1`. The applied revision lives in the
//! single-row `schema_version` table.

use rusqlite::{params, OptionalExtension, Transaction};

use crate::{Result, SupervisorError};

/// Schema revision this build reads and writes
pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

const VERSION_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version_lock   INTEGER PRIMARY KEY CHECK (version_lock = 1),
        version_number INTEGER NOT NULL
    );
";

/// Ordered DDL migrations
pub const MIGRATIONS: &[&str] = &[
    // 0 → 1: pods and containers
    "
    CREATE TABLE pods (
        p_id   INTEGER PRIMARY KEY AUTOINCREMENT,
        p_name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE containers (
        c_id   INTEGER PRIMARY KEY AUTOINCREMENT,
        c_name TEXT NOT NULL UNIQUE,
        c_pod  INTEGER REFERENCES pods (p_id)
    );

    CREATE INDEX idx_containers_pod ON containers (c_pod);
    ",
    // 1 → 2: audit log
    "
    CREATE TABLE audit (
        a_id       INTEGER PRIMARY KEY AUTOINCREMENT,
        a_instance TEXT    NOT NULL,
        a_scope    TEXT    NOT NULL,
        a_time_ms  INTEGER NOT NULL,
        a_code     TEXT    NOT NULL,
        a_text     TEXT    NOT NULL
    );

    CREATE INDEX idx_audit_time ON audit (a_time_ms DESC);
    ",
];

/// Read the applied revision; 0 for a fresh database
pub fn current_version(tx: &Transaction<'_>) -> Result<i64> {
    tx.execute_batch(VERSION_TABLE)?;
    let version = tx
        .query_row(
            "SELECT version_number FROM schema_version WHERE version_lock = 1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(version.unwrap_or(0))
}

/// Bring the schema up to [`SCHEMA_VERSION`], rejecting newer stores.
///
/// Returns the revision found before migrating.
pub fn migrate(tx: &Transaction<'_>) -> Result<i64> {
    let found = current_version(tx)?;
    if found > SCHEMA_VERSION || found < 0 {
        return Err(SupervisorError::StoreIncompatible {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    for (revision, ddl) in MIGRATIONS.iter().enumerate().skip(found as usize) {
        tracing::debug!(from = revision, to = revision + 1, "Applying store migration");
        tx.execute_batch(ddl)?;
    }

    tx.execute(
        "INSERT INTO schema_version (version_lock, version_number) VALUES (1, ?1)
         ON CONFLICT (version_lock) DO UPDATE SET version_number = excluded.version_number",
        params![SCHEMA_VERSION],
    )?;

    Ok(found)
}
