//! ContainerStore: SQLite WAL persistent storage for supervisor bookkeeping
//!
//! - WAL mode: non-blocking readers, one writer at a time
//! - Immediate transactions for every multi-statement write, so several
//!   supervisors sharing one file cannot break pod/container references
//! - Append-only audit log of supervisor events

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use super::schema;
use crate::types::{AuditEvent, ContainerRecord, PodRecord, SupervisorScope};
use crate::{Result, ResultExt, SupervisorError};

/// SQLite store of live pods, containers and audit events
#[derive(Debug)]
pub struct ContainerStore {
    conn: Connection,
}

impl ContainerStore {
    /// Open (or create) the store at `path`, validating and migrating its schema.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use fixtura_core::store::ContainerStore;
    /// let store = ContainerStore::open("/tmp/fixtura/project.db").unwrap();
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(SupervisorError::from)
            .with_context(|| format!("Opening store '{}'", path.display()))?;
        Self::configure(conn)
    }

    /// An in-memory store, mostly useful for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA busy_timeout = 5000;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(SupervisorError::from)
        .context("Configuring SQLite pragmas")?;

        let mut store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&mut self) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let found = schema::migrate(&tx)?;
        tx.commit()?;

        if found != schema::SCHEMA_VERSION {
            tracing::info!(
                from = found,
                to = schema::SCHEMA_VERSION,
                "Store schema upgraded"
            );
        }
        Ok(())
    }

    /// The schema revision recorded in the store
    pub fn schema_version(&self) -> Result<i64> {
        let version = self.conn.query_row(
            "SELECT version_number FROM schema_version WHERE version_lock = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Containers
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a container. Re-recording an existing name updates its pod.
    ///
    /// Fails with [`SupervisorError::PodNotFound`] if the named pod has no record.
    pub fn container_put(&mut self, record: &ContainerRecord) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let pod_id: Option<i64> = match &record.pod_name {
            Some(pod) => {
                let id = tx
                    .query_row(
                        "SELECT p_id FROM pods WHERE p_name = ?1",
                        params![pod],
                        |row| row.get(0),
                    )
                    .optional()?;
                match id {
                    Some(id) => Some(id),
                    None => return Err(SupervisorError::PodNotFound(pod.clone())),
                }
            }
            None => None,
        };

        tx.execute(
            "INSERT INTO containers (c_name, c_pod) VALUES (?1, ?2)
             ON CONFLICT (c_name) DO UPDATE SET c_pod = excluded.c_pod",
            params![record.name, pod_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Delete a container record; returns whether one existed
    pub fn container_delete(&mut self, name: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM containers WHERE c_name = ?1", params![name])?;
        Ok(changed > 0)
    }

    /// Look up one container record
    pub fn container_get(&self, name: &str) -> Result<Option<ContainerRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT c_name, p_name FROM containers
                 LEFT JOIN pods ON c_pod = p_id
                 WHERE c_name = ?1",
                params![name],
                |row| {
                    Ok(ContainerRecord {
                        name: row.get(0)?,
                        pod_name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// All container records, oldest first
    pub fn container_list(&self) -> Result<Vec<ContainerRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT c_name, p_name FROM containers
             LEFT JOIN pods ON c_pod = p_id
             ORDER BY c_id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(ContainerRecord {
                name: row.get(0)?,
                pod_name: row.get(1)?,
            })
        })?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(SupervisorError::from)
            .context("Listing containers")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pods
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a pod (idempotent)
    pub fn pod_put(&mut self, name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO pods (p_name) VALUES (?1) ON CONFLICT (p_name) DO NOTHING",
            params![name],
        )?;
        Ok(())
    }

    /// Delete a pod record; returns whether one existed.
    ///
    /// Fails while container records still reference the pod.
    pub fn pod_delete(&mut self, name: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM pods WHERE p_name = ?1", params![name])
            .map_err(SupervisorError::from)
            .with_context(|| format!("Deleting pod record {}", name))?;
        Ok(changed > 0)
    }

    /// All pod records, oldest first
    pub fn pod_list(&self) -> Result<Vec<PodRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT p_name FROM pods ORDER BY p_id")?;
        let rows = stmt.query_map([], |row| Ok(PodRecord { name: row.get(0)? }))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(SupervisorError::from)
            .context("Listing pods")
    }

    /// Names of the containers recorded as members of a pod
    pub fn pod_members(&self, pod: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT c_name FROM containers
             JOIN pods ON c_pod = p_id
             WHERE p_name = ?1
             ORDER BY c_id",
        )?;
        let rows = stmt.query_map(params![pod], |row| row.get(0))?;

        rows.collect::<rusqlite::Result<Vec<String>>>()
            .map_err(SupervisorError::from)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Audit log
    // ─────────────────────────────────────────────────────────────────────────

    /// Append an audit event
    pub fn audit_put(&mut self, event: &AuditEvent) -> Result<()> {
        self.conn.execute(
            "INSERT INTO audit (a_instance, a_scope, a_time_ms, a_code, a_text)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.instance_id.to_string(),
                event.scope.as_str(),
                event.timestamp_ms,
                event.code,
                event.text
            ],
        )?;
        Ok(())
    }

    /// The most recent audit events, newest first
    pub fn audit_list(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT a_instance, a_scope, a_time_ms, a_code, a_text
             FROM audit
             ORDER BY a_id DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (instance, scope, timestamp_ms, code, text) = row?;
            events.push(AuditEvent {
                instance_id: Uuid::parse_str(&instance).map_err(|e| {
                    SupervisorError::InvalidConfig(format!("bad audit instance id: {}", e))
                })?,
                scope: SupervisorScope::from_str(&scope)?,
                timestamp_ms,
                code,
                text,
            });
        }
        Ok(events)
    }

    /// Store statistics
    pub fn stats(&self) -> Result<serde_json::Value> {
        let count = |table: &str| -> Result<i64> {
            let sql = format!("SELECT COUNT(*) FROM {}", table);
            Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
        };

        Ok(serde_json::json!({
            "schema_version": self.schema_version()?,
            "pods": count("pods")?,
            "containers": count("containers")?,
            "audit_events": count("audit")?,
        }))
    }

    /// Close the underlying connection, reporting any failure to flush
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| SupervisorError::from(e))
    }
}
