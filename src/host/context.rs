//! Durable per-node key/value storage.
//!
//! Values are JSON. The subscriber node keeps its replay offset here so a
//! restarted flow resumes where it left off.

use anyhow::{Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Node-scoped key/value storage.
pub trait ContextStore: Send + Sync {
    fn get(&self, node_id: &str, key: &str) -> Result<Option<Value>>;
    fn set(&self, node_id: &str, key: &str, value: &Value) -> Result<()>;
    /// Returns whether a value was removed.
    fn remove(&self, node_id: &str, key: &str) -> Result<bool>;
}

/// Volatile store; values live as long as the process.
#[derive(Default)]
pub struct MemoryContext {
    values: DashMap<(String, String), Value>,
}

impl MemoryContext {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContextStore for MemoryContext {
    fn get(&self, node_id: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .values
            .get(&(node_id.to_string(), key.to_string()))
            .map(|v| v.value().clone()))
    }

    fn set(&self, node_id: &str, key: &str, value: &Value) -> Result<()> {
        self.values
            .insert((node_id.to_string(), key.to_string()), value.clone());
        Ok(())
    }

    fn remove(&self, node_id: &str, key: &str) -> Result<bool> {
        Ok(self
            .values
            .remove(&(node_id.to_string(), key.to_string()))
            .is_some())
    }
}

/// SQLite-backed store.
///
/// # Schema
/// ```sql
/// CREATE TABLE node_context (
///     node_id TEXT NOT NULL,
///     key TEXT NOT NULL,
///     value TEXT NOT NULL,       -- JSON
///     updated_at TEXT NOT NULL,  -- RFC 3339
///     PRIMARY KEY (node_id, key)
/// );
/// ```
pub struct SqliteContext {
    conn: Mutex<Connection>,
}

impl SqliteContext {
    /// Opens (or creates) the database at `db_path`. `":memory:"` works too.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open context database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS node_context (
                node_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (node_id, key)
            )
            "#,
            [],
        )
        .context("Failed to create node_context table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl ContextStore for SqliteContext {
    fn get(&self, node_id: &str, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT value FROM node_context WHERE node_id = ?1 AND key = ?2",
                params![node_id, key],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read context value")?;

        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .context("Stored context value is not valid JSON")
    }

    fn set(&self, node_id: &str, key: &str, value: &Value) -> Result<()> {
        let encoded = serde_json::to_string(value).context("Failed to encode context value")?;
        self.conn()
            .execute(
                r#"
                INSERT INTO node_context (node_id, key, value, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(node_id, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
                params![node_id, key, encoded, Utc::now().to_rfc3339()],
            )
            .context("Failed to store context value")?;
        Ok(())
    }

    fn remove(&self, node_id: &str, key: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute(
                "DELETE FROM node_context WHERE node_id = ?1 AND key = ?2",
                params![node_id, key],
            )
            .context("Failed to delete context value")?;
        Ok(rows > 0)
    }
}

/// A store bound to one node.
#[derive(Clone)]
pub struct NodeContext {
    store: Arc<dyn ContextStore>,
    node_id: String,
}

impl NodeContext {
    pub fn new(store: Arc<dyn ContextStore>, node_id: impl Into<String>) -> Self {
        Self {
            store,
            node_id: node_id.into(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.store.get(&self.node_id, key)
    }

    pub fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.store.set(&self.node_id, key, value)
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        self.store.remove(&self.node_id, key)
    }
}
