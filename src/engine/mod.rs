//! Database Engine Traits and Core Types
//!
//! Each physical database (one dedup key) is reached through two objects:
//! - a [`SchemaEngine`], stateless: every DDL batch opens a dedicated
//!   connection, runs, and closes it
//! - an [`AsyncClient`], pooled: opened at startup, closed at shutdown, used
//!   for every runtime query
//!
//! Both live inside a [`Handle`] together with the connectivity flag.
//!
//! # Engine Isolation
//! Each backend implementation is completely independent.
//! No shared SQL helpers or cross-engine abstractions.

use async_trait::async_trait;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use std::sync::Arc;

use crate::connection::{Connection, DatabaseType};
use crate::error::{PkgDbError, Result};

mod handle;

pub use handle::{Handle, HandleSet};

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

/// One set of positional parameters
pub type ParamSet = Vec<serde_json::Value>;

/// Parameters for [`AsyncClient::execute`]: one set, or many for batch execution
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Many(Vec<ParamSet>),
    One(ParamSet),
}

/// Outcome of a write statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecuteResult {
    pub rows_affected: u64,
    /// Last generated id, when the backend reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
}

/// A result row: column names paired with JSON-safe values
///
/// BLOBs are Base64 strings and timestamps ISO-8601 strings. Serializes as a
/// JSON object in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<serde_json::Value>,
}

impl Row {
    #[must_use]
    pub fn new(columns: Vec<String>, values: Vec<serde_json::Value>) -> Self {
        Self { columns, values }
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn values(&self) -> &[serde_json::Value] {
        &self.values
    }

    /// Value of the first column called `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.columns.iter().position(|c| c == name).and_then(|i| self.values.get(i))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Pooled asynchronous client for runtime queries
///
/// `open` and `close` are only called by the owning [`Handle`], which
/// guarantees they alternate.
#[async_trait]
pub trait AsyncClient: Send + Sync {
    /// Open the pool and verify the database is reachable
    async fn open(&self) -> Result<()>;

    /// Close the pool and release every pooled connection
    async fn close(&self) -> Result<()>;

    async fn fetch_all(&self, query: &str, params: &[serde_json::Value]) -> Result<Vec<Row>>;

    async fn fetch_one(&self, query: &str, params: &[serde_json::Value]) -> Result<Option<Row>> {
        Ok(self.fetch_all(query, params).await?.into_iter().next())
    }

    async fn execute(&self, query: &str, params: &[serde_json::Value]) -> Result<ExecuteResult>;

    /// Run one statement once per parameter set inside a single transaction
    async fn execute_many(&self, query: &str, param_sets: &[ParamSet]) -> Result<ExecuteResult>;
}

/// Stateless DDL executor
#[async_trait]
pub trait SchemaEngine: Send + Sync {
    /// Run statements in order on a dedicated connection
    async fn execute_batch(&self, statements: &[String]) -> Result<()>;
}

/// Build the schema engine and pooled client for a connection's backend
///
/// Construction performs no I/O. A driver that is unknown or compiled out is
/// a `ConnectionConfig` error.
pub fn build(connection: &Connection) -> Result<(Arc<dyn SchemaEngine>, Arc<dyn AsyncClient>)> {
    let key = connection.dedup_key.as_str();
    let backend = connection.backend().ok_or_else(|| {
        PkgDbError::connection_config(key, format!("unsupported driver '{}'", connection.driver))
    })?;

    match backend {
        #[cfg(feature = "sqlite")]
        DatabaseType::SQLite => sqlite::build(connection),
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => postgres::build(connection),
        #[cfg(feature = "mysql")]
        DatabaseType::MySQL => mysql::build(connection),
        #[allow(unreachable_patterns)]
        other => Err(PkgDbError::connection_config(
            key,
            format!("{other} support is not compiled in (enable the '{other}' feature)"),
        )),
    }
}
