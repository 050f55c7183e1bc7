//! `SQLite` Backend
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver); every call runs on the blocking pool
//! - The pooled client is a single guarded connection, opened at startup
//! - The schema engine opens a fresh connection per DDL batch, except for
//!   `:memory:` databases where it reuses the client's connection so both see
//!   the same database
//! - BLOB data is Base64-encoded for JSON safety

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection as SqliteConnection, OpenFlags};
use std::sync::{Arc, Mutex};

use crate::connection::Connection;
use crate::engine::{AsyncClient, ExecuteResult, ParamSet, Row, SchemaEngine};
use crate::error::{PkgDbError, Result};

const MEMORY: &str = ":memory:";

type SharedConnection = Arc<Mutex<Option<SqliteConnection>>>;

/// Build the engine pair for a `sqlite` connection
pub fn build(connection: &Connection) -> Result<(Arc<dyn SchemaEngine>, Arc<dyn AsyncClient>)> {
    let key = connection.dedup_key.to_string();
    let path = connection.database.clone();
    if path.contains('\0') {
        return Err(PkgDbError::connection_config(&key, "SQLite path contains a NUL byte"));
    }

    let shared: SharedConnection = Arc::new(Mutex::new(None));
    let engine = SqliteEngine {
        key: key.clone(),
        path: path.clone(),
        shared: (path == MEMORY).then(|| Arc::clone(&shared)),
    };
    let client = SqliteClient { key, path, conn: shared };
    Ok((Arc::new(engine), Arc::new(client)))
}

/// Open `SQLite` connection, creating the file if needed
fn open_connection(key: &str, path: &str) -> Result<SqliteConnection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    SqliteConnection::open_with_flags(path, flags)
        .map_err(|e| PkgDbError::connection(key, format!("Failed to open SQLite database: {e}")))
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PkgDbError::query_failed(format!("SQLite worker task failed: {e}")))?
}

pub struct SqliteEngine {
    key: String,
    path: String,
    shared: Option<SharedConnection>,
}

#[async_trait]
impl SchemaEngine for SqliteEngine {
    async fn execute_batch(&self, statements: &[String]) -> Result<()> {
        let key = self.key.clone();
        let path = self.path.clone();
        let shared = self.shared.clone();
        let statements = statements.to_vec();

        blocking(move || match shared {
            Some(shared) => {
                let guard = shared
                    .lock()
                    .map_err(|_| PkgDbError::query_failed("SQLite connection lock poisoned"))?;
                let conn = guard.as_ref().ok_or_else(|| PkgDbError::NotConnected(key))?;
                run_statements(conn, &statements)
            }
            None => run_statements(&open_connection(&key, &path)?, &statements),
        })
        .await
    }
}

fn run_statements(conn: &SqliteConnection, statements: &[String]) -> Result<()> {
    for statement in statements {
        conn.execute_batch(statement).map_err(|e| {
            PkgDbError::query_failed(format!("Failed to execute '{statement}': {e}"))
        })?;
    }
    Ok(())
}

pub struct SqliteClient {
    key: String,
    path: String,
    conn: SharedConnection,
}

impl SqliteClient {
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let shared = Arc::clone(&self.conn);
        let key = self.key.clone();
        blocking(move || {
            let guard = shared
                .lock()
                .map_err(|_| PkgDbError::query_failed("SQLite connection lock poisoned"))?;
            let conn = guard.as_ref().ok_or_else(|| PkgDbError::NotConnected(key))?;
            f(conn)
        })
        .await
    }
}

#[async_trait]
impl AsyncClient for SqliteClient {
    async fn open(&self) -> Result<()> {
        let shared = Arc::clone(&self.conn);
        let key = self.key.clone();
        let path = self.path.clone();
        blocking(move || {
            let conn = open_connection(&key, &path)?;
            let mut guard = shared
                .lock()
                .map_err(|_| PkgDbError::connection(&key, "SQLite connection lock poisoned"))?;
            *guard = Some(conn);
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        let shared = Arc::clone(&self.conn);
        let key = self.key.clone();
        blocking(move || {
            let conn = shared
                .lock()
                .map_err(|_| PkgDbError::connection(&key, "SQLite connection lock poisoned"))?
                .take();
            match conn {
                Some(conn) => conn.close().map_err(|(_, e)| {
                    PkgDbError::connection(&key, format!("Failed to close SQLite database: {e}"))
                }),
                None => Ok(()),
            }
        })
        .await
    }

    async fn fetch_all(&self, query: &str, params: &[serde_json::Value]) -> Result<Vec<Row>> {
        let query = query.to_string();
        let params = to_sqlite_params(params);
        self.with_conn(move |conn| fetch_rows(conn, &query, params)).await
    }

    async fn execute(&self, query: &str, params: &[serde_json::Value]) -> Result<ExecuteResult> {
        let query = query.to_string();
        let params = to_sqlite_params(params);
        self.with_conn(move |conn| {
            let rows_affected = conn
                .execute(&query, params_from_iter(params))
                .map_err(|e| PkgDbError::query_failed(format!("Failed to execute query: {e}")))?;
            Ok(ExecuteResult {
                rows_affected: rows_affected as u64,
                last_insert_id: Some(conn.last_insert_rowid()),
            })
        })
        .await
    }

    async fn execute_many(&self, query: &str, param_sets: &[ParamSet]) -> Result<ExecuteResult> {
        let query = query.to_string();
        let sets: Vec<Vec<SqlValue>> = param_sets.iter().map(|set| to_sqlite_params(set)).collect();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction().map_err(|e| {
                PkgDbError::query_failed(format!("Failed to begin transaction: {e}"))
            })?;
            let mut rows_affected = 0u64;
            {
                let mut stmt = tx.prepare(&query).map_err(|e| {
                    PkgDbError::query_failed(format!("Failed to prepare query: {e}"))
                })?;
                for set in sets {
                    rows_affected += stmt.execute(params_from_iter(set)).map_err(|e| {
                        PkgDbError::query_failed(format!("Failed to execute query: {e}"))
                    })? as u64;
                }
            }
            tx.commit()
                .map_err(|e| PkgDbError::query_failed(format!("Failed to commit: {e}")))?;
            Ok(ExecuteResult { rows_affected, last_insert_id: Some(conn.last_insert_rowid()) })
        })
        .await
    }
}

fn fetch_rows(conn: &SqliteConnection, query: &str, params: Vec<SqlValue>) -> Result<Vec<Row>> {
    let mut stmt = conn
        .prepare(query)
        .map_err(|e| PkgDbError::query_failed(format!("Failed to prepare query: {e}")))?;
    let column_names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();

    let mut rows = stmt
        .query(params_from_iter(params))
        .map_err(|e| PkgDbError::query_failed(format!("Failed to execute query: {e}")))?;

    let mut result = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| PkgDbError::query_failed(format!("Failed to fetch row: {e}")))?
    {
        let mut values = Vec::with_capacity(column_names.len());
        for idx in 0..column_names.len() {
            let value = sqlite_value_to_json(row, idx)
                .map_err(|e| PkgDbError::query_failed(format!("Failed to decode column: {e}")))?;
            values.push(value);
        }
        result.push(Row::new(column_names.clone(), values));
    }
    Ok(result)
}

fn to_sqlite_params(params: &[serde_json::Value]) -> Vec<SqlValue> {
    params.iter().map(json_to_sqlite).collect()
}

fn json_to_sqlite(value: &serde_json::Value) -> SqlValue {
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Convert `SQLite` value to JSON value
fn sqlite_value_to_json(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> std::result::Result<serde_json::Value, rusqlite::Error> {
    let value_ref = row.get_ref(idx)?;

    Ok(match value_ref {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map_or(serde_json::Value::Null, serde_json::Value::Number), // Handle NaN/Infinity as null
        ValueRef::Text(s) => {
            let text = std::str::from_utf8(s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            serde_json::Value::String(text.to_string())
        }
        ValueRef::Blob(b) => {
            use base64::Engine;
            serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
    })
}
