//! MySQL Backend
//!
//! Covers MySQL and MariaDB.
//!
//! # Implementation Notes
//! - Uses `mysql_async` (async driver, requires tokio runtime)
//! - The pooled client wraps `mysql_async::Pool`, created at open and
//!   disconnected at close
//! - Queries without parameters use the text protocol, parameterized queries
//!   use prepared statements
//! - Column names of an empty result set are not reported
//! - BLOB data is Base64-encoded for JSON safety

use async_trait::async_trait;
use mysql_async::{prelude::*, Conn, Opts, OptsBuilder, Params, Pool, Row as MyRow, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::connection::Connection;
use crate::engine::{AsyncClient, ExecuteResult, ParamSet, Row, SchemaEngine};
use crate::error::{PkgDbError, Result};

/// Build the engine pair for a `mysql` connection
pub fn build(connection: &Connection) -> Result<(Arc<dyn SchemaEngine>, Arc<dyn AsyncClient>)> {
    let key = connection.dedup_key.to_string();
    let opts = Opts::from(build_mysql_opts(connection)?);
    let engine = MySqlEngine { key: key.clone(), opts: opts.clone() };
    let client = MySqlClient { key, opts, pool: RwLock::new(None) };
    Ok((Arc::new(engine), Arc::new(client)))
}

/// Build MySQL connection options from a normalized connection
fn build_mysql_opts(connection: &Connection) -> Result<OptsBuilder> {
    let key = connection.dedup_key.as_str();
    let host = connection
        .host
        .as_deref()
        .ok_or_else(|| PkgDbError::connection_config(key, "MySQL requires 'host'"))?;
    let port = connection
        .port
        .ok_or_else(|| PkgDbError::connection_config(key, "MySQL requires 'port'"))?;

    let opts = OptsBuilder::default()
        .ip_or_hostname(host)
        .tcp_port(port)
        .user(connection.username.as_deref())
        .pass(connection.password.as_deref())
        .db_name(Some(connection.database.as_str()));

    Ok(opts)
}

pub struct MySqlEngine {
    key: String,
    opts: Opts,
}

#[async_trait]
impl SchemaEngine for MySqlEngine {
    async fn execute_batch(&self, statements: &[String]) -> Result<()> {
        let mut conn = Conn::new(self.opts.clone()).await.map_err(|e| {
            PkgDbError::connection(&self.key, format!("Failed to connect to MySQL: {e}"))
        })?;
        for statement in statements {
            conn.query_drop(statement.as_str()).await.map_err(|e| {
                PkgDbError::query_failed(format!("Failed to execute '{statement}': {e}"))
            })?;
        }
        conn.disconnect().await.map_err(|e| {
            PkgDbError::connection(&self.key, format!("Failed to disconnect: {e}"))
        })?;
        Ok(())
    }
}

pub struct MySqlClient {
    key: String,
    opts: Opts,
    pool: RwLock<Option<Pool>>,
}

impl MySqlClient {
    async fn conn(&self) -> Result<Conn> {
        let pool = self
            .pool
            .read()
            .await
            .clone()
            .ok_or_else(|| PkgDbError::NotConnected(self.key.clone()))?;
        pool.get_conn()
            .await
            .map_err(|e| PkgDbError::connection(&self.key, format!("Failed to get connection: {e}")))
    }
}

#[async_trait]
impl AsyncClient for MySqlClient {
    async fn open(&self) -> Result<()> {
        let mut slot = self.pool.write().await;
        let pool = Pool::new(self.opts.clone());
        match pool.get_conn().await {
            Ok(conn) => drop(conn),
            Err(e) => {
                let _ = pool.disconnect().await;
                return Err(PkgDbError::connection(
                    &self.key,
                    format!("Failed to connect to MySQL: {e}"),
                ));
            }
        }
        *slot = Some(pool);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let pool = self.pool.write().await.take();
        if let Some(pool) = pool {
            pool.disconnect().await.map_err(|e| {
                PkgDbError::connection(&self.key, format!("Failed to close pool: {e}"))
            })?;
        }
        Ok(())
    }

    async fn fetch_all(&self, query: &str, params: &[serde_json::Value]) -> Result<Vec<Row>> {
        let mut conn = self.conn().await?;
        let rows: Vec<MyRow> = if params.is_empty() {
            conn.query::<MyRow, _>(query).await
        } else {
            conn.exec::<MyRow, _, _>(query, to_mysql_params(params)).await
        }
        .map_err(|e| PkgDbError::query_failed(format!("Failed to execute query: {e}")))?;

        rows.iter().map(row_to_json).collect()
    }

    async fn execute(&self, query: &str, params: &[serde_json::Value]) -> Result<ExecuteResult> {
        let mut conn = self.conn().await?;
        let result = if params.is_empty() {
            conn.query_drop(query).await
        } else {
            conn.exec_drop(query, to_mysql_params(params)).await
        };
        result.map_err(|e| PkgDbError::query_failed(format!("Failed to execute query: {e}")))?;

        Ok(ExecuteResult {
            rows_affected: conn.affected_rows(),
            last_insert_id: conn.last_insert_id().and_then(|id| i64::try_from(id).ok()),
        })
    }

    async fn execute_many(&self, query: &str, param_sets: &[ParamSet]) -> Result<ExecuteResult> {
        let mut conn = self.conn().await?;
        conn.query_drop("START TRANSACTION")
            .await
            .map_err(|e| PkgDbError::query_failed(format!("Failed to begin transaction: {e}")))?;

        let mut rows_affected = 0;
        for set in param_sets {
            if let Err(e) = conn.exec_drop(query, to_mysql_params(set)).await {
                let _ = conn.query_drop("ROLLBACK").await;
                return Err(PkgDbError::query_failed(format!("Failed to execute query: {e}")));
            }
            rows_affected += conn.affected_rows();
        }

        conn.query_drop("COMMIT")
            .await
            .map_err(|e| PkgDbError::query_failed(format!("Failed to commit: {e}")))?;

        Ok(ExecuteResult {
            rows_affected,
            last_insert_id: conn.last_insert_id().and_then(|id| i64::try_from(id).ok()),
        })
    }
}

fn to_mysql_params(params: &[serde_json::Value]) -> Params {
    Params::Positional(params.iter().map(json_to_mysql).collect())
}

fn json_to_mysql(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::NULL,
        serde_json::Value::Bool(b) => Value::Int(i64::from(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt(u)
            } else {
                n.as_f64().map_or(Value::NULL, Value::Double)
            }
        }
        serde_json::Value::String(s) => Value::Bytes(s.as_bytes().to_vec()),
        other => Value::Bytes(other.to_string().into_bytes()),
    }
}

fn row_to_json(row: &MyRow) -> Result<Row> {
    let columns: Vec<String> =
        row.columns_ref().iter().map(|col| col.name_str().to_string()).collect();
    let values =
        (0..columns.len()).map(|idx| mysql_value_to_json(row, idx)).collect::<Result<Vec<_>>>()?;
    Ok(Row::new(columns, values))
}

/// Convert MySQL value to JSON value
fn mysql_value_to_json(row: &MyRow, idx: usize) -> Result<serde_json::Value> {
    let value = row
        .as_ref(idx)
        .ok_or_else(|| PkgDbError::query_failed(format!("Failed to get value at index {idx}")))?;

    let json_value = match value {
        Value::NULL => serde_json::Value::Null,

        Value::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => serde_json::Value::String(s.to_string()),
            Err(_) => {
                use base64::Engine;
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
        },

        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::UInt(u) => serde_json::Value::Number((*u).into()),

        Value::Float(f) => serde_json::Number::from_f64(f64::from(*f))
            .map_or(serde_json::Value::Null, serde_json::Value::Number), // Handle NaN/Infinity as null
        Value::Double(d) => serde_json::Number::from_f64(*d)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),

        Value::Date(year, month, day, hour, minute, second, micro) => serde_json::Value::String(
            format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{micro:06}"),
        ),

        Value::Time(is_negative, days, hours, minutes, seconds, microseconds) => {
            let sign = if *is_negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(*hours);
            serde_json::Value::String(format!(
                "{sign}{total_hours}:{minutes:02}:{seconds:02}.{microseconds:06}"
            ))
        }
    };

    Ok(json_value)
}
