//! `PostgreSQL` Backend
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` (native async driver)
//! - The pooled client is a `deadpool-postgres` pool built at open and closed
//!   at close; connections are health-checked when recycled
//! - The schema engine opens one dedicated connection per DDL batch
//! - JSON parameters are encoded according to the type the server inferred for
//!   each placeholder
//! - BYTEA data is Base64-encoded; timestamps become ISO 8601 strings

use async_trait::async_trait;
use bytes::BytesMut;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row as PgRow};

use crate::connection::Connection;
use crate::engine::{AsyncClient, ExecuteResult, ParamSet, Row, SchemaEngine};
use crate::error::{PkgDbError, Result};

/// Maximum connections per pool
pub const DEFAULT_POOL_SIZE: usize = 5;

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// Build the engine pair for a `postgresql` connection
pub fn build(connection: &Connection) -> Result<(Arc<dyn SchemaEngine>, Arc<dyn AsyncClient>)> {
    let key = connection.dedup_key.to_string();
    let config = build_pg_config(connection)?;
    let engine = PostgresEngine { key: key.clone(), config: config.clone() };
    let client = PostgresClient {
        key,
        config,
        pool_size: DEFAULT_POOL_SIZE,
        pool: RwLock::new(None),
    };
    Ok((Arc::new(engine), Arc::new(client)))
}

/// Build `PostgreSQL` connection config from a normalized connection
fn build_pg_config(connection: &Connection) -> Result<Config> {
    let key = connection.dedup_key.as_str();
    let host = connection
        .host
        .as_deref()
        .ok_or_else(|| PkgDbError::connection_config(key, "PostgreSQL requires 'host'"))?;
    let port = connection
        .port
        .ok_or_else(|| PkgDbError::connection_config(key, "PostgreSQL requires 'port'"))?;

    let mut pg_config = Config::new();
    pg_config.host(host).port(port).dbname(&connection.database);
    if let Some(user) = &connection.username {
        pg_config.user(user);
    }
    if let Some(password) = &connection.password {
        pg_config.password(password);
    }
    Ok(pg_config)
}

async fn connect(key: &str, config: &Config) -> Result<(Client, JoinHandle<()>)> {
    let (client, connection) = config.connect(NoTls).await.map_err(|e| {
        PkgDbError::connection(key, format!("Failed to connect to PostgreSQL: {e}"))
    })?;

    // Connection errors are not logged to prevent credential leakage
    let task = tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok((client, task))
}

pub struct PostgresEngine {
    key: String,
    config: Config,
}

#[async_trait]
impl SchemaEngine for PostgresEngine {
    async fn execute_batch(&self, statements: &[String]) -> Result<()> {
        let (client, task) = connect(&self.key, &self.config).await?;
        for statement in statements {
            client.batch_execute(statement).await.map_err(|e| {
                PkgDbError::query_failed(format!("Failed to execute '{statement}': {e}"))
            })?;
        }
        drop(client);
        let _ = task.await;
        Ok(())
    }
}

pub struct PostgresClient {
    key: String,
    config: Config,
    pool_size: usize,
    pool: RwLock<Option<Pool>>,
}

impl PostgresClient {
    async fn client(&self) -> Result<Object> {
        let pool = self
            .pool
            .read()
            .await
            .clone()
            .ok_or_else(|| PkgDbError::NotConnected(self.key.clone()))?;
        pool.get()
            .await
            .map_err(|e| PkgDbError::connection(&self.key, format!("Failed to get connection: {e}")))
    }
}

#[async_trait]
impl AsyncClient for PostgresClient {
    async fn open(&self) -> Result<()> {
        let mut slot = self.pool.write().await;
        let manager = Manager::from_config(
            self.config.clone(),
            NoTls,
            ManagerConfig { recycling_method: RecyclingMethod::Fast },
        );
        let pool = Pool::builder(manager).max_size(self.pool_size).build().map_err(|e| {
            PkgDbError::connection_config(&self.key, format!("Failed to build pool: {e}"))
        })?;

        // Fail at startup rather than on the first query
        if let Err(e) = pool.get().await {
            pool.close();
            return Err(PkgDbError::connection(
                &self.key,
                format!("Failed to connect to PostgreSQL: {e}"),
            ));
        }
        *slot = Some(pool);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close();
        }
        Ok(())
    }

    async fn fetch_all(&self, query: &str, params: &[serde_json::Value]) -> Result<Vec<Row>> {
        let client = self.client().await?;

        let stmt = client
            .prepare_cached(query)
            .await
            .map_err(|e| PkgDbError::query_failed(format!("Failed to prepare query: {e}")))?;
        let column_names: Vec<String> =
            stmt.columns().iter().map(|c| c.name().to_string()).collect();

        let params = bind(params);
        let rows = client
            .query(&stmt, &params.refs())
            .await
            .map_err(|e| PkgDbError::query_failed(format!("Failed to execute query: {e}")))?;

        rows.iter()
            .map(|row| {
                let values = (0..column_names.len())
                    .map(|idx| postgres_value_to_json(row, idx))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Row::new(column_names.clone(), values))
            })
            .collect()
    }

    async fn execute(&self, query: &str, params: &[serde_json::Value]) -> Result<ExecuteResult> {
        let client = self.client().await?;

        let params = bind(params);
        let rows_affected = client
            .execute(query, &params.refs())
            .await
            .map_err(|e| PkgDbError::query_failed(format!("Failed to execute query: {e}")))?;

        // PostgreSQL reports generated ids only through RETURNING
        Ok(ExecuteResult { rows_affected, last_insert_id: None })
    }

    async fn execute_many(&self, query: &str, param_sets: &[ParamSet]) -> Result<ExecuteResult> {
        let mut client = self.client().await?;

        let tx = client
            .transaction()
            .await
            .map_err(|e| PkgDbError::query_failed(format!("Failed to begin transaction: {e}")))?;
        let stmt = tx
            .prepare_cached(query)
            .await
            .map_err(|e| PkgDbError::query_failed(format!("Failed to prepare query: {e}")))?;

        let mut rows_affected = 0;
        for set in param_sets {
            let params = bind(set);
            rows_affected += tx
                .execute(&stmt, &params.refs())
                .await
                .map_err(|e| PkgDbError::query_failed(format!("Failed to execute query: {e}")))?;
        }
        tx.commit()
            .await
            .map_err(|e| PkgDbError::query_failed(format!("Failed to commit: {e}")))?;

        Ok(ExecuteResult { rows_affected, last_insert_id: None })
    }
}

/// JSON parameter encoded per the placeholder's inferred type
#[derive(Debug)]
struct PgParam<'a>(&'a serde_json::Value);

struct Bound<'a>(Vec<PgParam<'a>>);

impl Bound<'_> {
    fn refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.0.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
    }
}

fn bind(params: &[serde_json::Value]) -> Bound<'_> {
    Bound(params.iter().map(PgParam).collect())
}

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self.0 {
            serde_json::Value::Null => Ok(IsNull::Yes),
            serde_json::Value::Bool(b) => b.to_sql(ty, out),
            serde_json::Value::Number(n) => number_to_sql(n, ty, out),
            serde_json::Value::String(s) => string_to_sql(s, ty, out),
            other => other.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn to_sql_checked(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        self.to_sql(ty, out)
    }
}

fn number_to_sql(
    n: &serde_json::Number,
    ty: &Type,
    out: &mut BytesMut,
) -> std::result::Result<IsNull, BoxError> {
    let int = || n.as_i64().ok_or_else(|| format!("{n} is not an integer"));
    let float = || n.as_f64().ok_or_else(|| format!("{n} is not a number"));
    match *ty {
        Type::INT2 => i16::try_from(int()?)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(int()?)?.to_sql(ty, out),
        Type::INT8 => int()?.to_sql(ty, out),
        #[allow(clippy::cast_possible_truncation)]
        Type::FLOAT4 => (float()? as f32).to_sql(ty, out),
        Type::FLOAT8 => float()?.to_sql(ty, out),
        Type::JSON | Type::JSONB => serde_json::Value::Number(n.clone()).to_sql(ty, out),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => n.to_string().to_sql(ty, out),
        _ => Err(format!("cannot bind number to PostgreSQL type '{}'", ty.name()).into()),
    }
}

fn string_to_sql(s: &str, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::JSON | Type::JSONB => serde_json::Value::String(s.to_string()).to_sql(ty, out),
        Type::UUID => uuid::Uuid::parse_str(s)?.to_sql(ty, out),
        Type::TIMESTAMPTZ => chrono::DateTime::parse_from_rfc3339(s)?
            .with_timezone(&chrono::Utc)
            .to_sql(ty, out),
        Type::TIMESTAMP => {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")?.to_sql(ty, out)
        }
        Type::DATE => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")?.to_sql(ty, out),
        _ => s.to_sql(ty, out),
    }
}

fn get<'a, T: FromSql<'a>>(row: &'a PgRow, idx: usize) -> Result<Option<T>> {
    row.try_get(idx).map_err(|e| {
        PkgDbError::query_failed(format!(
            "Failed to convert PostgreSQL type '{}' to JSON: {e}",
            row.columns()[idx].type_().name()
        ))
    })
}

/// Convert `PostgreSQL` value to JSON value
fn postgres_value_to_json(row: &PgRow, idx: usize) -> Result<serde_json::Value> {
    use serde_json::Value;

    let col_type = row.columns()[idx].type_();
    let float = |v: f64| serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number); // Handle NaN/Infinity as null

    let value = match *col_type {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx)?.map(Value::from),
        Type::INT4 => get::<i32>(row, idx)?.map(Value::from),
        Type::INT8 => get::<i64>(row, idx)?.map(Value::from),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| float(f64::from(v))),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(float),
        Type::JSON | Type::JSONB => get::<Value>(row, idx)?,
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(|v| {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(v))
        }),
        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, idx)?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => get::<chrono::DateTime<chrono::Utc>>(row, idx)?
            .map(|v| Value::String(v.to_rfc3339())),
        Type::DATE => get::<chrono::NaiveDate>(row, idx)?
            .map(|v| Value::String(v.format("%Y-%m-%d").to_string())),
        Type::TIME => get::<chrono::NaiveTime>(row, idx)?
            .map(|v| Value::String(v.format("%H:%M:%S").to_string())),
        Type::UUID => get::<uuid::Uuid>(row, idx)?.map(|v| Value::String(v.to_string())),
        // Text types and anything else readable as text
        _ => get::<String>(row, idx)?.map(Value::String),
    };

    Ok(value.unwrap_or(Value::Null))
}
