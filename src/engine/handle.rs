//! Per-Database Engine Handles
//!
//! One [`Handle`] per dedup key pairs the stateless schema engine with the
//! pooled client and tracks whether the pool is open. [`HandleSet`] owns all
//! of them and drives the startup and shutdown transitions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{AsyncClient, ExecuteResult, ParamSet, Params, Row, SchemaEngine};
use crate::connection::{Connection, DatabaseType, DedupKey};
use crate::error::{PkgDbError, Result};
use crate::schema::Table;

/// Engine pair and connectivity state for one dedup key
///
/// Connect and disconnect are idempotent and single-flight: concurrent callers
/// serialize on the transition lock, and only the first one does any work.
pub struct Handle {
    key: DedupKey,
    backend: DatabaseType,
    url: String,
    engine: Arc<dyn SchemaEngine>,
    client: Arc<dyn AsyncClient>,
    connected: AtomicBool,
    transition: Mutex<()>,
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("key", &self.key)
            .field("backend", &self.backend)
            .field("url", &self.url)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Handle {
    /// `url` is used for logging only and must already be redacted
    pub fn new(
        key: DedupKey,
        backend: DatabaseType,
        url: impl Into<String>,
        engine: Arc<dyn SchemaEngine>,
        client: Arc<dyn AsyncClient>,
    ) -> Self {
        Self {
            key,
            backend,
            url: url.into(),
            engine,
            client,
            connected: AtomicBool::new(false),
            transition: Mutex::new(()),
        }
    }

    /// Build the backend engine pair for `connection`
    pub fn for_connection(connection: &Connection) -> Result<Self> {
        let backend = connection.backend().ok_or_else(|| {
            PkgDbError::connection_config(
                connection.dedup_key.as_str(),
                format!("unsupported driver '{}'", connection.driver),
            )
        })?;
        let (engine, client) = super::build(connection)?;
        Ok(Self::new(
            connection.dedup_key.clone(),
            backend,
            connection.redacted_url(),
            engine,
            client,
        ))
    }

    #[must_use]
    pub fn key(&self) -> &DedupKey {
        &self.key
    }

    /// Redacted URL of the connection that built this handle
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn backend(&self) -> DatabaseType {
        self.backend
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Open the pool; returns whether this call performed the transition
    pub async fn connect(&self) -> Result<bool> {
        let _guard = self.transition.lock().await;
        if self.is_connected() {
            tracing::debug!(key = %self.key, "Already connected");
            return Ok(false);
        }
        self.client.open().await?;
        self.connected.store(true, Ordering::Release);
        tracing::info!(key = %self.key, url = %self.url, "Connected");
        Ok(true)
    }

    /// Close the pool; returns whether this call performed the transition
    pub async fn disconnect(&self) -> Result<bool> {
        let _guard = self.transition.lock().await;
        if !self.is_connected() {
            tracing::warn!(key = %self.key, "Disconnect requested but not connected");
            return Ok(false);
        }
        self.connected.store(false, Ordering::Release);
        self.client.close().await?;
        tracing::info!(key = %self.key, url = %self.url, "Disconnected");
        Ok(true)
    }

    fn client(&self) -> Result<&dyn AsyncClient> {
        if self.is_connected() {
            Ok(self.client.as_ref())
        } else {
            Err(PkgDbError::NotConnected(self.key.to_string()))
        }
    }

    pub async fn fetch_all(&self, query: &str, params: Option<&ParamSet>) -> Result<Vec<Row>> {
        let params = params.map_or(&[][..], Vec::as_slice);
        self.client()?.fetch_all(query, params).await
    }

    pub async fn fetch_one(&self, query: &str, params: Option<&ParamSet>) -> Result<Option<Row>> {
        let params = params.map_or(&[][..], Vec::as_slice);
        self.client()?.fetch_one(query, params).await
    }

    /// A list of parameter sets runs as a batch; anything else runs once
    pub async fn execute(&self, query: &str, params: Option<&Params>) -> Result<ExecuteResult> {
        let client = self.client()?;
        match params {
            Some(Params::Many(sets)) => client.execute_many(query, sets).await,
            Some(Params::One(set)) => client.execute(query, set).await,
            None => client.execute(query, &[]).await,
        }
    }

    /// Create tables through the schema engine, in the order given
    pub async fn create_tables(&self, tables: &[&Table]) -> Result<()> {
        let statements: Vec<String> = tables.iter().map(|t| t.create_sql(self.backend)).collect();
        self.engine.execute_batch(&statements).await?;
        for table in tables {
            tracing::info!(key = %self.key, table = %table.full_name, "Created table");
        }
        Ok(())
    }

    /// Drop tables through the schema engine, in the order given
    pub async fn drop_tables(&self, tables: &[&Table]) -> Result<()> {
        let statements: Vec<String> = tables.iter().map(|t| t.drop_sql(self.backend)).collect();
        self.engine.execute_batch(&statements).await?;
        for table in tables {
            tracing::info!(key = %self.key, table = %table.full_name, "Dropped table");
        }
        Ok(())
    }
}

/// Exactly one handle per dedup key
#[derive(Debug, Default)]
pub struct HandleSet {
    handles: BTreeMap<DedupKey, Arc<Handle>>,
}

impl HandleSet {
    /// Return the handle for `connection`'s key, constructing it on first sight
    pub fn ensure_handle(&mut self, connection: &Connection) -> Result<Arc<Handle>> {
        if let Some(handle) = self.handles.get(&connection.dedup_key) {
            return Ok(Arc::clone(handle));
        }
        let handle = Arc::new(Handle::for_connection(connection)?);
        tracing::debug!(key = %connection.dedup_key, backend = %handle.backend(), "Created handle");
        self.handles.insert(connection.dedup_key.clone(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Install a prebuilt handle unless one exists for its key
    #[cfg(test)]
    fn insert(&mut self, handle: Handle) -> Arc<Handle> {
        Arc::clone(self.handles.entry(handle.key().clone()).or_insert_with(|| Arc::new(handle)))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Arc<Handle>> {
        self.handles.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Handle>> {
        self.handles.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Connect every handle in key order, stopping at the first failure
    pub async fn connect_all(&self) -> Result<()> {
        for handle in self.handles.values() {
            handle.connect().await?;
        }
        Ok(())
    }

    /// Disconnect every handle; all are attempted and the first error is returned
    pub async fn disconnect_all(&self) -> Result<()> {
        let mut first_error = None;
        for handle in self.handles.values() {
            if !handle.is_connected() {
                continue;
            }
            if let Err(e) = handle.disconnect().await {
                tracing::error!(key = %handle.key(), error = %e, "Disconnect failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
