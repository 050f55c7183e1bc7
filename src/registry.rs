//! Registry facade
//!
//! The read-only view produced by aggregation: the flattened connection map,
//! the default connection, metadata partitions, engine handles and the
//! package list. Every lookup resolves a [`Target`] to a dedup key first.
//!
//! # Key Resolution
//! 1. An explicit dedup key wins
//! 2. Otherwise the named connection's key
//! 3. Otherwise the default connection's key

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::connection::{split_qualified, Connection, DedupKey};
use crate::engine::{ExecuteResult, Handle, HandleSet, ParamSet, Params, Row};
use crate::error::{PkgDbError, Result};
use crate::package::Seeder;
use crate::schema::{MetadataPartition, PartitionStore, Table};

/// What a lookup addresses: a connection name, a dedup key, or the default
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Target<'a> {
    connection: Option<&'a str>,
    key: Option<&'a str>,
}

impl<'a> Target<'a> {
    #[must_use]
    pub const fn new(connection: Option<&'a str>, key: Option<&'a str>) -> Self {
        Self { connection, key }
    }

    #[must_use]
    pub const fn named(connection: &'a str) -> Self {
        Self { connection: Some(connection), key: None }
    }

    #[must_use]
    pub const fn key(key: &'a str) -> Self {
        Self { connection: None, key: Some(key) }
    }
}

/// A package after aggregation
pub struct RegisteredPackage {
    pub name: String,
    pub main: bool,
    /// The package's own normalized connections, before name overrides
    pub connections: Vec<Connection>,
    pub seeders: Vec<Arc<dyn Seeder>>,
}

impl fmt::Debug for RegisteredPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seeders: Vec<&str> = self.seeders.iter().map(|s| s.name()).collect();
        f.debug_struct("RegisteredPackage")
            .field("name", &self.name)
            .field("main", &self.main)
            .field("connections", &self.connections)
            .field("seeders", &seeders)
            .finish()
    }
}

#[derive(Debug)]
pub struct Registry {
    default_connection: Option<String>,
    connections: BTreeMap<String, Connection>,
    packages: Vec<RegisteredPackage>,
    partitions: PartitionStore,
    handles: HandleSet,
}

impl Registry {
    pub(crate) fn new(
        default_connection: Option<String>,
        connections: BTreeMap<String, Connection>,
        packages: Vec<RegisteredPackage>,
        partitions: PartitionStore,
        handles: HandleSet,
    ) -> Self {
        Self { default_connection, connections, packages, partitions, handles }
    }

    #[must_use]
    pub fn default_connection(&self) -> Option<&str> {
        self.default_connection.as_deref()
    }

    /// Flattened connection map; a later package wins on a name collision
    #[must_use]
    pub fn connections(&self) -> &BTreeMap<String, Connection> {
        &self.connections
    }

    #[must_use]
    pub fn packages(&self) -> &[RegisteredPackage] {
        &self.packages
    }

    #[must_use]
    pub fn partitions(&self) -> &PartitionStore {
        &self.partitions
    }

    #[must_use]
    pub fn handles(&self) -> &HandleSet {
        &self.handles
    }

    fn known_connections(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    /// Look up a connection by name, or the default connection
    pub fn connection(&self, name: Option<&str>) -> Result<&Connection> {
        let name = match name {
            Some(name) => name,
            None => self.default_connection.as_deref().ok_or_else(|| {
                PkgDbError::NoDefaultConnection { known: self.known_connections() }
            })?,
        };
        self.connections
            .get(name)
            .ok_or_else(|| PkgDbError::unknown_connection(name, self.known_connections()))
    }

    pub fn resolve_key(&self, target: Target<'_>) -> Result<DedupKey> {
        if let Some(key) = target.key {
            return Ok(DedupKey::new(key));
        }
        let key = self.connection(target.connection)?.dedup_key.clone();
        tracing::debug!(connection = ?target.connection, key = %key, "Resolved dedup key");
        Ok(key)
    }

    pub fn partition(&self, target: Target<'_>) -> Result<&MetadataPartition> {
        let key = self.resolve_key(target)?;
        self.partitions.get(key.as_str()).ok_or_else(|| self.unknown_key(&key))
    }

    pub fn tables(&self, target: Target<'_>) -> Result<&[Table]> {
        Ok(self.partition(target)?.tables())
    }

    /// Prefixed name of a logical table
    ///
    /// `table` may be dotted (`connection.table`); the dotted connection
    /// overrides `connection`.
    pub fn table_full_name(&self, table: &str, connection: Option<&str>) -> Result<String> {
        let (qualifier, name) = split_qualified(table);
        Ok(self.connection(qualifier.or(connection))?.table_name(name))
    }

    /// Registered table for a logical name, if any
    pub fn table(&self, table: &str, connection: Option<&str>) -> Result<Option<&Table>> {
        let (qualifier, name) = split_qualified(table);
        let connection = self.connection(qualifier.or(connection))?;
        let full_name = connection.table_name(name);
        Ok(self.partitions.get(connection.dedup_key.as_str()).and_then(|p| p.table(&full_name)))
    }

    pub fn handle(&self, target: Target<'_>) -> Result<&Arc<Handle>> {
        let key = self.resolve_key(target)?;
        self.handles.get(key.as_str()).ok_or_else(|| self.unknown_key(&key))
    }

    fn unknown_key(&self, key: &DedupKey) -> PkgDbError {
        let known = self.handles.iter().map(|h| h.key().to_string()).collect();
        PkgDbError::unknown_connection(key.as_str(), known)
    }

    /// Packages that declared a connection with the target's dedup key
    pub fn packages_for(&self, target: Target<'_>) -> Result<Vec<&RegisteredPackage>> {
        let key = self.resolve_key(target)?;
        Ok(self
            .packages
            .iter()
            .filter(|p| p.connections.iter().any(|c| c.dedup_key == key))
            .collect())
    }

    /// Distinct dedup keys for connection names, in first-seen order
    pub fn dedup_keys(&self, names: &[&str]) -> Result<Vec<DedupKey>> {
        let mut keys: Vec<DedupKey> = Vec::new();
        for name in names {
            let key = self.resolve_key(Target::named(name))?;
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    pub async fn fetch_all(
        &self,
        query: &str,
        params: Option<&ParamSet>,
        target: Target<'_>,
    ) -> Result<Vec<Row>> {
        self.handle(target)?.fetch_all(query, params).await
    }

    pub async fn fetch_one(
        &self,
        query: &str,
        params: Option<&ParamSet>,
        target: Target<'_>,
    ) -> Result<Option<Row>> {
        self.handle(target)?.fetch_one(query, params).await
    }

    pub async fn execute(
        &self,
        query: &str,
        params: Option<&Params>,
        target: Target<'_>,
    ) -> Result<ExecuteResult> {
        self.handle(target)?.execute(query, params).await
    }

    pub async fn connect(&self, target: Target<'_>) -> Result<bool> {
        self.handle(target)?.connect().await
    }

    pub async fn disconnect(&self, target: Target<'_>) -> Result<bool> {
        self.handle(target)?.disconnect().await
    }

    /// Process startup: open every handle's pool
    pub async fn startup(&self) -> Result<()> {
        tracing::debug!(handles = self.handles.len(), "Connecting all databases");
        self.handles.connect_all().await
    }

    /// Process shutdown: close every open pool
    pub async fn shutdown(&self) -> Result<()> {
        tracing::debug!(handles = self.handles.len(), "Disconnecting all databases");
        self.handles.disconnect_all().await
    }
}
