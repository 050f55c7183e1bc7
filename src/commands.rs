//! `db` command layer
//!
//! Schema tooling that works per physical database: connection names are
//! first collapsed into distinct dedup keys, so two names sharing a database
//! trigger one create, one drop, and one run of each seeder.
//!
//! Host applications that register tables and seeders in code call [`run`]
//! with their own booted [`Registry`].

use clap::Subcommand;
use serde::Serialize;
use std::collections::HashSet;

use crate::connection::DedupKey;
use crate::error::{PkgDbError, Result};
use crate::registry::{Registry, Target};

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum DbCommand {
    /// Create all tables for the given connections
    Create {
        /// Connection names (comma or space separated)
        #[arg(value_delimiter = ',', required = true)]
        connections: Vec<String>,
    },

    /// Drop all tables for the given connections
    Drop {
        #[arg(value_delimiter = ',', required = true)]
        connections: Vec<String>,
    },

    /// Drop then create all tables
    Recreate {
        #[arg(value_delimiter = ',', required = true)]
        connections: Vec<String>,
    },

    /// Run the seeders of every package using the given connections
    Seed {
        #[arg(value_delimiter = ',', required = true)]
        connections: Vec<String>,
    },

    /// Recreate all tables, then seed
    Reseed {
        #[arg(value_delimiter = ',', required = true)]
        connections: Vec<String>,
    },

    /// List connections with their dedup keys
    Connections,
}

impl DbCommand {
    /// Command name as reported in output envelopes
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "db create",
            Self::Drop { .. } => "db drop",
            Self::Recreate { .. } => "db recreate",
            Self::Seed { .. } => "db seed",
            Self::Reseed { .. } => "db reseed",
            Self::Connections => "db connections",
        }
    }

    /// Connection names the command operates on, trimmed and non-empty
    #[must_use]
    pub fn connection_names(&self) -> Vec<&str> {
        let names = match self {
            Self::Create { connections }
            | Self::Drop { connections }
            | Self::Recreate { connections }
            | Self::Seed { connections }
            | Self::Reseed { connections } => connections.as_slice(),
            Self::Connections => &[][..],
        };
        names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()).collect()
    }

    /// Whether the command needs the startup transition before running
    #[must_use]
    pub const fn requires_connection(&self) -> bool {
        !matches!(self, Self::Connections)
    }
}

/// Tables touched in one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionReport {
    pub dedup_key: DedupKey,
    pub tables: Vec<String>,
}

/// Seeders run for one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub dedup_key: DedupKey,
    pub seeders: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub name: String,
    pub package: String,
    pub driver: String,
    pub url: String,
    pub dedup_key: DedupKey,
    pub prefix: String,
    pub default: bool,
    /// Other connection names resolving to the same dedup key
    pub shares_with: Vec<String>,
}

/// Command result, serialized as the envelope's `data`
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CommandOutput {
    Partitions(Vec<PartitionReport>),
    Seeded(Vec<SeedReport>),
    Reseeded { partitions: Vec<PartitionReport>, seeded: Vec<SeedReport> },
    Connections(Vec<ConnectionReport>),
}

impl CommandOutput {
    /// Number of partitions the command touched, when meaningful
    #[must_use]
    pub fn partitions(&self) -> Option<usize> {
        match self {
            Self::Partitions(reports) => Some(reports.len()),
            Self::Seeded(reports) => Some(reports.len()),
            Self::Reseeded { partitions, .. } => Some(partitions.len()),
            Self::Connections(_) => None,
        }
    }
}

/// Resolve every name up front so an unknown one fails before any work
pub fn resolve(registry: &Registry, command: &DbCommand) -> Result<Vec<DedupKey>> {
    registry.dedup_keys(&command.connection_names())
}

pub async fn run(registry: &Registry, command: &DbCommand) -> Result<CommandOutput> {
    let keys = resolve(registry, command)?;
    match command {
        DbCommand::Create { .. } => create_tables(registry, &keys).await.map(CommandOutput::Partitions),
        DbCommand::Drop { .. } => drop_tables(registry, &keys).await.map(CommandOutput::Partitions),
        DbCommand::Recreate { .. } => {
            recreate_tables(registry, &keys).await.map(CommandOutput::Partitions)
        }
        DbCommand::Seed { .. } => seed(registry, &keys).await.map(CommandOutput::Seeded),
        DbCommand::Reseed { .. } => {
            let partitions = recreate_tables(registry, &keys).await?;
            let seeded = seed(registry, &keys).await?;
            Ok(CommandOutput::Reseeded { partitions, seeded })
        }
        DbCommand::Connections => Ok(CommandOutput::Connections(list_connections(registry))),
    }
}

/// Create every table of each partition, dependencies first
pub async fn create_tables(registry: &Registry, keys: &[DedupKey]) -> Result<Vec<PartitionReport>> {
    let mut reports = Vec::with_capacity(keys.len());
    for key in keys {
        let target = Target::key(key.as_str());
        let tables = registry.partition(target)?.sorted_tables()?;
        tracing::info!(key = %key, tables = tables.len(), "Creating tables");
        registry.handle(target)?.create_tables(&tables).await?;
        reports.push(PartitionReport {
            dedup_key: key.clone(),
            tables: tables.iter().map(|t| t.full_name.clone()).collect(),
        });
    }
    Ok(reports)
}

/// Drop every table of each partition, dependents first
pub async fn drop_tables(registry: &Registry, keys: &[DedupKey]) -> Result<Vec<PartitionReport>> {
    let mut reports = Vec::with_capacity(keys.len());
    for key in keys {
        let target = Target::key(key.as_str());
        let mut tables = registry.partition(target)?.sorted_tables()?;
        tables.reverse();
        tracing::info!(key = %key, tables = tables.len(), "Dropping tables");
        registry.handle(target)?.drop_tables(&tables).await?;
        reports.push(PartitionReport {
            dedup_key: key.clone(),
            tables: tables.iter().map(|t| t.full_name.clone()).collect(),
        });
    }
    Ok(reports)
}

pub async fn recreate_tables(
    registry: &Registry,
    keys: &[DedupKey],
) -> Result<Vec<PartitionReport>> {
    drop_tables(registry, keys).await?;
    create_tables(registry, keys).await
}

/// Run each reachable seeder once, in package then declaration order
pub async fn seed(registry: &Registry, keys: &[DedupKey]) -> Result<Vec<SeedReport>> {
    let mut ran: HashSet<String> = HashSet::new();
    let mut reports = Vec::with_capacity(keys.len());
    for key in keys {
        let mut seeders = Vec::new();
        for package in registry.packages_for(Target::key(key.as_str()))? {
            for seeder in &package.seeders {
                let name = seeder.name().to_string();
                if !ran.insert(name.clone()) {
                    continue;
                }
                tracing::info!(key = %key, package = %package.name, seeder = %name, "Running seeder");
                seeder
                    .seed(registry)
                    .await
                    .map_err(|source| PkgDbError::Seeder { name: name.clone(), source })?;
                seeders.push(name);
            }
        }
        reports.push(SeedReport { dedup_key: key.clone(), seeders });
    }
    Ok(reports)
}

pub fn list_connections(registry: &Registry) -> Vec<ConnectionReport> {
    let connections = registry.connections();
    connections
        .iter()
        .map(|(name, connection)| ConnectionReport {
            name: name.clone(),
            package: connection.package.clone(),
            driver: connection.driver.clone(),
            url: connection.redacted_url(),
            dedup_key: connection.dedup_key.clone(),
            prefix: connection.prefix.clone(),
            default: registry.default_connection() == Some(name.as_str()),
            shares_with: connections
                .iter()
                .filter(|(other, c)| *other != name && c.dedup_key == connection.dedup_key)
                .map(|(other, _)| other.clone())
                .collect(),
        })
        .collect()
}
