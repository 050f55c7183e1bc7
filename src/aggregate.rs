//! Package aggregation
//!
//! Folds an ordered package list into a [`Registry`]:
//! 1. Every declared connection is normalized. Its dedup key gets a metadata
//!    partition and an engine handle on first sight. The flattened name map
//!    keeps the last declaration of each name.
//! 2. The default connection is the main package's default, otherwise the
//!    last default declared by any package.
//! 3. Models, then tables, are bound to connections through the flattened map
//!    and registered in their partition.

use std::collections::{BTreeMap, HashSet};

use crate::connection::{normalize, split_qualified, Connection};
use crate::engine::HandleSet;
use crate::error::{PkgDbError, Result};
use crate::package::{Package, TableSource};
use crate::registry::{RegisteredPackage, Registry};
use crate::schema::{PartitionStore, Table, TableDef};

pub fn aggregate(packages: Vec<Package>) -> Result<Registry> {
    let mut connections: BTreeMap<String, Connection> = BTreeMap::new();
    let mut partitions = PartitionStore::default();
    let mut handles = HandleSet::default();
    let mut registered = Vec::with_capacity(packages.len());
    let mut last_default = None;
    let mut app_default = None;
    let mut sources: Vec<(String, TableSource)> = Vec::new();
    let mut table_sources: Vec<(String, TableSource)> = Vec::new();

    for package in packages {
        let parts = package.into_parts();

        if let Some(default) = &parts.database.default {
            last_default = Some(default.clone());
            if parts.main {
                app_default = Some(default.clone());
            }
        }

        let mut declared = Vec::with_capacity(parts.database.connections.len());
        for (name, raw) in &parts.database.connections {
            let connection = normalize(name, raw, &parts.name)?;
            partitions.partition_for(&connection.dedup_key);
            handles.ensure_handle(&connection)?;
            if let Some(previous) = connections.insert(name.clone(), connection.clone()) {
                tracing::debug!(
                    connection = %name,
                    previous = %previous.package,
                    package = %parts.name,
                    "Connection name overridden by later package"
                );
            }
            declared.push(connection);
        }

        if parts.registers.models {
            sources.extend(parts.models.into_iter().map(|s| (parts.name.clone(), s)));
        }
        if parts.registers.tables {
            table_sources.extend(parts.tables.into_iter().map(|s| (parts.name.clone(), s)));
        }
        let seeders = if parts.registers.seeders {
            let mut seeder_names = HashSet::new();
            parts.seeders.into_iter().filter(|s| seeder_names.insert(s.name().to_string())).collect()
        } else {
            Vec::new()
        };

        registered.push(RegisteredPackage {
            name: parts.name,
            main: parts.main,
            connections: declared,
            seeders,
        });
    }

    let default = app_default.or(last_default);
    sources.extend(table_sources);
    for (package, source) in sources {
        let table = bind_table(source.load(), &connections, default.as_deref())?;
        tracing::debug!(
            package = %package,
            table = %table.full_name,
            key = %table.dedup_key,
            "Registered table"
        );
        partitions.register(table)?;
    }

    tracing::debug!(
        connections = connections.len(),
        partitions = partitions.len(),
        default = ?default,
        "Aggregated packages"
    );
    Ok(Registry::new(default, connections, registered, partitions, handles))
}

fn lookup<'a>(connections: &'a BTreeMap<String, Connection>, name: &str) -> Result<&'a Connection> {
    connections
        .get(name)
        .ok_or_else(|| PkgDbError::unknown_connection(name, connections.keys().cloned().collect()))
}

/// Bind a declaration to its connection, prefixing its name and foreign keys
fn bind_table(
    def: TableDef,
    connections: &BTreeMap<String, Connection>,
    default: Option<&str>,
) -> Result<Table> {
    let (qualifier, logical) = split_qualified(&def.name);
    let connection_name = qualifier
        .or(def.connection.as_deref())
        .or(default)
        .ok_or_else(|| PkgDbError::NoDefaultConnection {
            known: connections.keys().cloned().collect(),
        })?;
    let connection = lookup(connections, connection_name)?;

    let mut columns = def.columns.clone();
    for column in &mut columns {
        if let Some(fk) = &mut column.references {
            let (target_qualifier, target) = split_qualified(&fk.table);
            let target_connection = match target_qualifier {
                Some(name) => lookup(connections, name)?,
                None => connection,
            };
            fk.table = target_connection.table_name(target);
        }
    }

    Ok(Table {
        name: logical.to_string(),
        full_name: connection.table_name(logical),
        connection: connection_name.to_string(),
        dedup_key: connection.dedup_key.clone(),
        columns,
    })
}
