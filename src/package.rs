//! Packages: the unit that declares connections, tables and seeders

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::{PackageDatabase, RawConnection};
use crate::registry::Registry;
use crate::schema::TableDef;

/// Constructor function producing a table declaration
pub type TableModule = fn() -> TableDef;

/// Where a table declaration comes from
#[derive(Debug, Clone)]
pub enum TableSource {
    Module(TableModule),
    Declared(TableDef),
}

impl TableSource {
    #[must_use]
    pub fn load(&self) -> TableDef {
        match self {
            Self::Module(module) => module(),
            Self::Declared(def) => def.clone(),
        }
    }
}

/// Populates tables with data
///
/// Seeders run after the startup transition and reach the database through
/// the registry, exactly like application code.
#[async_trait]
pub trait Seeder: Send + Sync {
    /// Unique name; a seeder registered twice under one name runs once
    fn name(&self) -> &str;

    async fn seed(&self, registry: &Registry) -> anyhow::Result<()>;
}

fn enabled() -> bool {
    true
}

/// Which kinds of declarations a package contributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    #[serde(default = "enabled")]
    pub models: bool,
    #[serde(default = "enabled")]
    pub tables: bool,
    #[serde(default = "enabled")]
    pub seeders: bool,
}

impl Default for Registers {
    fn default() -> Self {
        Self { models: true, tables: true, seeders: true }
    }
}

/// A package as handed to aggregation
#[derive(Clone)]
pub struct Package {
    name: String,
    main: bool,
    registers: Registers,
    database: PackageDatabase,
    models: Vec<TableSource>,
    tables: Vec<TableSource>,
    seeders: Vec<Arc<dyn Seeder>>,
}

impl fmt::Debug for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seeders: Vec<&str> = self.seeders.iter().map(|s| s.name()).collect();
        f.debug_struct("Package")
            .field("name", &self.name)
            .field("main", &self.main)
            .field("registers", &self.registers)
            .field("database", &self.database)
            .field("models", &self.models.len())
            .field("tables", &self.tables.len())
            .field("seeders", &seeders)
            .finish()
    }
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            main: false,
            registers: Registers::default(),
            database: PackageDatabase::default(),
            models: Vec::new(),
            tables: Vec::new(),
            seeders: Vec::new(),
        }
    }

    /// Mark this package as the running application
    #[must_use]
    pub fn main(mut self, main: bool) -> Self {
        self.main = main;
        self
    }

    #[must_use]
    pub fn registers(mut self, registers: Registers) -> Self {
        self.registers = registers;
        self
    }

    #[must_use]
    pub fn database(mut self, database: PackageDatabase) -> Self {
        self.database = database;
        self
    }

    #[must_use]
    pub fn default_connection(mut self, name: impl Into<String>) -> Self {
        self.database.default = Some(name.into());
        self
    }

    #[must_use]
    pub fn connection(mut self, name: impl Into<String>, raw: RawConnection) -> Self {
        self.database.connections.insert(name.into(), raw);
        self
    }

    #[must_use]
    pub fn model(mut self, module: TableModule) -> Self {
        self.models.push(TableSource::Module(module));
        self
    }

    #[must_use]
    pub fn declare_model(mut self, def: TableDef) -> Self {
        self.models.push(TableSource::Declared(def));
        self
    }

    #[must_use]
    pub fn table(mut self, module: TableModule) -> Self {
        self.tables.push(TableSource::Module(module));
        self
    }

    #[must_use]
    pub fn declare_table(mut self, def: TableDef) -> Self {
        self.tables.push(TableSource::Declared(def));
        self
    }

    #[must_use]
    pub fn seeder(mut self, seeder: impl Seeder + 'static) -> Self {
        self.seeders.push(Arc::new(seeder));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_main(&self) -> bool {
        self.main
    }

    #[must_use]
    pub fn registers_flags(&self) -> Registers {
        self.registers
    }

    #[must_use]
    pub fn database_config(&self) -> &PackageDatabase {
        &self.database
    }

    pub(crate) fn into_parts(self) -> PackageParts {
        PackageParts {
            name: self.name,
            main: self.main,
            registers: self.registers,
            database: self.database,
            models: self.models,
            tables: self.tables,
            seeders: self.seeders,
        }
    }
}

pub(crate) struct PackageParts {
    pub name: String,
    pub main: bool,
    pub registers: Registers,
    pub database: PackageDatabase,
    pub models: Vec<TableSource>,
    pub tables: Vec<TableSource>,
    pub seeders: Vec<Arc<dyn Seeder>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> TableDef {
        TableDef::new("tags").connection("app1")
    }

    #[test]
    fn test_registers_default_all_enabled() {
        let registers: Registers = serde_json::from_str(r#"{"seeders": false}"#).unwrap();
        assert!(registers.models);
        assert!(registers.tables);
        assert!(!registers.seeders);
    }

    #[test]
    fn test_builder_collects_declarations() {
        let package = Package::new("acme.app1")
            .main(true)
            .default_connection("app1")
            .connection(
                "app1",
                RawConnection {
                    driver: Some("sqlite".into()),
                    database: Some(":memory:".into()),
                    ..RawConnection::default()
                },
            )
            .table(tags)
            .declare_model(TableDef::new("posts"));

        assert!(package.is_main());
        assert_eq!(package.database_config().default.as_deref(), Some("app1"));
        assert_eq!(package.database_config().connections.len(), 1);

        let parts = package.into_parts();
        assert_eq!(parts.tables[0].load().name, "tags");
        assert_eq!(parts.models[0].load().name, "posts");
    }
}
