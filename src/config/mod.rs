//! Configuration Management
//!
//! Loads package database declarations and app-level overrides from JSON files.
//!
//! # Configuration Locations
//! - Local: `.pkgdb/config.json` (team-shareable, per-project)
//! - Global: `~/.config/pkgdb/config.json` (per-user)
//!
//! # Resolution Precedence
//! 1. Explicit `--config <path>` (replaces discovery entirely)
//! 2. Local config file, deep-merged over
//! 3. Global config file
//!
//! # File Format
//! ```json
//! {
//!   "packages": [
//!     {
//!       "name": "acme.wiki",
//!       "main": true,
//!       "database": {
//!         "default": "wiki",
//!         "connections": {
//!           "wiki": { "driver": "sqlite", "database": "wiki.db", "prefix": "wiki_" }
//!         }
//!       },
//!       "tables": [ { "name": "posts", "connection": "wiki", "columns": [] } ]
//!     }
//!   ],
//!   "overrides": {
//!     "acme.wiki": { "connections": { "wiki": { "database": "/var/lib/wiki.db" } } }
//!   }
//! }
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PkgDbError, Result};
use crate::package::{Package, Registers};
use crate::schema::TableDef;

/// Raw connection record as declared by a package
///
/// Every field is optional at this stage; required-field validation happens
/// during normalization so the error can name the declaring package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Environment variable name for password (if not storing password directly)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl RawConnection {
    /// Resolve the password, preferring `password_env` over an inline password
    pub fn resolve_password(&self) -> std::result::Result<Option<String>, String> {
        if let Some(env_var) = &self.password_env {
            return std::env::var(env_var)
                .map(Some)
                .map_err(|_| format!("Environment variable {env_var} not found for password"));
        }
        Ok(self.password.clone())
    }
}

/// A package's database section: a default pointer plus named connections
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDatabase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    /// Declaration order is kept; the first connection to reach a database builds its handle
    pub connections: IndexMap<String, RawConnection>,
}

impl PackageDatabase {
    /// Apply app-level overrides with merge semantics (override wins at every leaf)
    pub fn with_overrides(&self, overrides: &Value) -> Result<Self> {
        let mut tree = serde_json::to_value(self)
            .map_err(|e| PkgDbError::config_file(format!("Could not serialize database config: {e}")))?;
        merge(&mut tree, overrides);
        serde_json::from_value(tree)
            .map_err(|e| PkgDbError::config_file(format!("Invalid database override: {e}")))
    }
}

/// One package as described in a config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageConfig {
    pub name: String,
    /// Whether this is the running application's own package
    #[serde(default)]
    pub main: bool,
    #[serde(default)]
    pub registers: Registers,
    #[serde(default)]
    pub database: PackageDatabase,
    #[serde(default)]
    pub models: Vec<TableDef>,
    #[serde(default)]
    pub tables: Vec<TableDef>,
}

impl PackageConfig {
    /// Build a [`Package`] with declarative tables and models
    #[must_use]
    pub fn into_package(self) -> Package {
        let mut package = Package::new(self.name)
            .main(self.main)
            .registers(self.registers)
            .database(self.database);
        for model in self.models {
            package = package.declare_model(model);
        }
        for table in self.tables {
            package = package.declare_table(table);
        }
        package
    }
}

/// Complete configuration file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub packages: Vec<PackageConfig>,
    /// Per-package database overrides, keyed by package name
    #[serde(default)]
    pub overrides: Map<String, Value>,
}

impl AppConfig {
    /// Parse an already-merged JSON tree
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| PkgDbError::config_file(format!("Invalid config file format: {e}")))
    }

    /// Load from an explicit path; the file must exist
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PkgDbError::config_file(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        Self::from_value(load_tree(path)?)
    }

    /// Load the global file, then deep-merge the local file over it
    pub fn load_with_precedence() -> Result<Self> {
        let mut tree = Value::Object(Map::new());
        for path in [global_config_path()?, local_config_path()?] {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading config file");
                merge(&mut tree, &load_tree(&path)?);
            }
        }
        Self::from_value(tree)
    }

    /// Apply overrides and produce packages in declaration order
    pub fn into_packages(self) -> Result<Vec<Package>> {
        let AppConfig { packages, overrides } = self;
        if let Some(unknown) =
            overrides.keys().find(|name| !packages.iter().any(|p| &p.name == *name))
        {
            tracing::warn!(package = %unknown, "Override targets a package that is not declared");
        }

        packages
            .into_iter()
            .map(|mut config| {
                if let Some(package_overrides) = overrides.get(&config.name) {
                    config.database = config.database.with_overrides(package_overrides)?;
                }
                Ok(config.into_package())
            })
            .collect()
    }
}

/// Get path to local config file (`.pkgdb/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        PkgDbError::config_file(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".pkgdb").join("config.json"))
}

/// Get path to global config file (`~/.config/pkgdb/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| PkgDbError::config_file("Could not determine user config directory"))?;

    Ok(config_dir.join("pkgdb").join("config.json"))
}

fn load_tree(path: &Path) -> Result<Value> {
    let contents = fs::read_to_string(path).map_err(|e| {
        PkgDbError::config_file(format!("Could not read config file {}: {e}", path.display()))
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        PkgDbError::config_file(format!("Invalid JSON in config file {}: {e}", path.display()))
    })
}

/// Deep merge `source` into `target`; `source` wins at every leaf
///
/// Objects merge recursively. Arrays and scalars replace.
pub fn merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}

/// Deep merge that only fills keys absent from `target`
pub fn defaults(target: &mut Value, source: &Value) {
    if let (Value::Object(target), Value::Object(source)) = (target, source) {
        for (key, value) in source {
            match target.get_mut(key) {
                Some(existing) => defaults(existing, value),
                None => {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_merge_source_wins_at_leaves() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "list": [1, 2], "keep": true});
        merge(&mut target, &json!({"a": {"b": 10, "d": 4}, "list": [3]}));
        assert_eq!(target, json!({"a": {"b": 10, "c": 2, "d": 4}, "list": [3], "keep": true}));
    }

    #[test]
    fn test_defaults_never_overrides() {
        let mut target = json!({"a": {"b": 1}, "x": "mine"});
        defaults(&mut target, &json!({"a": {"b": 99, "c": 3}, "x": "theirs", "y": 5}));
        assert_eq!(target, json!({"a": {"b": 1, "c": 3}, "x": "mine", "y": 5}));
    }

    #[test]
    fn test_raw_connection_omits_absent_fields() {
        let raw = RawConnection {
            driver: Some("sqlite".into()),
            database: Some(":memory:".into()),
            ..RawConnection::default()
        };
        let json = serde_json::to_string(&raw).unwrap();
        assert_eq!(json, r#"{"driver":"sqlite","database":":memory:"}"#);
    }

    #[test]
    fn test_resolve_password_direct() {
        let raw = RawConnection { password: Some("pass".into()), ..RawConnection::default() };
        assert_eq!(raw.resolve_password().unwrap(), Some("pass".to_string()));
    }

    #[test]
    fn test_resolve_password_missing_env_var() {
        let raw = RawConnection {
            password: Some("inline".into()),
            password_env: Some("PKGDB_TEST_NONEXISTENT_VAR".into()),
            ..RawConnection::default()
        };
        let err = raw.resolve_password().unwrap_err();
        assert!(err.contains("Environment variable PKGDB_TEST_NONEXISTENT_VAR not found"));
    }

    #[test]
    fn test_connections_keep_declaration_order() {
        let database: PackageDatabase = serde_json::from_value(json!({
            "connections": {
                "zeta": {"driver": "sqlite", "database": "z.db"},
                "alpha": {"driver": "sqlite", "database": "a.db"}
            }
        }))
        .unwrap();

        let overridden = database
            .with_overrides(&json!({"connections": {"beta": {"driver": "sqlite", "database": "b.db"}}}))
            .unwrap();
        let names: Vec<&str> = overridden.connections.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["zeta", "alpha", "beta"]);
    }

    #[test]
    fn test_database_overrides_replace_leaves() {
        let mut database = PackageDatabase { default: Some("wiki".into()), ..Default::default() };
        database.connections.insert(
            "wiki".into(),
            RawConnection {
                driver: Some("mysql".into()),
                host: Some("localhost".into()),
                port: Some(3306),
                database: Some("wiki".into()),
                prefix: Some("wiki_".into()),
                ..RawConnection::default()
            },
        );

        let overridden = database
            .with_overrides(&json!({"connections": {"wiki": {"host": "db", "database": "shared"}}}))
            .unwrap();
        let wiki = &overridden.connections["wiki"];
        assert_eq!(wiki.host.as_deref(), Some("db"));
        assert_eq!(wiki.database.as_deref(), Some("shared"));
        assert_eq!(wiki.prefix.as_deref(), Some("wiki_"));
        assert_eq!(overridden.default.as_deref(), Some("wiki"));
    }

    #[test]
    fn test_app_config_parses_and_applies_overrides() {
        let config = AppConfig::from_value(json!({
            "packages": [
                {
                    "name": "acme.wiki",
                    "database": {
                        "default": "wiki",
                        "connections": {"wiki": {"driver": "sqlite", "database": "wiki.db"}}
                    },
                    "tables": [{"name": "posts", "columns": [{"name": "id", "type": "integer", "primary_key": true}]}]
                },
                {"name": "acme.app", "main": true}
            ],
            "overrides": {
                "acme.wiki": {"connections": {"wiki": {"database": "/srv/wiki.db"}}}
            }
        }))
        .unwrap();

        let packages = config.into_packages().unwrap();
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name(), "acme.wiki");
        assert_eq!(
            packages[0].database_config().connections["wiki"].database.as_deref(),
            Some("/srv/wiki.db")
        );
        assert!(packages[1].is_main());
        assert!(packages[0].registers_flags().tables);
    }

    #[test]
    fn test_from_file_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::from_file(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_FILE_ERROR");
    }

    #[test]
    fn test_from_file_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let err = AppConfig::from_file(&path).unwrap_err();
        assert!(err.message().contains("Invalid JSON"));
    }

    #[test]
    fn test_local_config_path_location() {
        let path = local_config_path().unwrap();
        assert!(path.ends_with(".pkgdb/config.json"));
    }
}
