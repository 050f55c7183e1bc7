//! Configuration File Tests
//!
//! Packages declared in JSON files, app-level overrides and the full
//! file-to-database path used by the CLI.

#![cfg(feature = "sqlite")]

use pkgdb::commands::{self, DbCommand};
use pkgdb::{aggregate, AppConfig, Target};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

fn write_config(dir: &TempDir, config: &serde_json::Value) -> std::path::PathBuf {
    let path = dir.path().join("config.json");
    fs::write(&path, serde_json::to_string_pretty(config).unwrap()).unwrap();
    path
}

fn sample(dir: &TempDir) -> serde_json::Value {
    let database = |file: &str| dir.path().join(file).to_string_lossy().into_owned();
    json!({
        "packages": [
            {
                "name": "acme.wiki",
                "database": {
                    "default": "wiki",
                    "connections": {
                        "wiki": { "driver": "sqlite", "database": database("wiki.db"), "prefix": "wiki_" }
                    }
                },
                "tables": [
                    {
                        "name": "pages",
                        "connection": "wiki",
                        "columns": [
                            { "name": "id", "type": "integer", "primary_key": true, "autoincrement": true },
                            { "name": "body", "type": "text" }
                        ]
                    }
                ]
            },
            {
                "name": "acme.app",
                "main": true,
                "database": {
                    "default": "app",
                    "connections": {
                        "app": { "driver": "sqlite", "database": database("app.db") }
                    }
                }
            }
        ],
        "overrides": {
            "acme.wiki": {
                "connections": { "wiki": { "database": database("app.db") } }
            }
        }
    })
}

#[test]
fn test_overrides_redirect_package_connection() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &sample(&dir));

    let registry = aggregate(AppConfig::from_file(&path).unwrap().into_packages().unwrap()).unwrap();

    assert_eq!(registry.default_connection(), Some("app"));
    assert_eq!(
        registry.resolve_key(Target::named("wiki")).unwrap(),
        registry.resolve_key(Target::named("app")).unwrap()
    );
    // Prefix survives the override
    assert_eq!(registry.table_full_name("pages", Some("wiki")).unwrap(), "wiki_pages");
    assert_eq!(registry.partitions().len(), 1);
}

#[test]
fn test_missing_config_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let err = AppConfig::from_file(&dir.path().join("absent.json")).unwrap_err();
    assert_eq!(err.error_code(), "CONFIG_FILE_ERROR");
}

#[test]
fn test_invalid_json_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, "{ not json").unwrap();

    let err = AppConfig::from_file(&path).unwrap_err();
    assert_eq!(err.error_code(), "CONFIG_FILE_ERROR");
}

#[tokio::test]
async fn test_config_driven_create() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &sample(&dir));
    let registry = aggregate(AppConfig::from_file(&path).unwrap().into_packages().unwrap()).unwrap();
    registry.startup().await.unwrap();

    commands::run(&registry, &DbCommand::Create { connections: vec!["app".into()] })
        .await
        .unwrap();
    registry
        .execute("INSERT INTO wiki_pages (body) VALUES ('hello')", None, Target::named("app"))
        .await
        .unwrap();
    let rows = registry.fetch_all("SELECT body FROM wiki_pages", None, Target::default()).await.unwrap();
    assert_eq!(rows[0].get("body"), Some(&json!("hello")));

    registry.shutdown().await.unwrap();
    // wiki.db was never used after the override
    assert!(!dir.path().join("wiki.db").exists());
}
