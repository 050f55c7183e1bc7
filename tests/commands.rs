//! `db` Command Tests
//!
//! Create, drop, seed and listing across packages that share `SQLite` files.

#![cfg(feature = "sqlite")]

use async_trait::async_trait;
use pkgdb::commands::{self, CommandOutput, DbCommand};
use pkgdb::{aggregate, Column, ColumnType, Package, RawConnection, Registry, Seeder, TableDef, Target};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn sqlite_at(dir: &TempDir, file: &str, prefix: &str) -> RawConnection {
    RawConnection {
        driver: Some("sqlite".into()),
        database: Some(dir.path().join(file).to_string_lossy().into_owned()),
        prefix: Some(prefix.into()),
        ..RawConnection::default()
    }
}

/// Inserts one order per run and counts its runs
struct OrderSeeder {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Seeder for OrderSeeder {
    fn name(&self) -> &str {
        "orders"
    }

    async fn seed(&self, registry: &Registry) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let table = registry.table_full_name("orders", Some("shop"))?;
        registry
            .execute(&format!("INSERT INTO {table} (total) VALUES (10)"), None, Target::named("shop"))
            .await?;
        Ok(())
    }
}

/// Counts runs without touching the database
struct CountingSeeder {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Seeder for CountingSeeder {
    fn name(&self) -> &str {
        "users"
    }

    async fn seed(&self, _registry: &Registry) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingSeeder;

#[async_trait]
impl Seeder for FailingSeeder {
    fn name(&self) -> &str {
        "broken"
    }

    async fn seed(&self, _registry: &Registry) -> anyhow::Result<()> {
        anyhow::bail!("fixture data missing")
    }
}

fn orders() -> TableDef {
    TableDef::new("orders")
        .connection("shop")
        .column(Column::id("id"))
        .column(Column::new("total", ColumnType::Integer).not_null())
}

fn line_items() -> TableDef {
    TableDef::new("billing.line_items")
        .column(Column::id("id"))
        .column(Column::new("order_id", ColumnType::Integer).references("shop.orders", "id"))
}

/// Two packages on one database file, plus an unrelated logs database
fn registry(dir: &TempDir, runs: &Arc<AtomicUsize>) -> Registry {
    aggregate(vec![
        Package::new("shop")
            .main(true)
            .default_connection("shop")
            .connection("shop", sqlite_at(dir, "shared.db", "shop_"))
            .table(orders)
            .seeder(OrderSeeder { runs: Arc::clone(runs) }),
        Package::new("billing")
            .connection("billing", sqlite_at(dir, "shared.db", "billing_"))
            .connection("logs", sqlite_at(dir, "logs.db", ""))
            .table(line_items)
            // Same seeder name registered again: runs once
            .seeder(OrderSeeder { runs: Arc::clone(runs) }),
    ])
    .unwrap()
}

fn names(connections: &[&str]) -> Vec<String> {
    connections.iter().map(|c| (*c).to_string()).collect()
}

async fn table_names(registry: &Registry) -> Vec<String> {
    let rows = registry
        .fetch_all(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
            None,
            Target::named("shop"),
        )
        .await
        .unwrap();
    rows.iter().filter_map(|r| r.get("name")?.as_str().map(str::to_string)).collect()
}

// ============================================================================
// Schema commands
// ============================================================================

#[tokio::test]
async fn test_create_for_either_name_creates_whole_partition() {
    let dir = TempDir::new().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let registry = registry(&dir, &runs);
    registry.startup().await.unwrap();

    let command = DbCommand::Create { connections: names(&["billing"]) };
    let CommandOutput::Partitions(reports) = commands::run(&registry, &command).await.unwrap()
    else {
        panic!("expected partition reports");
    };

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].tables, vec!["shop_orders", "billing_line_items"]);
    assert_eq!(table_names(&registry).await, vec!["billing_line_items", "shop_orders"]);

    registry.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shared_names_collapse_to_one_partition() {
    let dir = TempDir::new().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let registry = registry(&dir, &runs);
    registry.startup().await.unwrap();

    let command = DbCommand::Create { connections: names(&["shop", "billing", "logs"]) };
    let output = commands::run(&registry, &command).await.unwrap();
    assert_eq!(output.partitions(), Some(2));

    registry.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_drop_removes_tables_in_reverse_order() {
    let dir = TempDir::new().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let registry = registry(&dir, &runs);
    registry.startup().await.unwrap();

    commands::run(&registry, &DbCommand::Create { connections: names(&["shop"]) })
        .await
        .unwrap();
    let CommandOutput::Partitions(reports) =
        commands::run(&registry, &DbCommand::Drop { connections: names(&["shop"]) })
            .await
            .unwrap()
    else {
        panic!("expected partition reports");
    };

    assert_eq!(reports[0].tables, vec!["billing_line_items", "shop_orders"]);
    assert!(table_names(&registry).await.is_empty());

    registry.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_recreate_empties_tables() {
    let dir = TempDir::new().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let registry = registry(&dir, &runs);
    registry.startup().await.unwrap();

    commands::run(&registry, &DbCommand::Create { connections: names(&["shop"]) })
        .await
        .unwrap();
    registry
        .execute("INSERT INTO shop_orders (total) VALUES (1)", None, Target::named("shop"))
        .await
        .unwrap();

    commands::run(&registry, &DbCommand::Recreate { connections: names(&["shop"]) })
        .await
        .unwrap();
    let rows = registry
        .fetch_all("SELECT id FROM shop_orders", None, Target::named("shop"))
        .await
        .unwrap();
    assert!(rows.is_empty());

    registry.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_name_fails_before_any_work() {
    let dir = TempDir::new().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let registry = registry(&dir, &runs);
    registry.startup().await.unwrap();

    let command = DbCommand::Create { connections: names(&["shop", "wiki"]) };
    let err = commands::run(&registry, &command).await.unwrap_err();
    assert_eq!(err.error_code(), "UNKNOWN_CONNECTION");
    assert!(table_names(&registry).await.is_empty());

    registry.shutdown().await.unwrap();
}

// ============================================================================
// Seeding
// ============================================================================

#[tokio::test]
async fn test_seeders_run_once_per_invocation() {
    let dir = TempDir::new().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let registry = registry(&dir, &runs);
    registry.startup().await.unwrap();

    commands::run(&registry, &DbCommand::Create { connections: names(&["shop"]) })
        .await
        .unwrap();
    let CommandOutput::Seeded(reports) =
        commands::run(&registry, &DbCommand::Seed { connections: names(&["shop", "billing"]) })
            .await
            .unwrap()
    else {
        panic!("expected seed reports");
    };

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].seeders, vec!["orders"]);

    let row = registry
        .fetch_one("SELECT COUNT(*) AS n FROM shop_orders", None, Target::named("shop"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("n"), Some(&json!(1)));

    registry.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reseed_recreates_then_seeds() {
    let dir = TempDir::new().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let registry = registry(&dir, &runs);
    registry.startup().await.unwrap();

    commands::run(&registry, &DbCommand::Create { connections: names(&["shop"]) })
        .await
        .unwrap();
    commands::run(&registry, &DbCommand::Seed { connections: names(&["shop"]) }).await.unwrap();
    commands::run(&registry, &DbCommand::Reseed { connections: names(&["billing"]) })
        .await
        .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    let row = registry
        .fetch_one("SELECT COUNT(*) AS n FROM shop_orders", None, Target::named("shop"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("n"), Some(&json!(1)));

    registry.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_same_seeder_name_on_separate_databases() {
    let dir = TempDir::new().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let registry = aggregate(vec![
        Package::new("one")
            .connection("one", sqlite_at(&dir, "a.db", ""))
            .seeder(CountingSeeder { runs: Arc::clone(&runs) }),
        Package::new("two")
            .connection("two", sqlite_at(&dir, "b.db", ""))
            .seeder(CountingSeeder { runs: Arc::clone(&runs) }),
    ])
    .unwrap();
    registry.startup().await.unwrap();

    let CommandOutput::Seeded(reports) =
        commands::run(&registry, &DbCommand::Seed { connections: names(&["two"]) })
            .await
            .unwrap()
    else {
        panic!("expected seed reports");
    };
    assert_eq!(reports[0].seeders, vec!["users"]);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // Both databases in one invocation: the name still runs once
    commands::run(&registry, &DbCommand::Seed { connections: names(&["one", "two"]) })
        .await
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    registry.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_seeder_failure_names_the_seeder() {
    let dir = TempDir::new().unwrap();
    let registry = aggregate(vec![Package::new("app")
        .default_connection("main")
        .connection("main", sqlite_at(&dir, "app.db", ""))
        .seeder(FailingSeeder)])
    .unwrap();
    registry.startup().await.unwrap();

    let err = commands::run(&registry, &DbCommand::Seed { connections: names(&["main"]) })
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "SEEDER_FAILED");
    assert!(err.message().contains("broken"));
    assert!(err.message().contains("fixture data missing"));

    registry.shutdown().await.unwrap();
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn test_connections_report_shared_keys() {
    let dir = TempDir::new().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let registry = registry(&dir, &runs);

    let CommandOutput::Connections(reports) =
        commands::run(&registry, &DbCommand::Connections).await.unwrap()
    else {
        panic!("expected connection reports");
    };

    let names: Vec<&str> = reports.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["billing", "logs", "shop"]);

    let shop = &reports[2];
    assert!(shop.default);
    assert_eq!(shop.package, "shop");
    assert_eq!(shop.prefix, "shop_");
    assert_eq!(shop.shares_with, vec!["billing"]);
    assert!(reports[1].shares_with.is_empty());

    let json = serde_json::to_value(&reports[0]).unwrap();
    assert_eq!(json["dedup_key"], json!(reports[0].dedup_key.as_str()));
}
