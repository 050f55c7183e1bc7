//! pkgdb - Multi-Package Database Registry
//!
//! An application is assembled from packages. Each package declares named
//! database connections, tables and seeders. pkgdb folds those declarations
//! into one [`Registry`]:
//! - Connections that reach the same physical database share one dedup key,
//!   one metadata partition and one pooled engine handle
//! - Table names are prefixed per connection, so packages can share a
//!   database without colliding
//! - Queries address a connection name, a dedup key, or the default connection
//!
//! # Module Organization
//! - [`connection`] - Connection normalization and dedup keys
//! - [`config`] - Configuration files and per-package overrides
//! - [`package`] - Package declarations and the [`Seeder`] trait
//! - [`schema`] - Table declarations, DDL and metadata partitions
//! - [`engine`] - Backend clients and the per-key [`Handle`]
//! - [`aggregate`] - Package aggregation
//! - [`registry`] - The read-only lookup and query facade
//! - [`commands`] - `db` schema tooling
//! - [`output`] - JSON output envelopes
//! - [`error`] - Error types

pub mod aggregate;
pub mod commands;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod output;
pub mod package;
pub mod registry;
pub mod schema;

pub use aggregate::aggregate;
pub use commands::{CommandOutput, DbCommand};
pub use config::{AppConfig, PackageDatabase, RawConnection};
pub use connection::{Connection, DatabaseType, DedupKey};
pub use engine::{ExecuteResult, Handle, ParamSet, Params, Row};
pub use error::{PkgDbError, Result};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use package::{Package, Registers, Seeder};
pub use registry::{RegisteredPackage, Registry, Target};
pub use schema::{Column, ColumnType, Table, TableDef};
