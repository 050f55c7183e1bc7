//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout pkgdb.
//! All errors are structured and map to stable error codes for JSON output.
//!
//! # Error Categories
//! - `Configuration`: malformed or incomplete connection descriptor (fatal to bootstrap)
//! - `UnknownConnection` / `NoDefaultConnection`: name resolution failures
//! - `ConnectionConfig`: handle construction failed (bad URL, backend not compiled in)
//! - `Connection`: runtime connect failure, never retried
//! - `NotConnected`: query issued before the startup transition
//! - `QueryFailed`: driver-level query errors
//! - `Schema`: table conflicts inside a partition, foreign-key cycles
//! - `Seeder`: a package seeder returned an error
//! - `ConfigFile`: configuration file could not be read or parsed

use thiserror::Error;

/// Main error type for pkgdb operations
#[derive(Error, Debug)]
pub enum PkgDbError {
    /// Connection descriptor is missing a field or carries an invalid value
    #[error("Configuration error in package '{package}': {message}")]
    Configuration { package: String, message: String },

    /// Connection name is not present in the flattened connection map
    #[error("Unknown connection '{name}' (known connections: {})", .known.join(", "))]
    UnknownConnection { name: String, known: Vec<String> },

    /// Resolution fell back to the default connection but none was declared
    #[error("No default connection declared by any package (known connections: {})", .known.join(", "))]
    NoDefaultConnection { known: Vec<String> },

    /// Handle construction failed for a dedup key
    #[error("Invalid connection configuration for '{key}': {detail}")]
    ConnectionConfig { key: String, detail: String },

    /// Opening the pool for a dedup key failed
    #[error("Connection to '{key}' failed: {detail}")]
    Connection { key: String, detail: String },

    /// Query issued against a handle whose pool is not open
    #[error("Database '{0}' is not connected; run the startup transition before querying")]
    NotConnected(String),

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Schema definition conflict
    #[error("Schema error: {0}")]
    Schema(String),

    /// Seeder returned an error
    #[error("Seeder '{name}' failed: {source}")]
    Seeder {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Configuration file error (file not readable, invalid JSON, etc.)
    #[error("Configuration file error: {0}")]
    ConfigFile(String),
}

impl PkgDbError {
    /// Convert error to error code string for JSON output
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::UnknownConnection { .. } => "UNKNOWN_CONNECTION",
            Self::NoDefaultConnection { .. } => "NO_DEFAULT_CONNECTION",
            Self::ConnectionConfig { .. } => "CONNECTION_CONFIG_ERROR",
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::NotConnected(_) => "NOT_CONNECTED",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::Schema(_) => "SCHEMA_ERROR",
            Self::Seeder { .. } => "SEEDER_FAILED",
            Self::ConfigFile(_) => "CONFIG_FILE_ERROR",
        }
    }

    /// Human-readable message, safe for JSON output (never contains passwords)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn configuration(package: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration { package: package.into(), message: message.into() }
    }

    pub fn unknown_connection(name: impl Into<String>, known: Vec<String>) -> Self {
        Self::UnknownConnection { name: name.into(), known }
    }

    pub fn connection_config(key: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ConnectionConfig { key: key.into(), detail: detail.into() }
    }

    pub fn connection(key: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Connection { key: key.into(), detail: detail.into() }
    }

    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    pub fn config_file(message: impl Into<String>) -> Self {
        Self::ConfigFile(message.into())
    }
}

/// Result type alias for pkgdb operations
pub type Result<T> = std::result::Result<T, PkgDbError>;
