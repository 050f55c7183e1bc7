//! Connection Descriptor Normalization
//!
//! Turns a package's raw connection record into a canonical [`Connection`] and
//! computes its dedup key.
//!
//! # Dedup Keys
//! The dedup key identifies a *physical* database, never a connection name:
//! - Network drivers: `<host>:<port>/<database>` (driver, dialect and
//!   credentials deliberately excluded)
//! - File drivers (`sqlite`): `sqlite:///<path>`, identical to the URL
//!
//! Two packages naming the same server and database under different names or
//! credentials therefore land in one metadata partition, which is what lets
//! foreign keys cross package boundaries.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use crate::config::RawConnection;
use crate::error::{PkgDbError, Result};

/// Canonical identifier of a physical database
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for DedupKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for DedupKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DedupKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// Supported database backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// `PostgreSQL` database
    Postgres,
    /// `MySQL` database (includes `MariaDB`)
    MySQL,
    /// `SQLite` database
    SQLite,
}

impl DatabaseType {
    /// Map a configured driver name onto a backend
    #[must_use]
    pub fn from_driver(driver: &str) -> Option<Self> {
        match driver.to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Some(Self::Postgres),
            "mysql" | "mariadb" => Some(Self::MySQL),
            "sqlite" | "sqlite3" => Some(Self::SQLite),
            _ => None,
        }
    }

    /// Get the backend name as a string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a driver addresses a local file rather than a server
#[must_use]
pub fn is_file_driver(driver: &str) -> bool {
    matches!(DatabaseType::from_driver(driver), Some(DatabaseType::SQLite))
}

/// One package's declared way to reach a database, normalized
#[derive(Clone, Serialize)]
pub struct Connection {
    /// Connection name, unique within its declaring package
    pub name: String,
    /// Package that declared this connection
    pub package: String,
    pub driver: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Database name, or file path for file drivers
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// WARNING: Sensitive data, never serialized or logged
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Prepended to every table name declared against this connection
    pub prefix: String,
    /// Full URL including credentials; use [`Connection::redacted_url`] for display
    #[serde(skip_serializing)]
    pub url: String,
    pub dedup_key: DedupKey,
}

impl Connection {
    /// Backend for this connection's driver, if the driver is recognized
    #[must_use]
    pub fn backend(&self) -> Option<DatabaseType> {
        DatabaseType::from_driver(&self.driver)
    }

    #[must_use]
    pub fn is_file_based(&self) -> bool {
        is_file_driver(&self.driver)
    }

    /// Prefixed table name for a logical table declared against this connection
    #[must_use]
    pub fn table_name(&self, table: &str) -> String {
        format!("{}{}", self.prefix, table)
    }

    /// URL with the password masked
    #[must_use]
    pub fn redacted_url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => {
                self.url.replacen(&format!(":{password}@"), ":****@", 1)
            }
            _ => self.url.clone(),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("package", &self.package)
            .field("driver", &self.driver)
            .field("dialect", &self.dialect)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("prefix", &self.prefix)
            .field("url", &self.redacted_url())
            .field("dedup_key", &self.dedup_key)
            .finish_non_exhaustive()
    }
}

/// Split a `connection.table` reference into its parts
///
/// A bare table name yields `(None, table)`. Only the first dot separates, so
/// `app1.comments` names table `comments` on connection `app1`.
#[must_use]
pub fn split_qualified(table: &str) -> (Option<&str>, &str) {
    match table.split_once('.') {
        Some((connection, name)) if !connection.is_empty() => (Some(connection), name),
        Some((_, name)) => (None, name),
        None => (None, table),
    }
}

/// Normalize a raw connection record declared by `package` under `name`
///
/// Pure: no I/O and no pool creation. The only environment access is the
/// optional `password_env` lookup.
pub fn normalize(name: &str, raw: &RawConnection, package: &str) -> Result<Connection> {
    let driver = non_empty(raw.driver.as_deref()).ok_or_else(|| {
        PkgDbError::configuration(package, format!("connection '{name}' is missing 'driver'"))
    })?;
    let database = non_empty(raw.database.as_deref()).ok_or_else(|| {
        PkgDbError::configuration(package, format!("connection '{name}' is missing 'database'"))
    })?;
    let prefix = raw.prefix.clone().unwrap_or_default();

    if is_file_driver(driver) {
        if raw.host.is_some() || raw.username.is_some() || raw.password.is_some() {
            tracing::debug!(
                package,
                connection = name,
                "Ignoring host and credentials on file-based connection"
            );
        }
        let url = format!("{}:///{database}", DatabaseType::SQLite.as_str());
        return Ok(Connection {
            name: name.to_string(),
            package: package.to_string(),
            driver: driver.to_string(),
            dialect: non_empty(raw.dialect.as_deref()).map(str::to_string),
            host: None,
            port: None,
            database: database.to_string(),
            username: None,
            password: None,
            prefix,
            dedup_key: DedupKey::new(url.clone()),
            url,
        });
    }

    let host = non_empty(raw.host.as_deref()).ok_or_else(|| {
        PkgDbError::configuration(package, format!("connection '{name}' is missing 'host'"))
    })?;
    let port = raw.port.ok_or_else(|| {
        PkgDbError::configuration(package, format!("connection '{name}' is missing 'port'"))
    })?;
    if port == 0 {
        return Err(PkgDbError::configuration(
            package,
            format!("connection '{name}' has invalid port 0"),
        ));
    }

    let dialect = non_empty(raw.dialect.as_deref());
    let username = non_empty(raw.username.as_deref());
    let password = raw.resolve_password().map_err(|message| {
        PkgDbError::configuration(package, format!("connection '{name}': {message}"))
    })?;
    if password.is_some() && username.is_none() {
        return Err(PkgDbError::configuration(
            package,
            format!("connection '{name}' has a password but no 'username'"),
        ));
    }

    let scheme = match dialect {
        Some(dialect) => format!("{driver}+{dialect}"),
        None => driver.to_string(),
    };
    let userinfo = match (username, password.as_deref()) {
        (Some(user), Some(pass)) => format!("{user}:{pass}@"),
        (Some(user), None) => format!("{user}@"),
        _ => String::new(),
    };
    let url = format!("{scheme}://{userinfo}{host}:{port}/{database}");

    Ok(Connection {
        name: name.to_string(),
        package: package.to_string(),
        driver: driver.to_string(),
        dialect: dialect.map(str::to_string),
        host: Some(host.to_string()),
        port: Some(port),
        database: database.to_string(),
        username: username.map(str::to_string),
        password,
        prefix,
        url,
        dedup_key: DedupKey::new(format!("{host}:{port}/{database}")),
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
