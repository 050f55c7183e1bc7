//! Table declarations and per-backend DDL
//!
//! Packages declare [`TableDef`]s against logical, unprefixed names. During
//! aggregation each declaration is bound to a connection, prefixed, and
//! registered as a [`Table`] in the metadata partition of that connection's
//! dedup key.

mod partition;

pub use partition::{MetadataPartition, PartitionStore};

use serde::{Deserialize, Serialize};

use crate::connection::{DatabaseType, DedupKey};

/// Portable column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    BigInteger,
    /// Variable-length string with a maximum length
    String(u32),
    Text,
    Boolean,
    Float,
    Timestamp,
    Json,
}

impl ColumnType {
    fn is_integer(self) -> bool {
        matches!(self, Self::Integer | Self::BigInteger)
    }

    fn render(self, backend: DatabaseType) -> String {
        match (self, backend) {
            (Self::Integer, _) => "INTEGER".to_string(),
            (Self::BigInteger, _) => "BIGINT".to_string(),
            (Self::String(len), _) => format!("VARCHAR({len})"),
            (Self::Text, _) => "TEXT".to_string(),
            (Self::Boolean, _) => "BOOLEAN".to_string(),
            (Self::Float, DatabaseType::Postgres) => "DOUBLE PRECISION".to_string(),
            (Self::Float, DatabaseType::MySQL) => "DOUBLE".to_string(),
            (Self::Float, DatabaseType::SQLite) => "REAL".to_string(),
            (Self::Timestamp, DatabaseType::MySQL) => "DATETIME".to_string(),
            (Self::Timestamp, _) => "TIMESTAMP".to_string(),
            (Self::Json, DatabaseType::Postgres) => "JSONB".to_string(),
            (Self::Json, DatabaseType::MySQL) => "JSON".to_string(),
            (Self::Json, DatabaseType::SQLite) => "TEXT".to_string(),
        }
    }
}

/// Foreign-key target
///
/// Before registration `table` is a logical name, optionally dotted
/// (`connection.table`) to reach another package's connection. After
/// registration it holds the target's full prefixed name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub autoincrement: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ForeignKey>,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            primary_key: false,
            unique: false,
            autoincrement: false,
            references: None,
        }
    }

    /// Integer primary key assigned by the database
    pub fn id(name: impl Into<String>) -> Self {
        let mut column = Self::new(name, ColumnType::Integer).primary_key();
        column.autoincrement = true;
        column
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ForeignKey { table: table.into(), column: column.into() });
        self
    }
}

/// A table as declared by a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    /// Logical name, or `connection.table`
    pub name: String,
    /// Connection name; the dotted name form takes precedence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), connection: None, columns: Vec::new() }
    }

    #[must_use]
    pub fn connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }
}

/// A table registered in a metadata partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    /// Logical, unprefixed name
    pub name: String,
    /// Prefixed name as it exists in the database
    pub full_name: String,
    /// Connection the table was declared against
    pub connection: String,
    pub dedup_key: DedupKey,
    /// Columns with foreign keys resolved to full names
    pub columns: Vec<Column>,
}

impl Table {
    /// Full names of tables this one references, excluding itself
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter_map(|c| c.references.as_ref())
            .map(|fk| fk.table.as_str())
            .filter(move |target| *target != self.full_name)
    }

    #[must_use]
    pub fn create_sql(&self, backend: DatabaseType) -> String {
        let pk_count = self.columns.iter().filter(|c| c.primary_key).count();
        let mut parts: Vec<String> =
            self.columns.iter().map(|c| column_sql(c, backend, pk_count == 1)).collect();

        if pk_count > 1 {
            let keys: Vec<String> = self
                .columns
                .iter()
                .filter(|c| c.primary_key)
                .map(|c| quote(&c.name, backend))
                .collect();
            parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
        }

        for column in &self.columns {
            if let Some(fk) = &column.references {
                parts.push(format!(
                    "FOREIGN KEY ({}) REFERENCES {} ({})",
                    quote(&column.name, backend),
                    quote(&fk.table, backend),
                    quote(&fk.column, backend)
                ));
            }
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(&self.full_name, backend),
            parts.join(", ")
        )
    }

    #[must_use]
    pub fn drop_sql(&self, backend: DatabaseType) -> String {
        format!("DROP TABLE IF EXISTS {}", quote(&self.full_name, backend))
    }
}

fn quote(ident: &str, backend: DatabaseType) -> String {
    match backend {
        DatabaseType::MySQL => format!("`{}`", ident.replace('`', "``")),
        DatabaseType::Postgres | DatabaseType::SQLite => {
            format!("\"{}\"", ident.replace('"', "\"\""))
        }
    }
}

fn column_sql(column: &Column, backend: DatabaseType, inline_pk: bool) -> String {
    let name = quote(&column.name, backend);
    let serial = inline_pk
        && column.primary_key
        && column.autoincrement
        && column.column_type.is_integer();

    if serial {
        return match backend {
            DatabaseType::SQLite => format!("{name} INTEGER PRIMARY KEY"),
            DatabaseType::Postgres => match column.column_type {
                ColumnType::BigInteger => format!("{name} BIGSERIAL PRIMARY KEY"),
                _ => format!("{name} SERIAL PRIMARY KEY"),
            },
            DatabaseType::MySQL => format!(
                "{name} {} NOT NULL AUTO_INCREMENT PRIMARY KEY",
                column.column_type.render(backend)
            ),
        };
    }

    let mut sql = format!("{name} {}", column.column_type.render(backend));
    if inline_pk && column.primary_key {
        sql.push_str(" PRIMARY KEY");
    } else if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if column.unique {
        sql.push_str(" UNIQUE");
    }
    sql
}
