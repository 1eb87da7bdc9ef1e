//! Warehouse access: the session seam, SQL dialects and object addressing.
//!
//! Everything that talks to a warehouse goes through [`WarehouseSession`].
//! The engine never assumes a particular backend; it asks the session for its
//! [`Dialect`] and renders statements accordingly. [`sqlite::SqliteSession`]
//! is the executable backend used by the CLI and the test suite.

pub mod sqlite;

use std::fmt;

use heck::ToShoutySnakeCase;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    data::Cell,
    frame::{StorageKind, Table},
    infer::WarehouseType,
    schema::{ColumnType, RecordKind},
};

pub const PROCESSING_LOG_TABLE: &str = "PROCESSING_LOG";
pub const VIEW_BASE: &str = "AUDIENCE_AD_DESCRIPTOR_DATA";

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("Warehouse connection failed: {0}")]
    Connection(String),
    #[error("Table {0} does not exist or is not readable")]
    TableNotFound(String),
    #[error("{message}")]
    Execution { sql: String, message: String },
    #[error("Warehouse I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WarehouseError {
    /// The statement that failed, when the failure came from executing SQL.
    pub fn sql(&self) -> Option<&str> {
        match self {
            WarehouseError::Execution { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

pub type WarehouseResult<T> = Result<T, WarehouseError>;

/// A live connection the engine can run statements through. Each wave owns its
/// session exclusively for the duration of the run.
pub trait WarehouseSession {
    fn dialect(&self) -> Dialect;

    /// Makes `schema` addressable, creating it when it does not exist.
    fn ensure_schema(&mut self, schema: &str) -> WarehouseResult<()>;

    /// Runs a statement and returns the number of affected rows.
    fn execute(&mut self, sql: &str) -> WarehouseResult<usize>;

    fn query(&mut self, sql: &str) -> WarehouseResult<Vec<Vec<Cell>>>;

    /// Column names of `table` as the warehouse reports them. A missing table
    /// is [`WarehouseError::TableNotFound`].
    fn table_columns(&mut self, table: &TableRef) -> WarehouseResult<Vec<String>>;

    /// Replaces `table` with the content of `data`, keeping the exact case of
    /// every column name. Returns the number of rows written.
    fn write_table(&mut self, table: &TableRef, data: &Table) -> WarehouseResult<usize>;
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Snowflake,
    #[default]
    Sqlite,
}

impl Dialect {
    /// Type name used by the fixed table definitions.
    pub fn column_type(&self, datatype: ColumnType) -> &'static str {
        match (self, datatype) {
            (Dialect::Snowflake, ColumnType::Int) => "INT",
            (Dialect::Snowflake, ColumnType::Float) => "FLOAT",
            (Dialect::Snowflake, ColumnType::String) => "STRING",
            (Dialect::Snowflake, ColumnType::DateTime) => "DATETIME",
            (Dialect::Sqlite, ColumnType::Int) => "INTEGER",
            (Dialect::Sqlite, ColumnType::Float) => "REAL",
            (Dialect::Sqlite, ColumnType::String) => "TEXT",
            (Dialect::Sqlite, ColumnType::DateTime) => "TEXT",
        }
    }

    /// Type name used when a discovered column is added to a live table.
    pub fn warehouse_type(&self, datatype: WarehouseType) -> &'static str {
        match (self, datatype) {
            (Dialect::Snowflake, WarehouseType::Integer) => "INTEGER",
            (Dialect::Snowflake, WarehouseType::Float) => "FLOAT",
            (Dialect::Snowflake, WarehouseType::Timestamp) => "TIMESTAMP",
            (Dialect::Snowflake, WarehouseType::Boolean) => "BOOLEAN",
            (Dialect::Snowflake, WarehouseType::String) => "STRING",
            (Dialect::Sqlite, WarehouseType::Integer) => "INTEGER",
            (Dialect::Sqlite, WarehouseType::Float) => "REAL",
            (Dialect::Sqlite, WarehouseType::Timestamp) => "TEXT",
            (Dialect::Sqlite, WarehouseType::Boolean) => "INTEGER",
            (Dialect::Sqlite, WarehouseType::String) => "TEXT",
        }
    }

    /// Type name for a staged column with the given storage.
    pub fn storage_type(&self, kind: StorageKind) -> &'static str {
        match kind {
            StorageKind::Text => self.warehouse_type(WarehouseType::String),
            StorageKind::Integer => self.warehouse_type(WarehouseType::Integer),
            StorageKind::Float => self.warehouse_type(WarehouseType::Float),
            StorageKind::Boolean => self.warehouse_type(WarehouseType::Boolean),
            StorageKind::DateTime => self.warehouse_type(WarehouseType::Timestamp),
        }
    }

    pub fn timestamp_type(&self) -> &'static str {
        match self {
            Dialect::Snowflake => "TIMESTAMP",
            Dialect::Sqlite => "TEXT",
        }
    }

    pub fn current_timestamp(&self) -> &'static str {
        match self {
            Dialect::Snowflake => "CURRENT_TIMESTAMP()",
            Dialect::Sqlite => "CURRENT_TIMESTAMP",
        }
    }

    pub fn supports_stages(&self) -> bool {
        matches!(self, Dialect::Snowflake)
    }

    /// Whether tables inside one schema may be referenced without the schema
    /// prefix from constraints and views defined in that schema.
    pub fn scopes_references_to_schema(&self) -> bool {
        matches!(self, Dialect::Sqlite)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Snowflake => "snowflake",
            Dialect::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// A sibling object in the same schema.
    pub fn sibling(&self, table: impl Into<String>) -> Self {
        Self::new(self.schema.clone(), table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Quotes an identifier so the warehouse preserves its exact case.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Identifier for a destination-table column, in the form both warehouses
/// store it: upper case and quoted. Quoting keeps keywords (`group`, `order`)
/// and digit-led names usable; upper case makes `"VIDEO_VIEWS"` the same
/// column as an unquoted `video_views` on Snowflake. Every statement that
/// names a destination column goes through here.
pub fn column_identifier(name: &str) -> String {
    quote_identifier(&name.to_uppercase())
}

fn identifier_segment(value: &str) -> String {
    value.trim().to_shouty_snake_case()
}

/// `CLIENT_{CLIENT}_{YEAR}`: one schema per client and year.
pub fn schema_name(client: &str, year: i32) -> String {
    format!("CLIENT_{}_{year}", identifier_segment(client))
}

/// `{PLATFORM}_{BASE}`: one table per platform and record kind.
pub fn table_name(platform: &str, kind: RecordKind) -> String {
    format!("{}_{}", identifier_segment(platform), kind.table_base())
}

pub fn stage_name(schema: &str) -> String {
    format!("{schema}_STAGE")
}

pub fn view_name(platform: &str) -> String {
    format!("{}_{VIEW_BASE}", identifier_segment(platform))
}

/// Staging table name for one merge. The random suffix keeps concurrent
/// submissions of the same wave apart.
///
/// Only the staging tables are isolated. Two invocations upserting the same
/// natural key into the same destination are not serialized against each
/// other: the last merge to commit wins, at whatever locking granularity the
/// warehouse applies.
pub fn temp_table_name(platform: &str, kind: RecordKind, wave: u32) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_TEMP_{wave}_{}",
        identifier_segment(platform),
        kind.label(),
        &suffix[..8].to_ascii_uppercase()
    )
}
