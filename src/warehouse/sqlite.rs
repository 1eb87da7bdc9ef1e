//! SQLite-backed warehouse.
//!
//! Each warehouse schema is a separate database attached under the schema's
//! name: `<root>/<SCHEMA>.db` for a file-backed warehouse, or a private
//! in-memory database otherwise.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use rusqlite::{
    Connection, params_from_iter,
    types::{Value as SqlValue, ValueRef},
};

use super::{
    Dialect, TableRef, WarehouseError, WarehouseResult, WarehouseSession, quote_identifier,
};
use crate::{
    data::{Cell, Value},
    frame::Table,
};

pub const IN_MEMORY: &str = ":memory:";

#[derive(Debug)]
pub struct SqliteSession {
    conn: Connection,
    root: Option<PathBuf>,
}

impl SqliteSession {
    /// A warehouse whose schemas live only as long as the session.
    pub fn in_memory() -> WarehouseResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|err| WarehouseError::Connection(err.to_string()))?;
        Ok(Self { conn, root: None })
    }

    /// A warehouse rooted at `root`, one database file per schema. The
    /// directory is created when missing.
    pub fn open(root: &Path) -> WarehouseResult<Self> {
        fs::create_dir_all(root)?;
        let conn = Connection::open_in_memory()
            .map_err(|err| WarehouseError::Connection(err.to_string()))?;
        Ok(Self {
            conn,
            root: Some(root.to_path_buf()),
        })
    }

    /// Opens the warehouse named by a configured location: `:memory:` or a
    /// directory path.
    pub fn connect(location: &str) -> WarehouseResult<Self> {
        if location == IN_MEMORY {
            Self::in_memory()
        } else {
            Self::open(Path::new(location))
        }
    }

    fn attached_schemas(&self) -> WarehouseResult<Vec<String>> {
        let sql = "PRAGMA database_list";
        let mut stmt = self.conn.prepare(sql).map_err(execution(sql))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(execution(sql))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(execution(sql))?;
        Ok(names)
    }
}

fn execution(sql: &str) -> impl FnOnce(rusqlite::Error) -> WarehouseError + '_ {
    move |err| WarehouseError::Execution {
        sql: sql.to_string(),
        message: err.to_string(),
    }
}

fn to_sql_value(cell: Cell) -> SqlValue {
    match cell {
        None => SqlValue::Null,
        Some(Value::String(s)) => SqlValue::Text(s),
        Some(Value::Integer(i)) => SqlValue::Integer(i),
        Some(Value::Float(f)) => SqlValue::Real(f),
        Some(Value::Boolean(b)) => SqlValue::Integer(i64::from(b)),
        Some(value @ Value::DateTime(_)) => SqlValue::Text(value.as_display()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Cell {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(Value::Integer(i)),
        ValueRef::Real(f) => Some(Value::Float(f)),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(Value::String(String::from_utf8_lossy(bytes).into_owned()))
        }
    }
}

impl WarehouseSession for SqliteSession {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn ensure_schema(&mut self, schema: &str) -> WarehouseResult<()> {
        if self
            .attached_schemas()?
            .iter()
            .any(|name| name.eq_ignore_ascii_case(schema))
        {
            return Ok(());
        }
        let location = match &self.root {
            Some(root) => root.join(format!("{schema}.db")).to_string_lossy().into_owned(),
            None => IN_MEMORY.to_string(),
        };
        let sql = format!("ATTACH DATABASE ?1 AS {}", quote_identifier(schema));
        debug!("Attaching {location} as {schema}");
        self.conn
            .execute(&sql, [location.as_str()])
            .map_err(|err| WarehouseError::Connection(format!("{sql}: {err}")))?;
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> WarehouseResult<usize> {
        debug!("Executing: {sql}");
        self.conn.execute(sql, []).map_err(execution(sql))
    }

    fn query(&mut self, sql: &str) -> WarehouseResult<Vec<Vec<Cell>>> {
        debug!("Querying: {sql}");
        let mut stmt = self.conn.prepare(sql).map_err(execution(sql))?;
        let width = stmt.column_count();
        let mut rows = stmt.query([]).map_err(execution(sql))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(execution(sql))? {
            let mut cells = Vec::with_capacity(width);
            for idx in 0..width {
                cells.push(from_sql_value(row.get_ref(idx).map_err(execution(sql))?));
            }
            result.push(cells);
        }
        Ok(result)
    }

    fn table_columns(&mut self, table: &TableRef) -> WarehouseResult<Vec<String>> {
        let sql = format!(
            "PRAGMA {}.table_info({})",
            quote_identifier(&table.schema),
            quote_identifier(&table.table)
        );
        let mut stmt = self.conn.prepare(&sql).map_err(execution(&sql))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(execution(&sql))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(execution(&sql))?;
        if columns.is_empty() {
            return Err(WarehouseError::TableNotFound(table.to_string()));
        }
        Ok(columns)
    }

    fn write_table(&mut self, table: &TableRef, data: &Table) -> WarehouseResult<usize> {
        let target = format!(
            "{}.{}",
            quote_identifier(&table.schema),
            quote_identifier(&table.table)
        );
        let dialect = self.dialect();
        let definitions = data
            .columns()
            .iter()
            .map(|column| {
                format!(
                    "{} {}",
                    quote_identifier(column.name.display()),
                    dialect.storage_type(column.data.kind())
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=data.width())
            .map(|idx| format!("?{idx}"))
            .collect::<Vec<_>>()
            .join(", ");

        let drop = format!("DROP TABLE IF EXISTS {target}");
        let create = format!("CREATE TABLE {target} ({definitions})");
        let insert = format!("INSERT INTO {target} VALUES ({placeholders})");
        debug!("{create}");

        let tx = self.conn.transaction().map_err(execution(&create))?;
        tx.execute(&drop, []).map_err(execution(&drop))?;
        tx.execute(&create, []).map_err(execution(&create))?;
        let mut written = 0usize;
        {
            let mut stmt = tx.prepare(&insert).map_err(execution(&insert))?;
            for row in data.rows() {
                written += stmt
                    .execute(params_from_iter(row.into_iter().map(to_sql_value)))
                    .map_err(execution(&insert))?;
            }
        }
        tx.commit().map_err(execution(&insert))?;
        Ok(written)
    }
}
