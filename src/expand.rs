//! Additive schema evolution for destination tables.
//!
//! Expansion only ever adds columns. It never renames, retypes or drops one,
//! so it runs unconditionally before every merge.

use std::collections::HashSet;

use log::{error, info, warn};

use crate::{
    error::{EngineError, EngineResult},
    frame::Table,
    infer::{InferencePolicy, infer_warehouse_type},
    warehouse::{TableRef, WarehouseSession, column_identifier},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionReport {
    pub message: String,
    /// Columns successfully added, in the order they were issued.
    pub added: Vec<String>,
    /// Columns whose `ALTER TABLE` failed.
    pub failed: Vec<String>,
}

impl ExpansionReport {
    pub fn columns_added(&self) -> usize {
        self.added.len()
    }
}

/// Adds every column of `data` that `target` lacks, ignoring `excluded`.
///
/// Introspection failure is returned as an error. A single failing column is
/// logged and skipped; the remaining columns are still attempted.
pub fn expand(
    session: &mut dyn WarehouseSession,
    target: &TableRef,
    data: &Table,
    excluded: &[String],
    policy: &InferencePolicy,
) -> EngineResult<ExpansionReport> {
    let existing: HashSet<String> = session
        .table_columns(target)
        .map_err(|source| {
            error!("Failed to get table columns for {target}: {source}");
            EngineError::Introspection {
                table: target.to_string(),
                source,
            }
        })?
        .into_iter()
        .map(|name| name.to_lowercase())
        .collect();
    info!("Table {target} has {} columns", existing.len());

    let excluded: HashSet<String> = excluded.iter().map(|name| name.to_lowercase()).collect();
    let new_columns: Vec<_> = data
        .columns()
        .iter()
        .filter(|column| {
            !existing.contains(column.name.key()) && !excluded.contains(column.name.key())
        })
        .collect();

    if new_columns.is_empty() {
        info!("No new columns to add to {target}");
        return Ok(ExpansionReport {
            message: "Schema is up to date".to_string(),
            added: Vec::new(),
            failed: Vec::new(),
        });
    }
    info!(
        "Found {} new column(s) to add: {}",
        new_columns.len(),
        new_columns
            .iter()
            .map(|column| column.name.display())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let dialect = session.dialect();
    let mut added = Vec::new();
    let mut failed = Vec::new();
    for column in new_columns {
        let name = column.name.display().to_uppercase();
        let datatype = dialect.warehouse_type(infer_warehouse_type(&column.data, policy));
        let sql = format!(
            "ALTER TABLE {target} ADD COLUMN {} {datatype}",
            column_identifier(&name)
        );
        info!("Adding column: {sql}");
        match session.execute(&sql) {
            Ok(_) => {
                info!("Successfully added column {name} ({datatype})");
                added.push(name);
            }
            Err(err) => {
                warn!("Failed to add column {name}: {err}");
                failed.push(name);
            }
        }
    }

    let message = format!(
        "Successfully added {} new column(s) to {target}",
        added.len()
    );
    info!("{message}");
    Ok(ExpansionReport {
        message,
        added,
        failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::Cell,
        frame::{Column, ColumnData},
        warehouse::{Dialect, WarehouseError, WarehouseResult, sqlite::SqliteSession},
    };

    const SCHEMA: &str = "CLIENT_EXPAND_2024";

    fn session_with_table() -> (SqliteSession, TableRef) {
        let mut session = SqliteSession::in_memory().expect("warehouse");
        session.ensure_schema(SCHEMA).expect("schema");
        session
            .execute("CREATE TABLE CLIENT_EXPAND_2024.T (ad_name TEXT PRIMARY KEY, reach INTEGER)")
            .expect("create");
        (session, TableRef::new(SCHEMA, "T"))
    }

    #[test]
    fn adds_only_missing_columns_in_upper_case() {
        let (mut session, target) = session_with_table();
        let data = Table::new(vec![
            Column::text("ad_name", &[Some("a")]),
            Column::new("REACH", ColumnData::Integer(vec![Some(1)])),
            Column::new("video_views", ColumnData::Float(vec![Some(2.5)])),
            Column::text("upload_timestamp", &[Some("x")]),
        ]);
        let report = expand(
            &mut session,
            &target,
            &data,
            &["upload_timestamp".to_string()],
            &InferencePolicy::default(),
        )
        .expect("expand");
        assert_eq!(report.added, vec!["VIDEO_VIEWS".to_string()]);
        assert_eq!(report.message, "Successfully added 1 new column(s) to CLIENT_EXPAND_2024.T");
        let columns = session.table_columns(&target).expect("columns");
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[2], "VIDEO_VIEWS");
    }

    /// Delegates to SQLite but rejects the `ALTER TABLE` that adds `column`.
    struct RejectColumn {
        inner: SqliteSession,
        column: &'static str,
    }

    impl WarehouseSession for RejectColumn {
        fn dialect(&self) -> Dialect {
            self.inner.dialect()
        }
        fn ensure_schema(&mut self, schema: &str) -> WarehouseResult<()> {
            self.inner.ensure_schema(schema)
        }
        fn execute(&mut self, sql: &str) -> WarehouseResult<usize> {
            if sql.starts_with("ALTER TABLE") && sql.contains(self.column) {
                return Err(WarehouseError::Execution {
                    sql: sql.to_string(),
                    message: "injected failure".to_string(),
                });
            }
            self.inner.execute(sql)
        }
        fn query(&mut self, sql: &str) -> WarehouseResult<Vec<Vec<Cell>>> {
            self.inner.query(sql)
        }
        fn table_columns(&mut self, table: &TableRef) -> WarehouseResult<Vec<String>> {
            self.inner.table_columns(table)
        }
        fn write_table(&mut self, table: &TableRef, data: &Table) -> WarehouseResult<usize> {
            self.inner.write_table(table, data)
        }
    }

    #[test]
    fn keyword_and_digit_led_columns_are_added() {
        let (mut session, target) = session_with_table();
        let data = Table::new(vec![
            Column::text("ad_name", &[Some("a")]),
            Column::text("group", &[Some("g")]),
            Column::text("order", &[Some("o")]),
            Column::new("3_second_video_plays", ColumnData::Integer(vec![Some(4)])),
        ]);
        let report = expand(&mut session, &target, &data, &[], &InferencePolicy::default())
            .expect("expand");
        assert!(report.failed.is_empty(), "{:?}", report.failed);
        assert_eq!(report.added, vec!["GROUP", "ORDER", "3_SECOND_VIDEO_PLAYS"]);
        let columns = session.table_columns(&target).expect("columns");
        assert_eq!(
            columns,
            vec!["ad_name", "reach", "GROUP", "ORDER", "3_SECOND_VIDEO_PLAYS"]
        );
    }

    #[test]
    fn one_failing_column_does_not_stop_the_others() {
        let (inner, target) = session_with_table();
        let mut session = RejectColumn {
            inner,
            column: "\"AUDIENCE\"",
        };
        let data = Table::new(vec![
            Column::text("ad_name", &[Some("a")]),
            Column::text("concept", &[Some("c")]),
            Column::text("audience", &[Some("x")]),
            Column::new("video_views", ColumnData::Integer(vec![Some(1)])),
        ]);
        let report = expand(&mut session, &target, &data, &[], &InferencePolicy::default())
            .expect("a failed column is not fatal");
        assert_eq!(report.failed, vec!["AUDIENCE".to_string()]);
        assert_eq!(report.added, vec!["CONCEPT", "VIDEO_VIEWS"]);
        assert_eq!(report.columns_added(), 2);
        assert_eq!(
            report.message,
            "Successfully added 2 new column(s) to CLIENT_EXPAND_2024.T"
        );
        let columns = session.table_columns(&target).expect("columns");
        assert!(columns.iter().any(|c| c == "CONCEPT"));
        assert!(columns.iter().any(|c| c == "VIDEO_VIEWS"));
        assert!(!columns.iter().any(|c| c.eq_ignore_ascii_case("audience")));
    }

    #[test]
    fn up_to_date_table_adds_nothing() {
        let (mut session, target) = session_with_table();
        let data = Table::new(vec![Column::text("ad_name", &[Some("a")])]);
        let report = expand(&mut session, &target, &data, &[], &InferencePolicy::default())
            .expect("expand");
        assert_eq!(report.columns_added(), 0);
        assert_eq!(report.message, "Schema is up to date");
    }

    #[test]
    fn missing_table_is_fatal() {
        let mut session = SqliteSession::in_memory().expect("warehouse");
        session.ensure_schema(SCHEMA).expect("schema");
        let data = Table::new(vec![Column::text("ad_name", &[Some("a")])]);
        let err = expand(
            &mut session,
            &TableRef::new(SCHEMA, "MISSING"),
            &data,
            &[],
            &InferencePolicy::default(),
        )
        .expect_err("no table");
        assert!(matches!(err, EngineError::Introspection { .. }));
        assert!(err.to_string().starts_with("Could not read schema for table"));
    }
}
