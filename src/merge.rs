//! Keyed upserts from a staged temporary table.
//!
//! Rows are written to a uniquely named staging table in the destination
//! schema, merged into the destination on the natural key and the staging
//! table is dropped on every exit path by [`StagingTable`].

use std::collections::HashSet;

use itertools::Itertools;
use log::{debug, error, info, warn};

use crate::{
    columns::ColumnName,
    error::{EngineError, EngineResult},
    frame::Table,
    schema::RecordKind,
    warehouse::{Dialect, TableRef, WarehouseSession, column_identifier, quote_identifier},
};

/// Which columns of the processed table are written and which are not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub key: String,
    /// Columns present in both the processed table and the destination, in
    /// processed-table order.
    pub columns: Vec<ColumnName>,
    /// Processed columns the destination lacks.
    pub missing: Vec<ColumnName>,
}

impl MergePlan {
    pub fn new(data: &Table, destination_columns: &[String], key: &str) -> Self {
        let existing: HashSet<String> = destination_columns
            .iter()
            .map(|name| name.to_lowercase())
            .collect();
        let (columns, missing): (Vec<_>, Vec<_>) = data
            .column_names()
            .into_iter()
            .partition(|name| existing.contains(name.key()));
        Self {
            key: key.to_string(),
            columns,
            missing,
        }
    }

    pub fn update_columns(&self) -> impl Iterator<Item = &ColumnName> {
        self.columns.iter().filter(|name| !name.matches(&self.key))
    }

    pub fn has_key(&self) -> bool {
        self.columns.iter().any(|name| name.matches(&self.key))
    }

    /// Renders the single upsert statement for `dialect`.
    pub fn render(&self, dialect: Dialect, target: &TableRef, source: &TableRef) -> String {
        let source_column = |name: &ColumnName| format!("source.{}", quote_identifier(name.display()));
        let target_column = |name: &ColumnName| column_identifier(name.display());
        let insert_columns = self.columns.iter().map(target_column).join(", ");
        let insert_values = self.columns.iter().map(source_column).join(", ");
        let key = column_identifier(&self.key);
        match dialect {
            Dialect::Snowflake => {
                let mut sql = format!(
                    "MERGE INTO {target} AS target\nUSING {source} AS source\nON target.{key} = source.{}",
                    quote_identifier(&self.key)
                );
                let updates = self
                    .update_columns()
                    .map(|name| format!("{} = {}", target_column(name), source_column(name)))
                    .join(", ");
                if !updates.is_empty() {
                    sql.push_str(&format!("\nWHEN MATCHED THEN UPDATE SET {updates}"));
                }
                sql.push_str(&format!(
                    "\nWHEN NOT MATCHED THEN INSERT ({insert_columns})\n    VALUES ({insert_values})"
                ));
                sql
            }
            Dialect::Sqlite => {
                let updates = self
                    .update_columns()
                    .map(|name| {
                        let column = target_column(name);
                        format!("{column} = excluded.{column}")
                    })
                    .join(", ");
                let action = if updates.is_empty() {
                    "DO NOTHING".to_string()
                } else {
                    format!("DO UPDATE SET {updates}")
                };
                format!(
                    "INSERT INTO {target} ({insert_columns})\nSELECT {insert_values}\nFROM {source} AS source WHERE true\nON CONFLICT({key}) {action}"
                )
            }
        }
    }
}

/// A staging table that is dropped when the guard goes out of scope.
pub struct StagingTable<'s> {
    session: &'s mut dyn WarehouseSession,
    table: TableRef,
}

impl<'s> StagingTable<'s> {
    /// Claims `table` and fills it with `data`. The guard exists before the
    /// write so a partially written table is still dropped.
    pub fn create(
        session: &'s mut dyn WarehouseSession,
        table: TableRef,
        data: &Table,
    ) -> EngineResult<Self> {
        info!("Creating temp table: {table}");
        let guard = Self { session, table };
        guard
            .session
            .write_table(&guard.table, data)
            .map_err(|source| EngineError::Staging {
                table: guard.table.to_string(),
                source,
            })?;
        info!("Temp table created successfully");
        Ok(guard)
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn session(&mut self) -> &mut dyn WarehouseSession {
        &mut *self.session
    }
}

impl Drop for StagingTable<'_> {
    fn drop(&mut self) {
        let sql = format!("DROP TABLE IF EXISTS {}", self.table);
        match self.session.execute(&sql) {
            Ok(_) => info!("Dropped temp table: {}", self.table),
            Err(err) => warn!("Failed to drop temp table {}: {err}", self.table),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertReport {
    pub message: String,
    pub rows: usize,
    /// Set when some processed columns were not written.
    pub warning: Option<String>,
}

/// Upserts `data` into `target` on the natural key of `kind`, staging through
/// `staging` (a table name inside the target schema).
pub fn upsert(
    session: &mut dyn WarehouseSession,
    target: &TableRef,
    kind: RecordKind,
    data: &Table,
    staging: &str,
) -> EngineResult<UpsertReport> {
    let destination_columns =
        session
            .table_columns(target)
            .map_err(|source| EngineError::Introspection {
                table: target.to_string(),
                source,
            })?;
    let plan = MergePlan::new(data, &destination_columns, kind.key_column());

    let warning = if plan.missing.is_empty() {
        None
    } else {
        let warning = format!(
            "Uploaded {kind} file has {} column(s) not present in table {target}: {}. Existing rows keep their values for these columns.",
            plan.missing.len(),
            plan.missing.iter().map(ColumnName::display).join(", ")
        );
        warn!("{warning}");
        Some(warning)
    };

    if plan.columns.is_empty() {
        return Err(EngineError::NoMatchingColumns {
            kind,
            table: target.to_string(),
        });
    }
    if !plan.has_key() {
        return Err(EngineError::Validation(format!(
            "Key column '{}' is not present in both the uploaded {kind} file and table {target}",
            plan.key
        )));
    }

    let filtered = data.select(&plan.columns);
    let rows = filtered.row_count();
    let dialect = session.dialect();
    let mut staged = StagingTable::create(session, target.sibling(staging), &filtered)?;
    let sql = plan.render(dialect, target, staged.table());
    debug!("{sql}");
    info!("Executing {kind} MERGE statement");
    if let Err(source) = staged.session().execute(&sql) {
        error!("{kind} MERGE failed: {source}");
        error!("Full MERGE SQL: {sql}");
        return Err(EngineError::Merge {
            table: target.to_string(),
            source,
        });
    }
    drop(staged);
    info!("Successfully populated {target} with {rows} records");

    let mut message = format!("Inserted/Updated {rows} {} records", kind.description());
    if let Some(warning) = &warning {
        message = format!("{message} | {warning}");
    }
    Ok(UpsertReport {
        message,
        rows,
        warning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{Cell, Value},
        frame::{Column, ColumnData},
        warehouse::{WarehouseError, WarehouseResult, sqlite::SqliteSession},
    };

    const SCHEMA: &str = "CLIENT_MERGE_2024";

    fn target() -> TableRef {
        TableRef::new(SCHEMA, "NAMING")
    }

    fn session() -> SqliteSession {
        let mut session = SqliteSession::in_memory().expect("warehouse");
        session.ensure_schema(SCHEMA).expect("schema");
        session
            .execute("CREATE TABLE CLIENT_MERGE_2024.NAMING (ad_set_name TEXT PRIMARY KEY, audience TEXT, wave_number INTEGER)")
            .expect("create");
        session
    }

    fn rows(audience: &str, wave: i64) -> Table {
        Table::new(vec![
            Column::text("ad_set_name", &[Some("set-1"), Some("set-2")]),
            Column::text("audience", &[Some(audience), Some("b")]),
            Column::new("wave_number", ColumnData::Integer(vec![Some(wave), Some(wave)])),
        ])
    }

    fn contents(session: &mut SqliteSession) -> Vec<Vec<Cell>> {
        session
            .query("SELECT ad_set_name, audience, wave_number FROM CLIENT_MERGE_2024.NAMING ORDER BY ad_set_name")
            .expect("select")
    }

    /// Delegates to SQLite but fails statements that start with `fail_prefix`.
    struct Flaky {
        inner: SqliteSession,
        fail_prefix: &'static str,
    }

    impl WarehouseSession for Flaky {
        fn dialect(&self) -> Dialect {
            self.inner.dialect()
        }
        fn ensure_schema(&mut self, schema: &str) -> WarehouseResult<()> {
            self.inner.ensure_schema(schema)
        }
        fn execute(&mut self, sql: &str) -> WarehouseResult<usize> {
            if sql.starts_with(self.fail_prefix) {
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
    fn plan_splits_known_and_missing_columns() {
        let data = Table::new(vec![
            Column::text("ad_set_name", &[Some("a")]),
            Column::text("extra", &[Some("x")]),
        ]);
        let plan = MergePlan::new(&data, &["AD_SET_NAME".to_string()], "ad_set_name");
        assert_eq!(plan.columns, vec![ColumnName::new("ad_set_name")]);
        assert_eq!(plan.missing, vec![ColumnName::new("extra")]);
        assert_eq!(plan.update_columns().count(), 0);
    }

    #[test]
    fn snowflake_merge_quotes_source_columns() {
        let data = rows("a", 1);
        let plan = MergePlan::new(
            &data,
            &["ad_set_name".into(), "audience".into(), "wave_number".into()],
            "ad_set_name",
        );
        let sql = plan.render(
            Dialect::Snowflake,
            &target(),
            &target().sibling("NAMING_TEMP_1_ABCDEF12"),
        );
        assert_eq!(
            sql,
            "MERGE INTO CLIENT_MERGE_2024.NAMING AS target\n\
             USING CLIENT_MERGE_2024.NAMING_TEMP_1_ABCDEF12 AS source\n\
             ON target.\"AD_SET_NAME\" = source.\"ad_set_name\"\n\
             WHEN MATCHED THEN UPDATE SET \"AUDIENCE\" = source.\"audience\", \"WAVE_NUMBER\" = source.\"wave_number\"\n\
             WHEN NOT MATCHED THEN INSERT (\"AD_SET_NAME\", \"AUDIENCE\", \"WAVE_NUMBER\")\n    \
             VALUES (source.\"ad_set_name\", source.\"audience\", source.\"wave_number\")"
        );
    }

    #[test]
    fn key_only_plan_never_updates() {
        let data = Table::new(vec![Column::text("ad_set_name", &[Some("a")])]);
        let plan = MergePlan::new(&data, &["ad_set_name".to_string()], "ad_set_name");
        let snowflake = plan.render(Dialect::Snowflake, &target(), &target().sibling("T"));
        assert!(!snowflake.contains("WHEN MATCHED"));
        let sqlite = plan.render(Dialect::Sqlite, &target(), &target().sibling("T"));
        assert!(sqlite.ends_with("ON CONFLICT(\"AD_SET_NAME\") DO NOTHING"));
    }

    #[test]
    fn digit_led_columns_match_the_expanded_name() {
        let data = Table::new(vec![
            Column::text("ad_name", &[Some("a")]),
            Column::new("3_second_video_plays", ColumnData::Integer(vec![Some(9)])),
        ]);
        let plan = MergePlan::new(
            &data,
            &["AD_NAME".to_string(), "3_SECOND_VIDEO_PLAYS".to_string()],
            "ad_name",
        );
        let sql = plan.render(Dialect::Snowflake, &target(), &target().sibling("T"));
        assert!(sql.contains(
            "UPDATE SET \"3_SECOND_VIDEO_PLAYS\" = source.\"3_second_video_plays\""
        ));
        assert!(sql.contains("INSERT (\"AD_NAME\", \"3_SECOND_VIDEO_PLAYS\")"));
        assert!(!sql.contains("target.\"3_second"));
    }

    #[test]
    fn keyword_columns_are_upserted() {
        let mut session = session();
        session
            .execute("ALTER TABLE CLIENT_MERGE_2024.NAMING ADD COLUMN \"GROUP\" TEXT")
            .expect("alter");
        let mut data = rows("a", 1);
        data.set_column(Column::text("group", &[Some("g1"), Some("g2")]));
        let report = upsert(&mut session, &target(), RecordKind::NamingKey, &data, "TEMP_KW")
            .expect("upsert");
        assert_eq!(report.warning, None);
        let stored = session
            .query("SELECT \"group\" FROM CLIENT_MERGE_2024.NAMING ORDER BY ad_set_name")
            .expect("select");
        assert_eq!(stored, vec![vec![Some(Value::String("g1".into()))], vec![Some(Value::String("g2".into()))]]);
    }

    #[test]
    fn repeated_upsert_overwrites_in_place() {
        let mut session = session();
        let first = upsert(&mut session, &target(), RecordKind::NamingKey, &rows("a", 1), "TEMP_A")
            .expect("first upsert");
        assert_eq!(first.message, "Inserted/Updated 2 naming key records");
        upsert(&mut session, &target(), RecordKind::NamingKey, &rows("z", 2), "TEMP_B")
            .expect("second upsert");

        let stored = contents(&mut session);
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0][1], Some(Value::String("z".into())));
        assert_eq!(stored[0][2], Some(Value::Integer(2)));
        assert!(session.table_columns(&target().sibling("TEMP_B")).is_err());
    }

    #[test]
    fn unknown_columns_are_reported_not_written() {
        let mut session = session();
        let mut data = rows("a", 1);
        data.set_column(Column::text("brand_new", &[Some("x"), Some("y")]));
        let report = upsert(&mut session, &target(), RecordKind::NamingKey, &data, "TEMP")
            .expect("upsert");
        let warning = report.warning.expect("warning");
        assert!(warning.contains("1 column(s) not present"));
        assert!(warning.contains("brand_new"));
        assert!(warning.starts_with("Uploaded naming key file has 1 column(s)"));
        assert!(report.message.contains(" | "));
    }

    #[test]
    fn no_shared_columns_is_an_error() {
        let mut session = session();
        let data = Table::new(vec![Column::text("other", &[Some("x")])]);
        let err = upsert(&mut session, &target(), RecordKind::NamingKey, &data, "TEMP")
            .expect_err("nothing to write");
        assert!(matches!(err, EngineError::NoMatchingColumns { .. }));
    }

    #[test]
    fn failed_merge_still_drops_staging_table() {
        let mut session = Flaky {
            inner: session(),
            fail_prefix: "INSERT INTO",
        };
        let err = upsert(&mut session, &target(), RecordKind::NamingKey, &rows("a", 1), "TEMP_FAIL")
            .expect_err("merge fails");
        assert!(matches!(err, EngineError::Merge { .. }));
        assert!(err.to_string().contains("injected failure"));
        let lookup = session.table_columns(&target().sibling("TEMP_FAIL"));
        assert!(matches!(lookup, Err(WarehouseError::TableNotFound(_))));
        assert!(contents(&mut session.inner).is_empty());
    }

    #[test]
    fn failed_drop_does_not_fail_the_merge() {
        let mut session = Flaky {
            inner: session(),
            fail_prefix: "DROP TABLE",
        };
        let report = upsert(&mut session, &target(), RecordKind::NamingKey, &rows("a", 1), "TEMP_KEEP")
            .expect("merge succeeds");
        assert_eq!(report.rows, 2);
        assert_eq!(contents(&mut session.inner).len(), 2);
    }
}
