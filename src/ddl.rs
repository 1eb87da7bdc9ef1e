//! Fixed table definitions for one client schema.
//!
//! The definitions are generated from the same [`SchemaSet`] the preprocessor
//! enforces, so the declared columns exist in exactly one place.

use std::fmt::Write as _;

use log::{error, info};

use crate::{
    error::{EngineError, EngineResult},
    preprocess::WAVE_NUMBER_COLUMN,
    schema::{ColumnType, ExpectedSchema, RecordKind, SchemaSet},
    warehouse::{
        Dialect, PROCESSING_LOG_TABLE, TableRef, WarehouseSession, column_identifier, stage_name,
        table_name, view_name,
    },
};

pub const UPLOAD_TIMESTAMP_COLUMN: &str = "upload_timestamp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlStatement {
    pub label: &'static str,
    pub sql: String,
}

/// Statements that create the schema, its stage and the three tables for one
/// platform, in execution order. Stages are only emitted where supported.
pub fn schema_statements(
    dialect: Dialect,
    schema: &str,
    platform: &str,
    schemas: &SchemaSet,
) -> Vec<DdlStatement> {
    let naming_table = table_name(platform, RecordKind::NamingKey);
    let campaign_table = table_name(platform, RecordKind::Campaign);

    let mut statements = vec![DdlStatement {
        label: "create_schema",
        sql: format!("CREATE SCHEMA IF NOT EXISTS {schema}"),
    }];
    if dialect.supports_stages() {
        statements.push(DdlStatement {
            label: "create_stage",
            sql: format!(
                "CREATE STAGE IF NOT EXISTS {schema}.{}\nFILE_FORMAT = (TYPE = CSV SKIP_HEADER = 1 FIELD_OPTIONALLY_ENCLOSED_BY = '\"')",
                stage_name(schema)
            ),
        });
    }
    statements.push(DdlStatement {
        label: "create_naming_keys_table",
        sql: record_table(dialect, schema, &naming_table, &schemas.naming, None),
    });
    let reference_table = if dialect.scopes_references_to_schema() {
        naming_table.clone()
    } else {
        format!("{schema}.{naming_table}")
    };
    let foreign_key = format!(
        "FOREIGN KEY ({key}) REFERENCES {reference_table}({key})",
        key = column_identifier(RecordKind::NamingKey.key_column())
    );
    statements.push(DdlStatement {
        label: "create_processed_campaign_data_table",
        sql: record_table(
            dialect,
            schema,
            &campaign_table,
            &schemas.campaign,
            Some(foreign_key),
        ),
    });
    statements.push(DdlStatement {
        label: "create_processing_log_table",
        sql: processing_log_table(dialect, schema),
    });
    statements
}

fn record_table(
    dialect: Dialect,
    schema: &str,
    table: &str,
    expected: &ExpectedSchema,
    constraint: Option<String>,
) -> String {
    let mut lines = Vec::with_capacity(expected.len() + 3);
    if !expected.contains(WAVE_NUMBER_COLUMN) {
        lines.push(format!(
            "{} {}",
            column_identifier(WAVE_NUMBER_COLUMN),
            dialect.column_type(ColumnType::Int)
        ));
    }
    for column in &expected.columns {
        let mut line = format!(
            "{} {}",
            column_identifier(column.name.display()),
            dialect.column_type(column.datatype)
        );
        if column.name.matches(expected.key_column()) {
            line.push_str(" PRIMARY KEY");
        }
        lines.push(line);
    }
    lines.push(format!(
        "{} {} DEFAULT {}",
        column_identifier(UPLOAD_TIMESTAMP_COLUMN),
        dialect.timestamp_type(),
        dialect.current_timestamp()
    ));
    lines.extend(constraint);
    format!(
        "CREATE TABLE IF NOT EXISTS {schema}.{table} (\n    {}\n)",
        lines.join(",\n    ")
    )
}

fn processing_log_table(dialect: Dialect, schema: &str) -> String {
    let id = match dialect {
        Dialect::Snowflake => "log_id INTEGER AUTOINCREMENT PRIMARY KEY",
        Dialect::Sqlite => "log_id INTEGER PRIMARY KEY AUTOINCREMENT",
    };
    let int = dialect.column_type(ColumnType::Int);
    let float = dialect.column_type(ColumnType::Float);
    let string = dialect.column_type(ColumnType::String);
    let mut sql = format!("CREATE TABLE IF NOT EXISTS {schema}.{PROCESSING_LOG_TABLE} (\n");
    let _ = writeln!(sql, "    {id},");
    let _ = writeln!(sql, "    wave_number {int},");
    let _ = writeln!(
        sql,
        "    processing_timestamp {} DEFAULT {},",
        dialect.timestamp_type(),
        dialect.current_timestamp()
    );
    let _ = writeln!(sql, "    status {string},");
    let _ = writeln!(sql, "    records_processed {int},");
    let _ = writeln!(sql, "    errors_count {int},");
    let _ = writeln!(sql, "    warnings_count {int},");
    let _ = writeln!(sql, "    processing_time_seconds {float},");
    let _ = writeln!(sql, "    client_name {string},");
    let _ = writeln!(sql, "    platform {string},");
    let _ = writeln!(sql, "    year {int}");
    sql.push(')');
    sql
}

/// Statements that (re)create the per-platform view joining campaign rows with
/// their naming keys.
pub fn view_statements(
    dialect: Dialect,
    schema: &str,
    platform: &str,
    naming: &ExpectedSchema,
) -> Vec<String> {
    let view = view_name(platform);
    let qualify = |table: String| {
        if dialect.scopes_references_to_schema() {
            table
        } else {
            format!("{schema}.{table}")
        }
    };
    let campaign_table = qualify(table_name(platform, RecordKind::Campaign));
    let naming_table = qualify(table_name(platform, RecordKind::NamingKey));
    let key = naming.key_column();
    let key_column = column_identifier(key);
    let mut select = vec!["d.*".to_string()];
    select.extend(
        naming
            .names()
            .filter(|name| *name != key)
            .map(|name| format!("nk.{}", column_identifier(name))),
    );
    let body = format!(
        "AS\nSELECT\n    {}\nFROM {campaign_table} d\nJOIN {naming_table} nk\n    ON d.{key_column} = nk.{key_column}",
        select.join(",\n    ")
    );
    match dialect {
        Dialect::Snowflake => vec![format!("CREATE OR REPLACE VIEW {schema}.{view} {body}")],
        Dialect::Sqlite => vec![
            format!("DROP VIEW IF EXISTS {schema}.{view}"),
            format!("CREATE VIEW {schema}.{view} {body}"),
        ],
    }
}

/// Creates the client schema and every fixed table for `platform`. Existing
/// objects are left untouched.
pub fn create_schema_and_tables(
    session: &mut dyn WarehouseSession,
    schema: &str,
    platform: &str,
    schemas: &SchemaSet,
) -> EngineResult<String> {
    let dialect = session.dialect();
    let platform_label = platform.to_uppercase();
    session.ensure_schema(schema).inspect_err(|err| {
        error!("Failed to create schema {schema}: {err}");
    })?;
    for statement in schema_statements(dialect, schema, platform, schemas) {
        // Schemas are created through the session, which knows how its
        // backend makes one addressable.
        if statement.label == "create_schema" {
            continue;
        }
        info!("Executing: {} for platform {platform_label}", statement.label);
        session.execute(&statement.sql).inspect_err(|err| {
            error!("Failed to create schema and tables: {err}");
        })?;
    }
    info!("Created schema {schema} with {platform_label} tables");
    Ok(format!("Schema {schema} created with {platform_label} tables"))
}

/// Recreates the per-platform view after checking both source tables are
/// readable.
pub fn create_view(
    session: &mut dyn WarehouseSession,
    schema: &str,
    platform: &str,
    naming: &ExpectedSchema,
) -> EngineResult<String> {
    for kind in [RecordKind::Campaign, RecordKind::NamingKey] {
        let table = TableRef::new(schema, table_name(platform, kind));
        session
            .query(&format!("SELECT 1 FROM {table} LIMIT 1"))
            .map_err(|source| {
                error!("Source tables do not exist or are not accessible: {source}");
                EngineError::Introspection {
                    table: table.to_string(),
                    source,
                }
            })?;
    }
    let view = TableRef::new(schema, view_name(platform));
    info!("Creating view: {view}");
    for sql in view_statements(session.dialect(), schema, platform, naming) {
        session.execute(&sql)?;
    }
    Ok(format!("Created view {view}"))
}

/// Renders every statement for display, separated by semicolons.
pub fn render_script(dialect: Dialect, schema: &str, platform: &str, schemas: &SchemaSet) -> String {
    let mut script = String::new();
    for statement in schema_statements(dialect, schema, platform, schemas) {
        let _ = writeln!(script, "-- {}\n{};\n", statement.label, statement.sql);
    }
    for sql in view_statements(dialect, schema, platform, &schemas.naming) {
        let _ = writeln!(script, "{sql};\n");
    }
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::sqlite::SqliteSession;

    const SCHEMA: &str = "CLIENT_ACME_2024";

    #[test]
    fn snowflake_statements_follow_execution_order() {
        let statements = schema_statements(Dialect::Snowflake, SCHEMA, "meta", &SchemaSet::builtin());
        let labels: Vec<_> = statements.iter().map(|s| s.label).collect();
        assert_eq!(
            labels,
            vec![
                "create_schema",
                "create_stage",
                "create_naming_keys_table",
                "create_processed_campaign_data_table",
                "create_processing_log_table"
            ]
        );
        let campaign = &statements[3].sql;
        assert!(campaign.contains("\"AD_NAME\" STRING PRIMARY KEY"));
        assert!(campaign.contains("\"STARTS\" DATETIME"));
        assert!(campaign.contains(
            "FOREIGN KEY (\"AD_SET_NAME\") REFERENCES CLIENT_ACME_2024.META_NAMING_KEYS(\"AD_SET_NAME\")"
        ));
        let naming = &statements[2].sql;
        assert!(naming.starts_with("CREATE TABLE IF NOT EXISTS CLIENT_ACME_2024.META_NAMING_KEYS"));
        assert!(naming.contains("\"WAVE_NUMBER\" INT,"));
        assert!(naming.contains("\"UPLOAD_TIMESTAMP\" TIMESTAMP DEFAULT CURRENT_TIMESTAMP()"));
    }

    #[test]
    fn sqlite_statements_skip_stage() {
        let statements = schema_statements(Dialect::Sqlite, SCHEMA, "meta", &SchemaSet::builtin());
        assert!(statements.iter().all(|s| s.label != "create_stage"));
        assert!(statements[3].sql.contains("REFERENCES META_NAMING_KEYS(\"AD_SET_NAME\")"));
    }

    #[test]
    fn snowflake_view_is_replaced_in_place() {
        let schemas = SchemaSet::builtin();
        let statements = view_statements(Dialect::Snowflake, SCHEMA, "meta", &schemas.naming);
        assert_eq!(statements.len(), 1);
        let sql = &statements[0];
        assert!(sql.starts_with(
            "CREATE OR REPLACE VIEW CLIENT_ACME_2024.META_AUDIENCE_AD_DESCRIPTOR_DATA AS"
        ));
        assert!(sql.contains("nk.\"AUDIENCE\""));
        assert!(!sql.contains("nk.\"AD_SET_NAME\","));
        assert!(sql.contains("ON d.\"AD_SET_NAME\" = nk.\"AD_SET_NAME\""));
    }

    #[test]
    fn tables_and_view_are_created_in_sqlite() {
        let schemas = SchemaSet::builtin();
        let mut session = SqliteSession::in_memory().expect("warehouse");
        let message =
            create_schema_and_tables(&mut session, SCHEMA, "meta", &schemas).expect("create");
        assert_eq!(message, "Schema CLIENT_ACME_2024 created with META tables");
        create_schema_and_tables(&mut session, SCHEMA, "meta", &schemas).expect("idempotent");

        let columns = session
            .table_columns(&TableRef::new(SCHEMA, "META_NAMING_KEYS"))
            .expect("naming table");
        assert_eq!(columns.first().map(String::as_str), Some("WAVE_NUMBER"));
        assert_eq!(columns.last().map(String::as_str), Some("UPLOAD_TIMESTAMP"));

        let message = create_view(&mut session, SCHEMA, "meta", &schemas.naming).expect("view");
        assert_eq!(
            message,
            "Created view CLIENT_ACME_2024.META_AUDIENCE_AD_DESCRIPTOR_DATA"
        );
        create_view(&mut session, SCHEMA, "meta", &schemas.naming).expect("view is replaceable");
    }

    #[test]
    fn view_requires_source_tables() {
        let schemas = SchemaSet::builtin();
        let mut session = SqliteSession::in_memory().expect("warehouse");
        session.ensure_schema(SCHEMA).expect("schema");
        let err = create_view(&mut session, SCHEMA, "meta", &schemas.naming).expect_err("no tables");
        assert!(matches!(err, EngineError::Introspection { .. }));
    }
}
