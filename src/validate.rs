//! Structural checks run on raw input before preprocessing.

use serde::Serialize;

use crate::{
    columns::normalize_column_name,
    frame::Table,
    schema::{ExpectedSchema, RecordKind},
};

const LISTED_MISSING_COLUMNS: usize = 10;

/// Outcome of validating one input table. Errors stop the wave; warnings are
/// surfaced and processing continues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn validate_input(table: &Table, schema: &ExpectedSchema) -> ValidationReport {
    match schema.kind {
        RecordKind::Campaign => validate_campaign(table, schema),
        RecordKind::NamingKey => validate_naming(table, schema),
    }
}

fn validate_campaign(table: &Table, schema: &ExpectedSchema) -> ValidationReport {
    let mut report = ValidationReport::default();
    if table.is_empty() || table.width() == 0 {
        report.errors.push("Campaign data file is empty".to_string());
        return report;
    }
    let present = normalized_headers(table);
    let has = |name: &str| present.iter().any(|p| p == name);

    let critical = [
        RecordKind::Campaign.key_column(),
        RecordKind::NamingKey.key_column(),
    ];
    match (has(critical[0]), has(critical[1])) {
        (false, false) => report.errors.push(format!(
            "Missing critical columns (required): {} - at least one of {} or {} must be present",
            critical.join(", "),
            critical[0],
            critical[1]
        )),
        (false, true) => report.warnings.push(format!(
            "{} column missing - will use {} as fallback",
            critical[0], critical[1]
        )),
        (true, false) => report.warnings.push(format!(
            "{} column missing - will use {} as fallback",
            critical[1], critical[0]
        )),
        (true, true) => {}
    }

    let missing: Vec<&str> = schema
        .names()
        .filter(|name| !critical.iter().any(|c| c == name) && !is_stamped(name) && !has(*name))
        .collect();
    if let Some(warning) = missing_columns_warning("campaign", &missing) {
        report.warnings.push(warning);
    }
    report
}

fn validate_naming(table: &Table, schema: &ExpectedSchema) -> ValidationReport {
    let mut report = ValidationReport::default();
    if table.is_empty() || table.width() == 0 {
        report.errors.push("Naming key file is empty".to_string());
        return report;
    }
    let present = normalized_headers(table);
    let has = |name: &str| present.iter().any(|p| p == name);

    let key = schema.key_column();
    if !has(key) {
        report.errors.push(format!(
            "Missing critical column: '{key}' (required as primary key)"
        ));
    }
    let missing: Vec<&str> = schema
        .names()
        .filter(|name| *name != key && !is_stamped(name) && !has(*name))
        .collect();
    if let Some(warning) = missing_columns_warning("naming", &missing) {
        report.warnings.push(warning);
    }
    report
}

fn normalized_headers(table: &Table) -> Vec<String> {
    table
        .columns()
        .iter()
        .map(|column| normalize_column_name(column.name.display()))
        .collect()
}

// The wave number is always stamped by the preprocessor.
fn is_stamped(name: &str) -> bool {
    name == "wave_number"
}

fn missing_columns_warning(label: &str, missing: &[&str]) -> Option<String> {
    if missing.is_empty() {
        return None;
    }
    let listed = missing
        .iter()
        .take(LISTED_MISSING_COLUMNS)
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    let mut warning =
        format!("Missing optional {label} columns (will be filled with NULL): {listed}");
    if missing.len() > LISTED_MISSING_COLUMNS {
        warning.push_str(&format!(
            " and {} more",
            missing.len() - LISTED_MISSING_COLUMNS
        ));
    }
    Some(warning)
}
