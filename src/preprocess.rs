//! Turns a raw input table into a processed table that is safe to merge.
//!
//! The steps run in a fixed order: names are normalized, clock durations are
//! scrubbed from metric columns, the wave number is stamped, the two
//! identifier columns are reconciled, declared columns are backfilled and
//! coerced, undeclared columns are inferred and coerced, and exact duplicate
//! rows are dropped. No step removes a row except the final deduplication.

use std::collections::HashMap;

use log::{info, warn};
use serde::Serialize;

use crate::{
    columns::{ColumnName, normalize_column_name},
    frame::{Column, ColumnData, Table},
    infer::{InferencePolicy, backfill_column, coerce_column, infer_column_type},
    schema::{ColumnType, ExpectedSchema, RecordKind},
    scrub::{ScrubReport, scrub_clock_values},
};

pub const WAVE_NUMBER_COLUMN: &str = "wave_number";

/// A column's final type and whether it came from the declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedColumn {
    pub name: ColumnName,
    pub datatype: ColumnType,
    pub declared: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedTable {
    pub kind: RecordKind,
    pub table: Table,
    pub resolved: Vec<ResolvedColumn>,
    pub scrubbed: ScrubReport,
    pub dropped_labels: Vec<String>,
    pub duplicates_removed: usize,
}

impl ProcessedTable {
    pub fn row_count(&self) -> usize {
        self.table.row_count()
    }

    pub fn datatype_of(&self, name: &str) -> Option<ColumnType> {
        self.resolved
            .iter()
            .find(|column| column.name.matches(name))
            .map(|column| column.datatype)
    }

    /// Columns that are not part of the expected declaration.
    pub fn new_columns(&self) -> impl Iterator<Item = &ResolvedColumn> {
        self.resolved.iter().filter(|column| !column.declared)
    }
}

pub fn preprocess(
    raw: &Table,
    schema: &ExpectedSchema,
    wave: u32,
    policy: &InferencePolicy,
) -> ProcessedTable {
    info!(
        "Preprocessing {} with {} row(s)",
        schema.kind,
        raw.row_count()
    );
    let mut table = raw.clone();

    let dropped_labels = normalize_names(&mut table);
    info!("Step 1: column normalization complete");

    let scrubbed = scrub_clock_values(&mut table, Some(schema), policy);
    info!("Step 2: data cleaning complete");

    let rows = table.row_count();
    table.set_column(Column::new(
        WAVE_NUMBER_COLUMN,
        ColumnData::Integer(vec![Some(i64::from(wave)); rows]),
    ));

    if schema.kind == RecordKind::Campaign {
        reconcile_identifiers(
            &mut table,
            RecordKind::Campaign.key_column(),
            RecordKind::NamingKey.key_column(),
        );
    }

    let mut resolved = Vec::with_capacity(table.width() + schema.len());
    for expected in &schema.columns {
        let data = match table.column(expected.name.key()) {
            Some(column) => coerce_column(&column.data, expected.datatype),
            None => backfill_column(expected.datatype, rows),
        };
        table.set_column(Column::new(expected.name.clone(), data));
        resolved.push(ResolvedColumn {
            name: expected.name.clone(),
            datatype: expected.datatype,
            declared: true,
        });
    }
    info!("Step 3: expected columns type conversion complete");

    let undeclared: Vec<ColumnName> = table
        .column_names()
        .into_iter()
        .filter(|name| !schema.contains(name.key()))
        .collect();
    if !undeclared.is_empty() {
        info!(
            "Found {} column(s) not in the {} schema: {}",
            undeclared.len(),
            schema.kind,
            undeclared
                .iter()
                .map(ColumnName::display)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    for name in undeclared {
        let Some(column) = table.column_mut(name.key()) else {
            continue;
        };
        let datatype = infer_column_type(&column.data, policy);
        info!("  - {name}: inferred type = {datatype}");
        column.data = coerce_column(&column.data, datatype);
        resolved.push(ResolvedColumn {
            name,
            datatype,
            declared: false,
        });
    }
    info!("Step 4: new columns processed and typed");

    let duplicates_removed = table.drop_duplicate_rows();
    resolved.sort_by_key(|column| {
        table
            .columns()
            .iter()
            .position(|c| c.name == column.name)
            .unwrap_or(usize::MAX)
    });
    info!(
        "Preprocessing complete: {} row(s), {} column(s), {} duplicate(s) removed",
        table.row_count(),
        table.width(),
        duplicates_removed
    );

    ProcessedTable {
        kind: schema.kind,
        table,
        resolved,
        scrubbed,
        dropped_labels,
        duplicates_removed,
    }
}

/// Renames every column to its canonical form. Labels that normalize to
/// nothing are removed and returned. When two labels share a canonical name
/// the column keeps the first position and the last label's content.
fn normalize_names(table: &mut Table) -> Vec<String> {
    let mut dropped = Vec::new();
    let mut seen: HashMap<String, String> = HashMap::new();
    table.retain_columns(|column| {
        let canonical = normalize_column_name(column.name.display());
        if canonical.is_empty() {
            warn!(
                "Dropping column '{}': label has no usable characters",
                column.name
            );
            dropped.push(column.name.display().to_string());
            return false;
        }
        if let Some(previous) = seen.insert(canonical.clone(), column.name.display().to_string()) {
            warn!(
                "Columns '{previous}' and '{}' both normalize to '{canonical}'; keeping the content of '{}'",
                column.name, column.name
            );
        }
        true
    });
    table.rename_columns(|name| ColumnName::normalized(name.display()));
    dropped
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

/// Makes the two interchangeable identifier columns agree: a missing column
/// is synthesized from the other, and blank cells on either side are filled
/// from the other side of the same row.
fn reconcile_identifiers(table: &mut Table, primary: &str, secondary: &str) {
    let left = table.column(primary).map(|c| c.data.to_text());
    let right = table.column(secondary).map(|c| c.data.to_text());
    match (left, right) {
        (None, None) => {}
        (None, Some(values)) => {
            info!("{primary} column missing, using {secondary} as fallback");
            table.set_column(Column::new(primary, ColumnData::Text(values)));
        }
        (Some(values), None) => {
            info!("{secondary} column missing, using {primary} as fallback");
            table.set_column(Column::new(secondary, ColumnData::Text(values)));
        }
        (Some(mut left), Some(mut right)) => {
            let mut filled_left = 0usize;
            let mut filled_right = 0usize;
            for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                if is_blank(l) && !is_blank(r) {
                    *l = r.clone();
                    filled_left += 1;
                } else if is_blank(r) && !is_blank(l) {
                    *r = l.clone();
                    filled_right += 1;
                }
            }
            if filled_left > 0 {
                info!("Filled {filled_left} null/empty {primary} value(s) from {secondary}");
                table.set_column(Column::new(primary, ColumnData::Text(left)));
            }
            if filled_right > 0 {
                info!("Filled {filled_right} null/empty {secondary} value(s) from {primary}");
                table.set_column(Column::new(secondary, ColumnData::Text(right)));
            }
        }
    }
}
