//! Removal of clock-duration text from metric columns.
//!
//! Ad-platform exports sometimes render an empty duration metric as `0:00:00`
//! in a column that otherwise holds counts. Those cells are numeric-looking
//! but meaningless, so they are turned into missing values before any
//! column is coerced.

use std::sync::LazyLock;

use log::info;
use regex::Regex;

use crate::{
    columns::ColumnName,
    frame::{ColumnData, Table},
    infer::{InferencePolicy, infer_text_type},
    schema::ExpectedSchema,
};

static CLOCK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}:\d{2}:\d{2}$").expect("clock pattern compiles"));

pub fn is_clock_value(value: &str) -> bool {
    CLOCK_PATTERN.is_match(value)
}

/// Per-column counts of scrubbed cells, in table order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrubReport {
    pub columns: Vec<(ColumnName, usize)>,
}

impl ScrubReport {
    pub fn total(&self) -> usize {
        self.columns.iter().map(|(_, count)| *count).sum()
    }
}

/// Replaces clock-formatted cells with missing values in every text column
/// that resolves to `INT` or `FLOAT`. A column declared in `schema` resolves to
/// its declared type; any other column resolves through inference. Columns
/// with native numeric storage are left alone.
pub fn scrub_clock_values(
    table: &mut Table,
    schema: Option<&ExpectedSchema>,
    policy: &InferencePolicy,
) -> ScrubReport {
    let mut report = ScrubReport::default();
    for column in table.columns_mut() {
        let ColumnData::Text(values) = &mut column.data else {
            continue;
        };
        let resolved = match schema.and_then(|schema| schema.datatype_of(column.name.key())) {
            Some(declared) => declared,
            None => infer_text_type(values, policy),
        };
        if !resolved.is_numeric() {
            continue;
        }
        let mut cleaned = 0usize;
        for cell in values.iter_mut() {
            if cell.as_deref().is_some_and(is_clock_value) {
                *cell = None;
                cleaned += 1;
            }
        }
        if cleaned > 0 {
            info!(
                "Column '{}': cleared {cleaned} time-formatted value(s) (resolved type: {resolved})",
                column.name
            );
            report.columns.push((column.name.clone(), cleaned));
        }
    }
    if report.total() > 0 {
        info!("Total time-formatted values cleaned: {}", report.total());
    }
    report
}
