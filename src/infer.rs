//! Column type inference and coercion.
//!
//! Inference looks at storage first: natively typed columns are classified
//! without inspecting a single value. Text columns are sampled in full and
//! classified by the share of values that survive numeric and then temporal
//! coercion, compared against the [`InferencePolicy`] thresholds.

use serde::{Deserialize, Serialize};

use anyhow::{Result, ensure};

use crate::{
    data::{parse_naive_datetime, parse_numeric},
    frame::ColumnData,
    schema::ColumnType,
};

/// Default share of non-missing values that must coerce before a text column
/// is treated as numeric or temporal.
pub const DEFAULT_SUCCESS_THRESHOLD: f64 = 0.8;

/// Thresholds are exclusive: a ratio must be strictly greater to qualify.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferencePolicy {
    pub numeric_threshold: f64,
    pub temporal_threshold: f64,
}

impl Default for InferencePolicy {
    fn default() -> Self {
        Self {
            numeric_threshold: DEFAULT_SUCCESS_THRESHOLD,
            temporal_threshold: DEFAULT_SUCCESS_THRESHOLD,
        }
    }
}

impl InferencePolicy {
    pub fn validate(&self) -> Result<()> {
        for (label, value) in [
            ("numeric_threshold", self.numeric_threshold),
            ("temporal_threshold", self.temporal_threshold),
        ] {
            ensure!(
                (0.0..1.0).contains(&value),
                "{label} must be within [0, 1), got {value}"
            );
        }
        Ok(())
    }
}

/// Column types as the warehouse declares them when a column is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarehouseType {
    Integer,
    Float,
    Timestamp,
    Boolean,
    String,
}

/// Infers the intended type of a column. Never fails; anything undecidable is
/// a `STRING`.
pub fn infer_column_type(data: &ColumnData, policy: &InferencePolicy) -> ColumnType {
    match data {
        ColumnData::DateTime(_) => ColumnType::DateTime,
        ColumnData::Integer(_) | ColumnData::Boolean(_) => ColumnType::Int,
        ColumnData::Float(_) => ColumnType::Float,
        ColumnData::Text(values) => infer_text_type(values, policy),
    }
}

/// Variant of [`infer_column_type`] used when adding warehouse columns: native
/// booleans keep their own type and temporal columns map to timestamps.
pub fn infer_warehouse_type(data: &ColumnData, policy: &InferencePolicy) -> WarehouseType {
    if let ColumnData::Boolean(_) = data {
        return WarehouseType::Boolean;
    }
    match infer_column_type(data, policy) {
        ColumnType::Int => WarehouseType::Integer,
        ColumnType::Float => WarehouseType::Float,
        ColumnType::DateTime => WarehouseType::Timestamp,
        ColumnType::String => WarehouseType::String,
    }
}

/// Inference over raw text cells; missing cells are ignored.
pub fn infer_text_type(values: &[Option<String>], policy: &InferencePolicy) -> ColumnType {
    let present: Vec<&str> = values.iter().flatten().map(String::as_str).collect();
    if present.is_empty() {
        return ColumnType::String;
    }
    let total = present.len() as f64;

    let numeric: Vec<f64> = present.iter().filter_map(|v| parse_numeric(v)).collect();
    if numeric.len() as f64 / total > policy.numeric_threshold {
        let integral = numeric.iter().all(|value| value.fract() == 0.0);
        return if integral {
            ColumnType::Int
        } else {
            ColumnType::Float
        };
    }

    let temporal = present
        .iter()
        .filter(|v| parse_naive_datetime(v).is_ok())
        .count();
    if temporal as f64 / total > policy.temporal_threshold {
        return ColumnType::DateTime;
    }

    ColumnType::String
}

/// Converts a column to the storage of `target`. Cells that fail coercion
/// become missing; no row is ever dropped. `STRING` renders missing cells as
/// empty strings.
pub fn coerce_column(data: &ColumnData, target: ColumnType) -> ColumnData {
    match target {
        ColumnType::Int => ColumnData::Integer(coerce_integers(data)),
        ColumnType::Float => ColumnData::Float(coerce_floats(data)),
        ColumnType::DateTime => ColumnData::DateTime(coerce_datetimes(data)),
        ColumnType::String => ColumnData::Text(
            data.to_text()
                .into_iter()
                .map(|value| Some(value.unwrap_or_default()))
                .collect(),
        ),
    }
}

/// The empty storage a declared-but-absent column is backfilled with.
pub fn backfill_column(target: ColumnType, len: usize) -> ColumnData {
    match target {
        ColumnType::Int => ColumnData::Integer(vec![None; len]),
        ColumnType::Float => ColumnData::Float(vec![None; len]),
        ColumnType::DateTime => ColumnData::DateTime(vec![None; len]),
        ColumnType::String => ColumnData::Text(vec![Some(String::new()); len]),
    }
}

fn coerce_floats(data: &ColumnData) -> Vec<Option<f64>> {
    match data {
        ColumnData::Float(values) => values.clone(),
        ColumnData::Integer(values) => values.iter().map(|v| v.map(|i| i as f64)).collect(),
        ColumnData::Boolean(values) => values
            .iter()
            .map(|v| v.map(|b| if b { 1.0 } else { 0.0 }))
            .collect(),
        ColumnData::Text(values) => values
            .iter()
            .map(|v| v.as_deref().and_then(parse_numeric))
            .collect(),
        ColumnData::DateTime(values) => vec![None; values.len()],
    }
}

fn coerce_integers(data: &ColumnData) -> Vec<Option<i64>> {
    match data {
        ColumnData::Integer(values) => values.clone(),
        ColumnData::Boolean(values) => values.iter().map(|v| v.map(i64::from)).collect(),
        _ => coerce_floats(data)
            .into_iter()
            .map(|v| v.and_then(float_to_integer))
            .collect(),
    }
}

// Fractional values round half away from zero, matching a warehouse cast.
fn float_to_integer(value: f64) -> Option<i64> {
    let rounded = value.round();
    if rounded >= i64::MIN as f64 && rounded <= i64::MAX as f64 {
        Some(rounded as i64)
    } else {
        None
    }
}

fn coerce_datetimes(data: &ColumnData) -> Vec<Option<chrono::NaiveDateTime>> {
    match data {
        ColumnData::DateTime(values) => values.clone(),
        ColumnData::Text(values) => values
            .iter()
            .map(|v| v.as_deref().and_then(|s| parse_naive_datetime(s).ok()))
            .collect(),
        other => vec![None; other.len()],
    }
}
