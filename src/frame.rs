//! Columnar in-memory tables.
//!
//! Inputs are read into a [`Table`] whose columns all use [`ColumnData::Text`]
//! storage; coercion replaces a column's storage with one of the native kinds.
//! The storage kind is what type inference treats as "already typed".

use std::collections::HashSet;

use chrono::NaiveDateTime;

use crate::{
    columns::ColumnName,
    data::{Cell, Value},
};

/// Physical storage of one column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Text(Vec<Option<String>>),
    Integer(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Boolean(Vec<Option<bool>>),
    DateTime(Vec<Option<NaiveDateTime>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Text,
    Integer,
    Float,
    Boolean,
    DateTime,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Text => "text",
            StorageKind::Integer => "integer",
            StorageKind::Float => "float",
            StorageKind::Boolean => "boolean",
            StorageKind::DateTime => "datetime",
        }
    }
}

impl ColumnData {
    pub fn kind(&self) -> StorageKind {
        match self {
            ColumnData::Text(_) => StorageKind::Text,
            ColumnData::Integer(_) => StorageKind::Integer,
            ColumnData::Float(_) => StorageKind::Float,
            ColumnData::Boolean(_) => StorageKind::Boolean,
            ColumnData::DateTime(_) => StorageKind::DateTime,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Text(values) => values.len(),
            ColumnData::Integer(values) => values.len(),
            ColumnData::Float(values) => values.len(),
            ColumnData::Boolean(values) => values.len(),
            ColumnData::DateTime(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cell(&self, row: usize) -> Cell {
        match self {
            ColumnData::Text(values) => values.get(row)?.clone().map(Value::String),
            ColumnData::Integer(values) => values.get(row).copied()?.map(Value::Integer),
            ColumnData::Float(values) => values.get(row).copied()?.map(Value::Float),
            ColumnData::Boolean(values) => values.get(row).copied()?.map(Value::Boolean),
            ColumnData::DateTime(values) => values.get(row).copied()?.map(Value::DateTime),
        }
    }

    pub fn is_null(&self, row: usize) -> bool {
        match self {
            ColumnData::Text(values) => values.get(row).is_none_or(Option::is_none),
            ColumnData::Integer(values) => values.get(row).is_none_or(Option::is_none),
            ColumnData::Float(values) => values.get(row).is_none_or(Option::is_none),
            ColumnData::Boolean(values) => values.get(row).is_none_or(Option::is_none),
            ColumnData::DateTime(values) => values.get(row).is_none_or(Option::is_none),
        }
    }

    pub fn null_count(&self) -> usize {
        (0..self.len()).filter(|row| self.is_null(*row)).count()
    }

    /// Renders every cell as text; typed storage goes through [`Value::as_display`].
    pub fn to_text(&self) -> Vec<Option<String>> {
        match self {
            ColumnData::Text(values) => values.clone(),
            _ => (0..self.len())
                .map(|row| self.cell(row).map(|value| value.as_display()))
                .collect(),
        }
    }

    pub fn nulls(kind: StorageKind, len: usize) -> Self {
        match kind {
            StorageKind::Text => ColumnData::Text(vec![None; len]),
            StorageKind::Integer => ColumnData::Integer(vec![None; len]),
            StorageKind::Float => ColumnData::Float(vec![None; len]),
            StorageKind::Boolean => ColumnData::Boolean(vec![None; len]),
            StorageKind::DateTime => ColumnData::DateTime(vec![None; len]),
        }
    }

    /// Builds a column from already typed cells, picking storage from the first
    /// non-null value. Mixed cells fall back to text storage.
    pub fn from_cells(cells: Vec<Cell>) -> Self {
        let kind = cells
            .iter()
            .flatten()
            .next()
            .map(|value| match value {
                Value::String(_) => StorageKind::Text,
                Value::Integer(_) => StorageKind::Integer,
                Value::Float(_) => StorageKind::Float,
                Value::Boolean(_) => StorageKind::Boolean,
                Value::DateTime(_) => StorageKind::DateTime,
            })
            .unwrap_or(StorageKind::Text);
        let homogeneous = cells.iter().flatten().all(|value| {
            matches!(
                (kind, value),
                (StorageKind::Text, Value::String(_))
                    | (StorageKind::Integer, Value::Integer(_))
                    | (StorageKind::Float, Value::Float(_))
                    | (StorageKind::Boolean, Value::Boolean(_))
                    | (StorageKind::DateTime, Value::DateTime(_))
            )
        });
        if !homogeneous {
            return ColumnData::Text(
                cells
                    .into_iter()
                    .map(|cell| cell.map(|value| value.as_display()))
                    .collect(),
            );
        }
        match kind {
            StorageKind::Text => ColumnData::Text(
                cells
                    .into_iter()
                    .map(|cell| match cell {
                        Some(Value::String(s)) => Some(s),
                        _ => None,
                    })
                    .collect(),
            ),
            StorageKind::Integer => ColumnData::Integer(
                cells
                    .into_iter()
                    .map(|cell| match cell {
                        Some(Value::Integer(i)) => Some(i),
                        _ => None,
                    })
                    .collect(),
            ),
            StorageKind::Float => ColumnData::Float(
                cells
                    .into_iter()
                    .map(|cell| match cell {
                        Some(Value::Float(f)) => Some(f),
                        _ => None,
                    })
                    .collect(),
            ),
            StorageKind::Boolean => ColumnData::Boolean(
                cells
                    .into_iter()
                    .map(|cell| match cell {
                        Some(Value::Boolean(b)) => Some(b),
                        _ => None,
                    })
                    .collect(),
            ),
            StorageKind::DateTime => ColumnData::DateTime(
                cells
                    .into_iter()
                    .map(|cell| match cell {
                        Some(Value::DateTime(dt)) => Some(dt),
                        _ => None,
                    })
                    .collect(),
            ),
        }
    }

    fn retain_rows(&mut self, keep: &[bool]) {
        fn filter<T>(values: &mut Vec<T>, keep: &[bool]) {
            let mut idx = 0;
            values.retain(|_| {
                let retained = keep.get(idx).copied().unwrap_or(true);
                idx += 1;
                retained
            });
        }
        match self {
            ColumnData::Text(values) => filter(values, keep),
            ColumnData::Integer(values) => filter(values, keep),
            ColumnData::Float(values) => filter(values, keep),
            ColumnData::Boolean(values) => filter(values, keep),
            ColumnData::DateTime(values) => filter(values, keep),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: ColumnName,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<ColumnName>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn text<S: AsRef<str>>(name: &str, values: &[Option<S>]) -> Self {
        Self::new(
            name,
            ColumnData::Text(
                values
                    .iter()
                    .map(|value| value.as_ref().map(|v| v.as_ref().to_string()))
                    .collect(),
            ),
        )
    }
}

/// An ordered collection of equally long columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Builds a text table from a header row and string records; short records
    /// are padded with missing cells and empty fields become missing.
    pub fn from_records(headers: &[String], records: &[Vec<String>]) -> Self {
        let columns = headers
            .iter()
            .enumerate()
            .map(|(idx, header)| {
                let values = records
                    .iter()
                    .map(|record| {
                        record
                            .get(idx)
                            .filter(|value| !value.is_empty())
                            .cloned()
                    })
                    .collect();
                Column::new(header.as_str(), ColumnData::Text(values))
            })
            .collect();
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    pub fn column_names(&self) -> Vec<ColumnName> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map(|c| c.data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.matches(name))
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name.matches(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Inserts a column, replacing the content of an existing column with the
    /// same identity in place (its position is kept).
    pub fn set_column(&mut self, column: Column) {
        if let Some(existing) = self.columns.iter_mut().find(|c| c.name == column.name) {
            existing.data = column.data;
        } else {
            self.columns.push(column);
        }
    }

    pub fn retain_columns<F>(&mut self, keep: F)
    where
        F: FnMut(&Column) -> bool,
    {
        self.columns.retain(keep);
    }

    /// Renames every column. Columns whose new names collide collapse into the
    /// first position with the content of the last one.
    pub fn rename_columns<F>(&mut self, mut rename: F)
    where
        F: FnMut(&ColumnName) -> ColumnName,
    {
        let columns = std::mem::take(&mut self.columns);
        for column in columns {
            let name = rename(&column.name);
            self.set_column(Column::new(name, column.data));
        }
    }

    pub fn cell(&self, name: &str, row: usize) -> Cell {
        self.column(name).and_then(|c| c.data.cell(row))
    }

    pub fn row(&self, row: usize) -> Vec<Cell> {
        self.columns.iter().map(|c| c.data.cell(row)).collect()
    }

    pub fn rows(&self) -> Vec<Vec<Cell>> {
        (0..self.row_count()).map(|row| self.row(row)).collect()
    }

    /// Projects the table onto `names` in the given order; unknown names are skipped.
    pub fn select(&self, names: &[ColumnName]) -> Table {
        let columns = names
            .iter()
            .filter_map(|name| self.columns.iter().find(|c| &c.name == name).cloned())
            .collect();
        Table { columns }
    }

    /// Row fingerprints used for duplicate detection; floats compare bitwise.
    fn row_fingerprint(&self, row: usize) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| match c.data.cell(row) {
                None => "\u{0}null".to_string(),
                Some(Value::Float(f)) => format!("f{}", f.to_bits()),
                Some(Value::String(s)) => format!("s{s}"),
                Some(other) => format!("v{}", other.as_display()),
            })
            .collect()
    }

    pub fn duplicate_row_count(&self) -> usize {
        let mut seen = HashSet::new();
        (0..self.row_count())
            .filter(|row| !seen.insert(self.row_fingerprint(*row)))
            .count()
    }

    /// Removes rows equal to an earlier row in every column. Returns the number
    /// of rows removed.
    pub fn drop_duplicate_rows(&mut self) -> usize {
        let mut seen = HashSet::new();
        let keep: Vec<bool> = (0..self.row_count())
            .map(|row| seen.insert(self.row_fingerprint(row)))
            .collect();
        let removed = keep.iter().filter(|kept| !**kept).count();
        if removed > 0 {
            for column in &mut self.columns {
                column.data.retain_rows(&keep);
            }
        }
        removed
    }
}
