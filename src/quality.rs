use serde::Serialize;

use crate::frame::Table;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnQuality {
    pub name: String,
    pub storage: &'static str,
    pub missing: usize,
}

/// Shape and completeness summary of one processed table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityReport {
    pub total_rows: usize,
    pub total_columns: usize,
    pub duplicate_rows: usize,
    pub columns: Vec<ColumnQuality>,
}

impl QualityReport {
    pub fn from_table(table: &Table) -> Self {
        let columns = table
            .columns()
            .iter()
            .map(|column| ColumnQuality {
                name: column.name.display().to_string(),
                storage: column.data.kind().as_str(),
                missing: column.data.null_count(),
            })
            .collect();
        Self {
            total_rows: table.row_count(),
            total_columns: table.width(),
            duplicate_rows: table.duplicate_row_count(),
            columns,
        }
    }

    pub fn missing_values(&self) -> usize {
        self.columns.iter().map(|column| column.missing).sum()
    }

    /// Columns with at least one missing value, most incomplete first.
    pub fn incomplete_columns(&self) -> Vec<&ColumnQuality> {
        let mut incomplete: Vec<&ColumnQuality> =
            self.columns.iter().filter(|c| c.missing > 0).collect();
        incomplete.sort_by(|a, b| b.missing.cmp(&a.missing).then_with(|| a.name.cmp(&b.name)));
        incomplete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Column, ColumnData};

    #[test]
    fn report_counts_missing_and_duplicates() {
        let table = Table::new(vec![
            Column::text("ad_name", &[Some("a"), Some("a"), None]),
            Column::new("reach", ColumnData::Integer(vec![Some(1), Some(1), None])),
        ]);
        let report = QualityReport::from_table(&table);
        assert_eq!(report.total_rows, 3);
        assert_eq!(report.total_columns, 2);
        assert_eq!(report.duplicate_rows, 1);
        assert_eq!(report.missing_values(), 2);
        assert_eq!(report.columns[1].storage, "integer");
        assert_eq!(report.incomplete_columns().len(), 2);
    }
}
