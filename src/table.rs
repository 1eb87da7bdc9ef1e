//! Plain-text rendering of reports for the terminal.

use std::{borrow::Cow, fmt::Write as _};

use crate::{preprocess::ProcessedTable, quality::QualityReport, scrub::ScrubReport};

/// Renders rows under a header with a dashed separator, columns padded to
/// their widest cell and separated by two spaces.
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count().max(3)).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(clean(cell).chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(output, "{}", format_row(&separator, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| format!("{:<width$}", clean(value), width = *width))
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

fn clean(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

/// Per-column type resolution of a processed table.
pub fn render_columns(processed: &ProcessedTable) -> String {
    let headers = ["column", "type", "origin", "missing"].map(String::from);
    let rows: Vec<Vec<String>> = processed
        .resolved
        .iter()
        .map(|column| {
            let missing = processed
                .table
                .column(column.name.key())
                .map(|c| c.data.null_count())
                .unwrap_or_default();
            vec![
                column.name.display().to_string(),
                column.datatype.to_string(),
                (if column.declared { "declared" } else { "inferred" }).to_string(),
                missing.to_string(),
            ]
        })
        .collect();
    render_table(&headers, &rows)
}

pub fn render_quality(label: &str, report: &QualityReport) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "{label}: {} row(s), {} column(s), {} duplicate row(s), {} missing value(s)",
        report.total_rows,
        report.total_columns,
        report.duplicate_rows,
        report.missing_values()
    );
    let incomplete = report.incomplete_columns();
    if !incomplete.is_empty() {
        let headers = ["column", "storage", "missing"].map(String::from);
        let rows: Vec<Vec<String>> = incomplete
            .iter()
            .map(|c| vec![c.name.clone(), c.storage.to_string(), c.missing.to_string()])
            .collect();
        output.push_str(&render_table(&headers, &rows));
    }
    output
}

pub fn render_scrub(report: &ScrubReport) -> Option<String> {
    if report.columns.is_empty() {
        return None;
    }
    let headers = ["column", "cleared"].map(String::from);
    let rows: Vec<Vec<String>> = report
        .columns
        .iter()
        .map(|(name, count)| vec![name.display().to_string(), count.to_string()])
        .collect();
    Some(render_table(&headers, &rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_padded_and_trailing_space_trimmed() {
        let rendered = render_table(
            &["name".to_string(), "n".to_string()],
            &[vec!["reach".to_string(), "10".to_string()]],
        );
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "name   n");
        assert_eq!(lines[1], "-----  ---");
        assert_eq!(lines[2], "reach  10");
    }

    #[test]
    fn control_characters_do_not_break_rows() {
        let rendered = render_table(&["a".to_string()], &[vec!["x\ny".to_string()]]);
        assert_eq!(rendered.lines().nth(2), Some("x y"));
    }
}
