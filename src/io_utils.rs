//! CSV input and output.
//!
//! Wave exports are read whole into a text [`Table`]: every field is decoded
//! with the requested encoding, a leading byte-order mark is stripped from the
//! first header and ragged rows are padded with missing cells. Delimiters are
//! resolved from the file extension unless given explicitly.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use log::debug;

use crate::frame::Table;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

const BYTE_ORDER_MARK: char = '\u{feff}';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Reads every record of `reader` into a text table.
pub fn read_table_from<R: Read>(
    reader: R,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<Table> {
    let mut csv_reader = open_csv_reader(reader, delimiter);
    let mut headers = decode_record(&csv_reader.byte_headers()?.clone(), encoding)
        .context("Decoding header row")?;
    if let Some(first) = headers.first_mut() {
        if let Some(stripped) = first.strip_prefix(BYTE_ORDER_MARK) {
            *first = stripped.to_string();
        }
    }

    let mut records = Vec::new();
    let mut record = csv::ByteRecord::new();
    while csv_reader.read_byte_record(&mut record)? {
        let line = records.len() + 2;
        let decoded =
            decode_record(&record, encoding).with_context(|| format!("Decoding line {line}"))?;
        records.push(decoded);
    }
    debug!(
        "Read {} record(s) with {} column(s)",
        records.len(),
        headers.len()
    );
    Ok(Table::from_records(&headers, &records))
}

pub fn read_table(
    path: &Path,
    delimiter: Option<u8>,
    encoding: &'static Encoding,
) -> Result<Table> {
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    let delimiter = resolve_input_delimiter(path, delimiter);
    read_table_from(BufReader::new(file), delimiter, encoding)
        .with_context(|| format!("Reading {path:?}"))
}

/// Writes `table` as UTF-8 CSV with every field quoted.
pub fn write_table<W: Write>(writer: W, table: &Table, delimiter: u8) -> Result<()> {
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Always)
        .double_quote(true);
    let mut csv_writer = builder.from_writer(writer);
    csv_writer.write_record(table.columns().iter().map(|column| column.name.display()))?;
    for row in table.rows() {
        csv_writer.write_record(
            row.into_iter()
                .map(|cell| cell.map(|value| value.as_display()).unwrap_or_default()),
        )?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_table_to_path(path: &Path, table: &Table, delimiter: u8) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Creating output file {path:?}"))?;
    write_table(BufWriter::new(file), table, delimiter)
        .with_context(|| format!("Writing {path:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use std::path::PathBuf;

    #[test]
    fn delimiter_follows_extension() {
        assert_eq!(resolve_input_delimiter(&PathBuf::from("a.tsv"), None), b'\t');
        assert_eq!(resolve_input_delimiter(&PathBuf::from("a.csv"), None), b',');
        assert_eq!(resolve_input_delimiter(&PathBuf::from("a.tsv"), Some(b';')), b';');
    }

    #[test]
    fn reader_strips_bom_and_pads_short_rows() {
        let input = "\u{feff}Ad Name,Reach\nad-1,10\nad-2\n";
        let table = read_table_from(input.as_bytes(), b',', UTF_8).expect("read");
        assert_eq!(table.columns()[0].name.display(), "Ad Name");
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.cell("reach", 1), None);
    }

    #[test]
    fn reader_decodes_legacy_encodings() {
        let encoding = resolve_encoding(Some("windows-1252")).expect("encoding");
        let bytes = b"ad_name\ncaf\xe9\n";
        let table = read_table_from(&bytes[..], b',', encoding).expect("read");
        assert_eq!(table.cell("ad_name", 0), Some(Value::String("café".into())));
        assert!(resolve_encoding(Some("klingon")).is_err());
    }

    #[test]
    fn writer_renders_missing_cells_empty() {
        let table = read_table_from("a,b\n1,\n".as_bytes(), b',', UTF_8).expect("read");
        let mut buffer = Vec::new();
        write_table(&mut buffer, &table, b',').expect("write");
        assert_eq!(String::from_utf8(buffer).expect("utf8"), "\"a\",\"b\"\n\"1\",\"\"\n");
    }
}
