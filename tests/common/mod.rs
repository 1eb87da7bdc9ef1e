#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};
use wave_loader::{
    config::EngineConfig,
    data::{Cell, Value},
    frame::{Column, Table},
    pipeline::{self, Wave, WaveLimits, WaveOutcome},
    schema::SchemaSet,
    warehouse::{WarehouseSession, sqlite::SqliteSession},
};

pub const CLIENT: &str = "Acme";
pub const PLATFORM: &str = "meta";
pub const YEAR: i32 = 2024;
pub const SCHEMA: &str = "CLIENT_ACME_2024";
pub const CAMPAIGN_TABLE: &str = "CLIENT_ACME_2024.META_PROCESSED_CAMPAIGN_DATA";
pub const NAMING_TABLE: &str = "CLIENT_ACME_2024.META_NAMING_KEYS";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// Builds a text table the way the CSV reader would: every cell is text and
/// empty strings are missing.
pub fn text_table(headers: &[&str], rows: &[&[&str]]) -> Table {
    let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    let records: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect();
    Table::from_records(&headers, &records)
}

pub fn naming_rows(sets: &[&str]) -> Table {
    let columns = sets
        .iter()
        .map(|set| Some(set.to_string()))
        .collect::<Vec<_>>();
    let audiences = sets
        .iter()
        .map(|set| Some(format!("audience for {set}")))
        .collect::<Vec<_>>();
    Table::new(vec![
        Column::text("Ad Set Name", &columns),
        Column::text("Audience", &audiences),
    ])
}

pub fn wave(number: u32) -> Wave {
    Wave::new(CLIENT, PLATFORM, YEAR, number, &WaveLimits::default()).expect("valid wave")
}

/// Runs one wave end to end against `session`.
pub fn run_wave(
    session: &mut dyn WarehouseSession,
    number: u32,
    campaign: &Table,
    naming: &Table,
) -> WaveOutcome {
    let config = EngineConfig::default();
    let schemas = SchemaSet::builtin();
    let prepared = pipeline::prepare(campaign, naming, wave(number), &schemas, &config.inference)
        .expect("inputs pass validation");
    pipeline::load(session, &prepared, &schemas, &config)
}

pub fn warehouse() -> SqliteSession {
    SqliteSession::in_memory().expect("in-memory warehouse")
}

pub fn query(session: &mut dyn WarehouseSession, sql: &str) -> Vec<Vec<Cell>> {
    session.query(sql).expect("query")
}

pub fn text(value: &str) -> Cell {
    Some(Value::String(value.to_string()))
}

pub fn int(value: i64) -> Cell {
    Some(Value::Integer(value))
}

pub fn float(value: f64) -> Cell {
    Some(Value::Float(value))
}
