use std::{fmt, time::Duration};

use log::{error, info};
use serde::Serialize;

use crate::{
    error::EngineResult,
    warehouse::{PROCESSING_LOG_TABLE, TableRef, WarehouseSession, quote_literal},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the per-schema processing log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingLogEntry {
    pub wave_number: u32,
    pub status: RunStatus,
    pub records_processed: usize,
    pub errors_count: usize,
    pub warnings_count: usize,
    pub processing_time: Duration,
    pub client_name: String,
    pub platform: String,
    pub year: i32,
}

impl ProcessingLogEntry {
    pub fn insert_sql(&self, table: &TableRef, current_timestamp: &str) -> String {
        format!(
            "INSERT INTO {table} (wave_number, processing_timestamp, status, records_processed, errors_count, warnings_count, processing_time_seconds, client_name, platform, year) \
             VALUES ({}, {current_timestamp}, {}, {}, {}, {}, {:.3}, {}, {}, {})",
            self.wave_number,
            quote_literal(self.status.as_str()),
            self.records_processed,
            self.errors_count,
            self.warnings_count,
            self.processing_time.as_secs_f64(),
            quote_literal(&self.client_name),
            quote_literal(&self.platform),
            self.year
        )
    }
}

pub fn insert_processing_log(
    session: &mut dyn WarehouseSession,
    schema: &str,
    entry: &ProcessingLogEntry,
) -> EngineResult<String> {
    let table = TableRef::new(schema, PROCESSING_LOG_TABLE);
    let sql = entry.insert_sql(&table, session.dialect().current_timestamp());
    info!(
        "Inserting processing log for wave {}, platform {}",
        entry.wave_number, entry.platform
    );
    session.execute(&sql).inspect_err(|err| {
        error!("Failed to insert processing log: {err}");
    })?;
    info!(
        "Successfully inserted processing log for wave {}, platform {}",
        entry.wave_number, entry.platform
    );
    Ok("Processing log inserted successfully".to_string())
}
