//! Wave orchestration.
//!
//! [`prepare`] validates and preprocesses both inputs without touching the
//! warehouse. [`load`] then creates the destination objects, upserts the
//! naming keys and campaign rows, refreshes the view and writes one
//! processing-log row. A failed table write marks the wave failed but the
//! sibling table is still attempted.

use std::time::{Duration, Instant};

use anyhow::{Result, ensure};
use chrono::Local;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    audit::{ProcessingLogEntry, RunStatus, insert_processing_log},
    config::EngineConfig,
    ddl::{UPLOAD_TIMESTAMP_COLUMN, create_schema_and_tables, create_view},
    error::EngineResult,
    expand::expand,
    frame::{Column, ColumnData, Table},
    infer::InferencePolicy,
    merge::{UpsertReport, upsert},
    preprocess::{ProcessedTable, preprocess},
    quality::QualityReport,
    schema::{RecordKind, SchemaSet},
    validate::validate_input,
    warehouse::{TableRef, WarehouseSession, schema_name, table_name, temp_table_name},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveLimits {
    pub min_wave: u32,
    pub max_wave: u32,
    pub min_year: i32,
    pub max_year: i32,
}

impl Default for WaveLimits {
    fn default() -> Self {
        Self {
            min_wave: 1,
            max_wave: 10,
            min_year: 2000,
            max_year: 2090,
        }
    }
}

/// One submission: which client, platform and year it belongs to and its
/// wave number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wave {
    pub client: String,
    pub platform: String,
    pub year: i32,
    pub number: u32,
}

impl Wave {
    pub fn new(
        client: &str,
        platform: &str,
        year: i32,
        number: u32,
        limits: &WaveLimits,
    ) -> Result<Self> {
        let client = client.trim();
        let platform = platform.trim();
        ensure!(!client.is_empty(), "Client name must not be empty");
        ensure!(
            platform.starts_with(|c: char| c.is_ascii_alphabetic()),
            "Platform must start with a letter, got '{platform}'"
        );
        ensure!(
            (limits.min_wave..=limits.max_wave).contains(&number),
            "Wave number must be between {} and {}, got {number}",
            limits.min_wave,
            limits.max_wave
        );
        ensure!(
            (limits.min_year..=limits.max_year).contains(&year),
            "Year must be between {} and {}, got {year}",
            limits.min_year,
            limits.max_year
        );
        Ok(Self {
            client: client.to_string(),
            platform: platform.to_string(),
            year,
            number,
        })
    }

    pub fn schema(&self) -> String {
        schema_name(&self.client, self.year)
    }

    pub fn table(&self, kind: RecordKind) -> TableRef {
        TableRef::new(self.schema(), table_name(&self.platform, kind))
    }
}

/// Validation stopped the wave before anything was written.
#[derive(Debug, Clone, Error)]
#[error("Validation failed: {}", .errors.join("; "))]
pub struct Rejection {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Rejection {
    pub fn into_outcome(self, started: Instant) -> WaveOutcome {
        WaveOutcome {
            success: false,
            schema: None,
            steps: Vec::new(),
            warnings: self.warnings,
            errors: self.errors,
            rows_processed: 0,
            duration: started.elapsed(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreparedWave {
    pub wave: Wave,
    pub campaign: ProcessedTable,
    pub naming: ProcessedTable,
    pub campaign_quality: QualityReport,
    pub naming_quality: QualityReport,
    pub warnings: Vec<String>,
    pub started: Instant,
}

impl PreparedWave {
    pub fn rows(&self) -> usize {
        self.campaign.row_count() + self.naming.row_count()
    }

    pub fn processed(&self, kind: RecordKind) -> &ProcessedTable {
        match kind {
            RecordKind::Campaign => &self.campaign,
            RecordKind::NamingKey => &self.naming,
        }
    }
}

/// Validates and preprocesses both inputs of a wave.
pub fn prepare(
    campaign_raw: &Table,
    naming_raw: &Table,
    wave: Wave,
    schemas: &SchemaSet,
    policy: &InferencePolicy,
) -> Result<PreparedWave, Rejection> {
    let started = Instant::now();
    info!(
        "Preparing wave {} for {} / {} / {}",
        wave.number, wave.client, wave.platform, wave.year
    );

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    for (raw, kind) in [
        (campaign_raw, RecordKind::Campaign),
        (naming_raw, RecordKind::NamingKey),
    ] {
        let report = validate_input(raw, schemas.for_kind(kind));
        for warning in &report.warnings {
            warn!("{warning}");
        }
        errors.extend(report.errors);
        warnings.extend(report.warnings);
    }
    if !errors.is_empty() {
        for message in &errors {
            error!("{message}");
        }
        return Err(Rejection { errors, warnings });
    }

    let campaign = preprocess(campaign_raw, &schemas.campaign, wave.number, policy);
    let naming = preprocess(naming_raw, &schemas.naming, wave.number, policy);
    for processed in [&campaign, &naming] {
        for label in &processed.dropped_labels {
            warnings.push(format!(
                "Column '{label}' in {} data was dropped: label has no usable characters",
                processed.kind
            ));
        }
    }

    let campaign_quality = QualityReport::from_table(&campaign.table);
    let naming_quality = QualityReport::from_table(&naming.table);
    info!(
        "Campaign data: {} rows, {} columns; naming keys: {} rows, {} columns",
        campaign_quality.total_rows,
        campaign_quality.total_columns,
        naming_quality.total_rows,
        naming_quality.total_columns
    );

    Ok(PreparedWave {
        wave,
        campaign,
        naming,
        campaign_quality,
        naming_quality,
        warnings,
        started,
    })
}

/// Final status of one wave, in step order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveOutcome {
    pub success: bool,
    pub schema: Option<String>,
    pub steps: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub rows_processed: usize,
    #[serde(rename = "duration_seconds", serialize_with = "serialize_seconds")]
    pub duration: Duration,
}

fn serialize_seconds<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl WaveOutcome {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Writes a prepared wave into the warehouse.
///
/// Concurrent loads of the same wave stage through separate tables, but
/// their merges into the destination are not serialized: for a key written
/// by both, the merge that commits last wins.
pub fn load(
    session: &mut dyn WarehouseSession,
    prepared: &PreparedWave,
    schemas: &SchemaSet,
    config: &EngineConfig,
) -> WaveOutcome {
    let wave = &prepared.wave;
    let schema = wave.schema();
    let mut outcome = WaveOutcome {
        success: true,
        schema: Some(schema.clone()),
        steps: Vec::new(),
        warnings: prepared.warnings.clone(),
        errors: Vec::new(),
        rows_processed: 0,
        duration: Duration::ZERO,
    };

    match create_schema_and_tables(session, &schema, &wave.platform, schemas) {
        Ok(message) => outcome.steps.push(message),
        Err(err) => {
            outcome.success = false;
            outcome.errors.push(format!("Error: {err}"));
            outcome.duration = prepared.started.elapsed();
            return outcome;
        }
    }

    for kind in [RecordKind::NamingKey, RecordKind::Campaign] {
        match write_kind(session, prepared, kind, config, &mut outcome.warnings) {
            Ok(report) => {
                outcome.rows_processed += report.rows;
                outcome.steps.push(report.message);
                outcome.warnings.extend(report.warning);
            }
            Err(err) => {
                error!("Failed to populate {kind} table: {err}");
                outcome.success = false;
                outcome.errors.push(format!("Error: {err}"));
            }
        }
    }

    match create_view(session, &schema, &wave.platform, &schemas.naming) {
        Ok(message) => outcome.steps.push(message),
        Err(err) => outcome.errors.push(format!("Error creating view: {err}")),
    }

    let status = if outcome.success {
        RunStatus::Success
    } else {
        RunStatus::Failed
    };
    let entry = ProcessingLogEntry {
        wave_number: wave.number,
        status,
        records_processed: prepared.rows(),
        errors_count: outcome.errors.len(),
        warnings_count: outcome.warnings.len(),
        processing_time: prepared.started.elapsed(),
        client_name: wave.client.clone(),
        platform: wave.platform.clone(),
        year: wave.year,
    };
    match insert_processing_log(session, &schema, &entry) {
        Ok(message) => outcome.steps.push(message),
        Err(err) => outcome
            .warnings
            .push(format!("Processing log was not written: {err}")),
    }

    outcome.duration = prepared.started.elapsed();
    info!(
        "Wave {} finished with status {status} in {:.2}s",
        wave.number,
        outcome.duration.as_secs_f64()
    );
    outcome
}

fn write_kind(
    session: &mut dyn WarehouseSession,
    prepared: &PreparedWave,
    kind: RecordKind,
    config: &EngineConfig,
    warnings: &mut Vec<String>,
) -> EngineResult<UpsertReport> {
    let wave = &prepared.wave;
    let target = wave.table(kind);
    let data = stamp_upload_time(&prepared.processed(kind).table);

    info!("Checking schema for new columns in {target}");
    let expansion = expand(
        session,
        &target,
        &data,
        &config.excluded_columns,
        &config.inference,
    )?;
    if expansion.columns_added() > 0 {
        info!("Schema expanded: {}", expansion.message);
    }
    if !expansion.failed.is_empty() {
        let warning = format!(
            "Could not add {} column(s) to {target}: {}. Added {} of {} new column(s).",
            expansion.failed.len(),
            expansion.failed.join(", "),
            expansion.columns_added(),
            expansion.columns_added() + expansion.failed.len()
        );
        warn!("{warning}");
        warnings.push(warning);
    }

    let staging = temp_table_name(&wave.platform, kind, wave.number);
    upsert(session, &target, kind, &data, &staging)
}

fn stamp_upload_time(table: &Table) -> Table {
    let mut stamped = table.clone();
    let now = Local::now().naive_local();
    stamped.set_column(Column::new(
        UPLOAD_TIMESTAMP_COLUMN,
        ColumnData::DateTime(vec![Some(now); table.row_count()]),
    ));
    stamped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wave_limits_follow_defaults() {
        let limits = WaveLimits::default();
        let wave = Wave::new(" Acme ", "meta", 2024, 3, &limits).expect("valid wave");
        assert_eq!(wave.client, "Acme");
        assert_eq!(wave.schema(), "CLIENT_ACME_2024");
        assert_eq!(
            wave.table(RecordKind::Campaign).to_string(),
            "CLIENT_ACME_2024.META_PROCESSED_CAMPAIGN_DATA"
        );

        let err = Wave::new("Acme", "meta", 2024, 11, &limits).expect_err("wave too high");
        assert!(err.to_string().contains("between 1 and 10"));
        assert!(Wave::new("Acme", "meta", 1999, 1, &limits).is_err());
        assert!(Wave::new("Acme", "", 2024, 1, &limits).is_err());
        assert!(Wave::new("Acme", "9gag", 2024, 1, &limits).is_err());
        assert!(Wave::new("  ", "meta", 2024, 1, &limits).is_err());
    }

    #[test]
    fn empty_campaign_input_is_rejected() {
        let wave = Wave::new("Acme", "meta", 2024, 1, &WaveLimits::default()).expect("wave");
        let naming = Table::new(vec![Column::text("Ad Set Name", &[Some("s1")])]);
        let rejection = prepare(
            &Table::default(),
            &naming,
            wave,
            &SchemaSet::builtin(),
            &InferencePolicy::default(),
        )
        .expect_err("empty campaign file");
        assert_eq!(rejection.errors, vec!["Campaign data file is empty".to_string()]);
        let outcome = rejection.into_outcome(Instant::now());
        assert!(!outcome.success);
        assert_eq!(outcome.rows_processed, 0);
    }

    #[test]
    fn outcome_serializes_duration_in_seconds() {
        let outcome = WaveOutcome {
            success: true,
            schema: Some("CLIENT_ACME_2024".into()),
            steps: vec!["done".into()],
            warnings: Vec::new(),
            errors: Vec::new(),
            rows_processed: 4,
            duration: Duration::from_millis(2500),
        };
        let json: serde_json::Value =
            serde_json::from_str(&outcome.to_json().expect("json")).expect("parse");
        assert_eq!(json["duration_seconds"], 2.5);
        assert_eq!(json["rows_processed"], 4);
        assert_eq!(json["steps"][0], "done");
    }
}
