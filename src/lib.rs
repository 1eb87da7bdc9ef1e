pub mod audit;
pub mod cli;
pub mod columns;
pub mod config;
pub mod data;
pub mod ddl;
pub mod error;
pub mod expand;
pub mod frame;
pub mod infer;
pub mod io_utils;
pub mod merge;
pub mod pipeline;
pub mod preprocess;
pub mod quality;
pub mod schema;
pub mod scrub;
pub mod table;
pub mod validate;
pub mod warehouse;

use std::{env, io::Write, sync::OnceLock, time::Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, info, warn};

use crate::{
    cli::{Cli, Commands},
    config::EngineConfig,
    pipeline::{Wave, WaveOutcome},
    warehouse::sqlite::SqliteSession,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("wave_loader", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Load(args) => handle_load(&args),
        Commands::Probe(args) => handle_probe(&args),
        Commands::Ddl(args) => handle_ddl(&args),
        Commands::Schema(args) => handle_schema(&args),
    }
}

fn handle_load(args: &cli::LoadArgs) -> Result<()> {
    let mut config = EngineConfig::load_or_default(args.config.as_deref())?;
    if let Some(path) = &args.warehouse {
        config.warehouse.path = path.clone();
    }
    let schemas = config.schemas()?;
    let wave = Wave::new(
        &args.client,
        &args.platform,
        args.year,
        args.wave,
        &config.limits,
    )?;
    let encoding = io_utils::resolve_encoding(args.input.input_encoding.as_deref())?;
    info!(
        "Loading wave {} from '{}' and '{}' with delimiter '{}'",
        wave.number,
        args.campaign.display(),
        args.naming.display(),
        printable_delimiter(io_utils::resolve_input_delimiter(
            &args.campaign,
            args.input.delimiter
        ))
    );
    let started = Instant::now();
    let campaign = io_utils::read_table(&args.campaign, args.input.delimiter, encoding)?;
    let naming = io_utils::read_table(&args.naming, args.input.delimiter, encoding)?;

    let outcome = match pipeline::prepare(&campaign, &naming, wave, &schemas, &config.inference) {
        Err(rejection) => rejection.into_outcome(started),
        Ok(prepared) => match SqliteSession::connect(&config.warehouse.path) {
            Ok(mut session) => pipeline::load(&mut session, &prepared, &schemas, &config),
            Err(err) => WaveOutcome {
                success: false,
                schema: None,
                steps: Vec::new(),
                warnings: prepared.warnings.clone(),
                errors: vec![format!("Failed to establish warehouse connection: {err}")],
                rows_processed: 0,
                duration: started.elapsed(),
            },
        },
    };

    let mut stdout = std::io::stdout().lock();
    if args.json {
        writeln!(stdout, "{}", outcome.to_json()?)?;
    } else {
        write!(stdout, "{}", render_outcome(&outcome))?;
    }
    stdout.flush()?;

    if !outcome.success {
        bail!(
            "Wave {} was not loaded: {}",
            args.wave,
            outcome.errors.join("; ")
        );
    }
    Ok(())
}

fn render_outcome(outcome: &WaveOutcome) -> String {
    let mut text = String::new();
    if let Some(schema) = &outcome.schema {
        text.push_str(&format!("Schema: {schema}\n"));
    }
    for step in &outcome.steps {
        text.push_str(&format!("  ok   {step}\n"));
    }
    for warning in &outcome.warnings {
        text.push_str(&format!("  warn {warning}\n"));
    }
    for error in &outcome.errors {
        text.push_str(&format!("  fail {error}\n"));
    }
    text.push_str(&format!(
        "{} - {} row(s) written in {:.2}s\n",
        if outcome.success { "SUCCESS" } else { "FAILED" },
        outcome.rows_processed,
        outcome.duration.as_secs_f64()
    ));
    text
}

fn handle_probe(args: &cli::ProbeArgs) -> Result<()> {
    let config = EngineConfig::load_or_default(args.config.as_deref())?;
    let schemas = config.schemas()?;
    let schema = schemas.for_kind(args.kind);
    let encoding = io_utils::resolve_encoding(args.input_format.input_encoding.as_deref())?;
    info!(
        "Probing '{}' as {} data",
        args.input.display(),
        args.kind
    );
    let raw = io_utils::read_table(&args.input, args.input_format.delimiter, encoding)?;

    let report = validate::validate_input(&raw, schema);
    for warning in &report.warnings {
        warn!("{warning}");
    }
    let processed = preprocess::preprocess(&raw, schema, args.wave, &config.inference);
    let quality = quality::QualityReport::from_table(&processed.table);

    let mut out = String::new();
    out.push_str(&table::render_columns(&processed));
    out.push('\n');
    out.push_str(&table::render_quality(&format!("Processed {}", args.kind), &quality));
    if let Some(scrubbed) = table::render_scrub(&processed.scrubbed) {
        out.push_str("\nClock values cleared from numeric columns:\n");
        out.push_str(&scrubbed);
    }
    for error in &report.errors {
        out.push_str(&format!("Validation error: {error}\n"));
    }
    print!("{out}");

    if let Some(path) = &args.output {
        io_utils::write_table_to_path(path, &processed.table, io_utils::DEFAULT_CSV_DELIMITER)?;
        info!("Processed rows written to {path:?}");
    }
    if !report.is_valid() {
        bail!("{} failed validation", args.input.display());
    }
    Ok(())
}

fn handle_ddl(args: &cli::DdlArgs) -> Result<()> {
    let config = EngineConfig::load_or_default(args.config.as_deref())?;
    let schemas = config.schemas()?;
    let schema = warehouse::schema_name(&args.client, args.year);
    let script = ddl::render_script(args.dialect, &schema, args.platform.trim(), &schemas);
    print!("{script}");
    Ok(())
}

fn handle_schema(args: &cli::SchemaArgs) -> Result<()> {
    let schema = args.kind.builtin_schema();
    match &args.output {
        Some(path) => {
            schema
                .save(path)
                .with_context(|| format!("Writing {} schema to {path:?}", args.kind))?;
            info!(
                "Expected {} schema with {} column(s) written to {path:?}",
                args.kind,
                schema.len()
            );
        }
        None => print!("{}", schema.to_yaml_string()?),
    }
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
