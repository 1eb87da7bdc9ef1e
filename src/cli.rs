use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{schema::RecordKind, warehouse::Dialect};

#[derive(Debug, Parser)]
#[command(author, version, about = "Load wave-based campaign exports into an evolving warehouse schema", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Validate, preprocess and upsert one wave of campaign and naming-key data
    Load(LoadArgs),
    /// Preprocess a single export and report resolved column types without writing
    Probe(ProbeArgs),
    /// Print the fixed table and view definitions for a client, platform and year
    Ddl(DdlArgs),
    /// Write the built-in expected schema of a record kind to YAML
    Schema(SchemaArgs),
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Campaign data export
    #[arg(short = 'c', long = "campaign")]
    pub campaign: PathBuf,
    /// Naming-key export
    #[arg(short = 'n', long = "naming")]
    pub naming: PathBuf,
    /// Wave number of this submission
    #[arg(short = 'w', long)]
    pub wave: u32,
    /// Client the wave belongs to
    #[arg(long)]
    pub client: String,
    /// Advertising platform (meta, linkedin, ...)
    #[arg(long)]
    pub platform: String,
    /// Project year
    #[arg(long)]
    pub year: i32,
    /// Warehouse root directory, or ':memory:' (overrides the config file)
    #[arg(long)]
    pub warehouse: Option<String>,
    /// Engine configuration YAML
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Print the outcome as JSON instead of text
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    pub input: InputArgs,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Export to inspect
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Which record kind the export contains
    #[arg(short, long, value_enum)]
    pub kind: RecordKind,
    /// Wave number to stamp on the processed rows
    #[arg(short = 'w', long, default_value_t = 1)]
    pub wave: u32,
    /// Engine configuration YAML
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Also write the processed rows to this CSV file
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    #[command(flatten)]
    pub input_format: InputArgs,
}

#[derive(Debug, Args)]
pub struct DdlArgs {
    #[arg(long)]
    pub client: String,
    #[arg(long)]
    pub platform: String,
    #[arg(long)]
    pub year: i32,
    /// SQL dialect to render
    #[arg(long, value_enum, default_value_t = Dialect::Snowflake)]
    pub dialect: Dialect,
    /// Engine configuration YAML (for expected-schema overrides)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct SchemaArgs {
    /// Record kind whose declaration is written
    #[arg(short, long, value_enum)]
    pub kind: RecordKind,
    /// Destination YAML file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
