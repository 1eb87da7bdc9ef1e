//! Engine configuration loaded from YAML.
//!
//! Every field is optional; a missing file section falls back to the default
//! and CLI flags are applied on top by the caller.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    ddl::UPLOAD_TIMESTAMP_COLUMN, infer::InferencePolicy, pipeline::WaveLimits,
    schema::SchemaSet, warehouse::sqlite::IN_MEMORY,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Directory holding one database per schema, or `:memory:`.
    pub path: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: IN_MEMORY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub inference: InferencePolicy,
    pub warehouse: WarehouseConfig,
    pub limits: WaveLimits,
    pub campaign_schema: Option<PathBuf>,
    pub naming_schema: Option<PathBuf>,
    /// Columns never added by schema expansion.
    pub excluded_columns: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inference: InferencePolicy::default(),
            warehouse: WarehouseConfig::default(),
            limits: WaveLimits::default(),
            campaign_schema: None,
            naming_schema: None,
            excluded_columns: vec![UPLOAD_TIMESTAMP_COLUMN.to_string()],
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let config: EngineConfig = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config file {path:?}"))?;
        config
            .validate()
            .with_context(|| format!("Validating config file {path:?}"))?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.inference.validate()
    }

    /// Expected schemas with any configured overrides applied.
    pub fn schemas(&self) -> Result<SchemaSet> {
        SchemaSet::load(self.campaign_schema.as_deref(), self.naming_schema.as_deref())
    }
}
