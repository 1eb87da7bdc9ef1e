//! Expected-schema declarations and the four-way column type.
//!
//! An [`ExpectedSchema`] is the contract a record kind is held to: the ordered
//! set of canonical columns and their declared [`ColumnType`]. One instance per
//! [`RecordKind`] is built at start-up (from the built-in declaration or a YAML
//! override) and handed by reference to the preprocessor, the schema expander
//! and the DDL generator.

use std::{fmt, fs::File, io::BufReader, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

use crate::columns::{ColumnName, normalize_column_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    #[serde(rename = "INT")]
    Int,
    #[serde(rename = "FLOAT")]
    Float,
    #[serde(rename = "STRING")]
    String,
    #[serde(rename = "DATETIME")]
    DateTime,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Int => "INT",
            ColumnType::Float => "FLOAT",
            ColumnType::String => "STRING",
            ColumnType::DateTime => "DATETIME",
        }
    }

    pub fn is_numeric(&self) -> bool {
        match self {
            ColumnType::Int | ColumnType::Float => true,
            ColumnType::String | ColumnType::DateTime => false,
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["INT", "FLOAT", "STRING", "DATETIME"]
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INT" | "INTEGER" => Ok(ColumnType::Int),
            "FLOAT" | "DOUBLE" | "NUMBER" => Ok(ColumnType::Float),
            "STRING" | "TEXT" | "VARCHAR" => Ok(ColumnType::String),
            "DATETIME" | "TIMESTAMP" => Ok(ColumnType::DateTime),
            other => Err(anyhow!(
                "Unknown column type '{other}'. Supported types: {}",
                ColumnType::variants().join(", ")
            )),
        }
    }
}

/// The two related tables every wave submission carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Campaign,
    NamingKey,
}

impl RecordKind {
    /// Natural key of the destination table.
    pub fn key_column(&self) -> &'static str {
        match self {
            RecordKind::Campaign => "ad_name",
            RecordKind::NamingKey => "ad_set_name",
        }
    }

    /// Destination table name without the platform prefix.
    pub fn table_base(&self) -> &'static str {
        match self {
            RecordKind::Campaign => "PROCESSED_CAMPAIGN_DATA",
            RecordKind::NamingKey => "NAMING_KEYS",
        }
    }

    /// Short label used for temporary tables and messages.
    pub fn label(&self) -> &'static str {
        match self {
            RecordKind::Campaign => "CAMPAIGN_DATA",
            RecordKind::NamingKey => "NAMING_KEYS",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RecordKind::Campaign => "campaign data",
            RecordKind::NamingKey => "naming key",
        }
    }

    pub fn builtin_schema(&self) -> ExpectedSchema {
        let columns: &[(&str, ColumnType)] = match self {
            RecordKind::Campaign => CAMPAIGN_COLUMNS,
            RecordKind::NamingKey => NAMING_KEY_COLUMNS,
        };
        ExpectedSchema {
            kind: *self,
            columns: columns
                .iter()
                .map(|(name, datatype)| ExpectedColumn {
                    name: ColumnName::new(*name),
                    datatype: *datatype,
                })
                .collect(),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedColumn {
    pub name: ColumnName,
    pub datatype: ColumnType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedSchema {
    pub kind: RecordKind,
    pub columns: Vec<ExpectedColumn>,
}

impl ExpectedSchema {
    pub fn key_column(&self) -> &'static str {
        self.kind.key_column()
    }

    pub fn datatype_of(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|column| column.name.matches(name))
            .map(|column| column.datatype)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.datatype_of(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.display())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Checks that every declared name is canonical, unique and that the natural
    /// key is declared.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            let canonical = normalize_column_name(column.name.display());
            ensure!(
                canonical == column.name.display(),
                "Column '{}' is not a canonical name (expected '{}')",
                column.name,
                canonical
            );
            ensure!(
                seen.insert(column.name.key().to_string()),
                "Column '{}' is declared more than once",
                column.name
            );
        }
        ensure!(
            self.contains(self.key_column()),
            "{} schema must declare its key column '{}'",
            self.kind,
            self.key_column()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let reader = BufReader::new(file);
        let schema: ExpectedSchema =
            serde_yaml::from_reader(reader).context("Parsing expected schema YAML")?;
        schema
            .validate()
            .with_context(|| format!("Validating schema file {path:?}"))?;
        Ok(schema)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing expected schema YAML")
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing expected schema to YAML")
    }
}

/// Expected schemas for both record kinds of one deployment.
#[derive(Debug, Clone)]
pub struct SchemaSet {
    pub campaign: ExpectedSchema,
    pub naming: ExpectedSchema,
}

impl SchemaSet {
    pub fn builtin() -> Self {
        Self {
            campaign: RecordKind::Campaign.builtin_schema(),
            naming: RecordKind::NamingKey.builtin_schema(),
        }
    }

    pub fn for_kind(&self, kind: RecordKind) -> &ExpectedSchema {
        match kind {
            RecordKind::Campaign => &self.campaign,
            RecordKind::NamingKey => &self.naming,
        }
    }

    /// Loads per-kind overrides, falling back to the built-in declarations.
    pub fn load(campaign: Option<&Path>, naming: Option<&Path>) -> Result<Self> {
        let mut set = Self::builtin();
        if let Some(path) = campaign {
            set.campaign = load_for_kind(path, RecordKind::Campaign)?;
        }
        if let Some(path) = naming {
            set.naming = load_for_kind(path, RecordKind::NamingKey)?;
        }
        Ok(set)
    }
}

fn load_for_kind(path: &Path, kind: RecordKind) -> Result<ExpectedSchema> {
    let schema = ExpectedSchema::load(path)?;
    ensure!(
        schema.kind == kind,
        "Schema file {path:?} declares {} columns but was supplied for {}",
        schema.kind,
        kind
    );
    Ok(schema)
}

use ColumnType::{DateTime as DT, Float as F, Int as I, String as S};

const CAMPAIGN_COLUMNS: &[(&str, ColumnType)] = &[
    // Campaign & ad info
    ("campaign_name", S),
    ("ad_name", S),
    ("ad_set_name", S),
    ("ad_delivery", S),
    ("starts", DT),
    ("ends", DT),
    ("reporting_starts", DT),
    ("reporting_ends", DT),
    ("last_significant_edit", DT),
    ("wave_number", I),
    ("attribution_setting", S),
    // Budget & spend
    ("amount_spent_usd", F),
    ("ad_set_budget", F),
    ("ad_set_budget_type", S),
    ("bid", F),
    ("bid_type", S),
    ("cpm_usd", F),
    // Core performance
    ("results", I),
    ("result_indicator", S),
    ("cost_per_result", F),
    ("frequency", F),
    ("reach", I),
    ("impressions", I),
    ("unique_link_clicks", I),
    ("landing_page_views", I),
    ("email_signups", I),
    // KPIs
    ("kpv_community", I),
    ("kpv_tool", I),
    ("kpv_transformation", I),
    ("kpv_support", I),
    ("kpv_nohero", I),
    ("kpv_inspiration", I),
    ("kpv_authentic", I),
    ("kpv_nextlevel", I),
    ("kpv_nextchapter", I),
    ("kpv_workshop", I),
    ("kpv_openhouse", I),
    // Lead generation
    ("lead_openhouse", I),
    ("lead_workshop", I),
    ("lead_info", I),
    // Click events
    ("click_findout", I),
    ("click_letschat", I),
    ("click_openhouse", I),
    ("click_workshop", I),
    ("click_info", I),
    // E-commerce
    ("adds_to_cart", I),
    ("in_app_adds_to_cart", I),
    ("website_adds_to_cart", I),
    ("offline_adds_to_cart", I),
    ("meta_add_to_cart", I),
    ("checkouts_initiated", I),
    ("in_app_checkouts", I),
    ("website_checkouts", I),
    ("offline_checkouts", I),
    ("meta_checkouts", I),
    ("purchases", I),
    ("in_app_purchases", I),
    ("website_purchases", I),
    ("offline_purchases", I),
    ("meta_purchases", I),
    // Registrations
    ("registrations_completed", I),
    ("in_app_registrations", I),
    ("website_registrations", I),
    ("offline_registrations", I),
    // Social engagement
    ("instagram_profile_visits", I),
    ("post_comments", I),
    ("post_reactions", I),
    ("post_saves", I),
    ("post_shares", I),
    ("post_engagements", I),
    ("video_avg_play_time", F),
];

const NAMING_KEY_COLUMNS: &[(&str, ColumnType)] = &[
    ("ad_set_name", S),
    ("audience", S),
    ("concept", S),
    ("position", S),
    ("ad_descriptor", S),
    ("ad_direction", S),
    ("landing_page", S),
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn builtin_schemas_are_valid_and_keyed() {
        let set = SchemaSet::builtin();
        set.campaign.validate().expect("campaign schema valid");
        set.naming.validate().expect("naming schema valid");
        assert_eq!(set.campaign.len(), 71);
        assert_eq!(set.naming.len(), 7);
        assert_eq!(set.campaign.datatype_of("AMOUNT_SPENT_USD"), Some(ColumnType::Float));
        assert_eq!(set.naming.key_column(), "ad_set_name");
    }

    #[test]
    fn column_type_parses_warehouse_spellings() {
        assert_eq!("integer".parse::<ColumnType>().unwrap(), ColumnType::Int);
        assert_eq!("TIMESTAMP".parse::<ColumnType>().unwrap(), ColumnType::DateTime);
        let err = "geography".parse::<ColumnType>().unwrap_err();
        assert!(err.to_string().contains("Unknown column type"));
    }

    #[test]
    fn schema_yaml_round_trip_preserves_order() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("naming.yml");
        let schema = RecordKind::NamingKey.builtin_schema();
        schema.save(&path).expect("save schema");

        let loaded = ExpectedSchema::load(&path).expect("load schema");
        assert_eq!(loaded, schema);
        let yaml = schema.to_yaml_string().expect("yaml");
        assert!(yaml.contains("datatype: STRING"));
    }

    #[test]
    fn schema_without_key_column_is_rejected() {
        let yaml = r#"
kind: naming_key
columns:
  - name: audience
    datatype: STRING
"#;
        let schema: ExpectedSchema = serde_yaml::from_str(yaml).expect("parse yaml");
        let err = schema.validate().expect_err("missing key");
        assert!(err.to_string().contains("ad_set_name"));
    }

    #[test]
    fn schema_with_non_canonical_name_is_rejected() {
        let yaml = r#"
kind: naming_key
columns:
  - name: ad_set_name
    datatype: STRING
  - name: Landing Page
    datatype: STRING
"#;
        let schema: ExpectedSchema = serde_yaml::from_str(yaml).expect("parse yaml");
        let err = schema.validate().expect_err("non canonical");
        assert!(err.to_string().contains("landing_page"));
    }

    #[test]
    fn schema_set_rejects_mismatched_kind() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("naming.yml");
        RecordKind::NamingKey
            .builtin_schema()
            .save(&path)
            .expect("save schema");
        let err = SchemaSet::load(Some(&path), None).expect_err("kind mismatch");
        assert!(err.to_string().contains("naming key"));
    }
}
