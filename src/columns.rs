//! Column identity and label normalization.
//!
//! Column labels arrive from spreadsheet exports in every shape imaginable
//! (`"Amount spent (USD)"`, `" Ad Set Name!! "`). [`normalize_column_name`]
//! folds them into a stable identifier, and [`ColumnName`] keeps the display
//! form a writer used next to the lowercase key every comparison goes through.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Canonicalizes a column label.
///
/// Surrounding whitespace is stripped, every character that is not an ASCII
/// letter, digit, space or underscore is removed, spaces become underscores,
/// the result is lowercased, runs of underscores collapse and edge
/// underscores are trimmed. Underscores are kept as word separators, so an
/// already canonical `ad_name` maps to itself rather than to `adname`; this
/// is what makes the function idempotent. The function is pure.
pub fn normalize_column_name(label: &str) -> String {
    let mut normalized = String::with_capacity(label.len());
    let mut previous_underscore = false;
    for ch in label.trim().chars() {
        let mapped = match ch {
            'a'..='z' | '0'..='9' => ch,
            'A'..='Z' => ch.to_ascii_lowercase(),
            ' ' | '_' => '_',
            _ => continue,
        };
        if mapped == '_' {
            if previous_underscore {
                continue;
            }
            previous_underscore = true;
        } else {
            previous_underscore = false;
        }
        normalized.push(mapped);
    }
    normalized.trim_matches('_').to_string()
}

/// Same as [`normalize_column_name`] for labels that may be absent.
pub fn normalize_optional_column_name(label: Option<&str>) -> String {
    label.map(normalize_column_name).unwrap_or_default()
}

/// A column identifier with a case-insensitive identity.
///
/// `display` is the spelling a writer produced (and the spelling that is quoted
/// when talking to a case-preserving warehouse); `key` is the lowercase form
/// used for equality, ordering and hashing.
#[derive(Debug, Clone)]
pub struct ColumnName {
    display: String,
    key: String,
}

impl ColumnName {
    pub fn new(display: impl Into<String>) -> Self {
        let display = display.into();
        let key = display.to_lowercase();
        Self { display, key }
    }

    /// Builds a column name from a raw label by normalizing it first.
    pub fn normalized(label: &str) -> Self {
        Self::new(normalize_column_name(label))
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn matches(&self, other: &str) -> bool {
        self.key == other.to_lowercase()
    }
}

impl PartialEq for ColumnName {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ColumnName {}

impl Hash for ColumnName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl Ord for ColumnName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for ColumnName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ColumnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl From<&str> for ColumnName {
    fn from(value: &str) -> Self {
        ColumnName::new(value)
    }
}

impl From<String> for ColumnName {
    fn from(value: String) -> Self {
        ColumnName::new(value)
    }
}

impl Serialize for ColumnName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.display)
    }
}

impl<'de> Deserialize<'de> for ColumnName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(ColumnName::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn normalize_strips_symbols_and_joins_words() {
        assert_eq!(normalize_column_name("Ad Set Name!!"), "ad_set_name");
        assert_eq!(normalize_column_name("Amount spent (USD)"), "amount_spent_usd");
        assert_eq!(normalize_column_name("  CPM (cost per 1,000)  "), "cpm_cost_per_1000");
        assert_eq!(normalize_column_name("KPV - Community"), "kpv_community");
        assert_eq!(normalize_column_name("__already__snake__"), "already_snake");
        assert_eq!(normalize_column_name("ad_name"), "ad_name");
        assert_eq!(normalize_column_name("Ad _ Name"), "ad_name");
    }

    #[test]
    fn normalize_handles_degenerate_labels() {
        assert_eq!(normalize_column_name(""), "");
        assert_eq!(normalize_column_name("!!!"), "");
        assert_eq!(normalize_optional_column_name(None), "");
        assert_eq!(normalize_column_name("Café"), "caf");
    }

    #[test]
    fn column_name_identity_ignores_case() {
        let upper = ColumnName::new("AD_NAME");
        let lower = ColumnName::new("ad_name");
        assert_eq!(upper, lower);
        assert_eq!(upper.display(), "AD_NAME");
        assert_eq!(upper.key(), "ad_name");

        let mut set = HashSet::new();
        set.insert(upper);
        assert!(set.contains(&lower));
        assert!(lower.matches("Ad_Name"));
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(label in "\\PC{0,40}") {
            let once = normalize_column_name(&label);
            prop_assert_eq!(normalize_column_name(&once), once.clone());
        }

        #[test]
        fn normalized_names_use_identifier_alphabet(label in "[ -~]{0,40}") {
            let normalized = normalize_column_name(&label);
            prop_assert!(normalized
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
            prop_assert!(!normalized.starts_with('_') && !normalized.ends_with('_'));
            prop_assert!(!normalized.contains("__"));
        }
    }
}
