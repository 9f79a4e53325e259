use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::export::CsvOptions;
use crate::extract::{DEFAULT_MARKER, Extractor};
use crate::listing::DEFAULT_SPECIAL_PAGE;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct KeyValueConfig {
    #[serde(default)]
    pub keyvalue: KeyValueSection,
    #[serde(default)]
    pub csv: CsvSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct KeyValueSection {
    pub marker: Option<String>,
    pub special_page: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CsvSection {
    pub delimiter: Option<String>,
    pub quote: Option<String>,
}

impl KeyValueConfig {
    /// Resolve the directive marker: env KEYVALUE_MARKER > config > DEFAULT_MARKER.
    pub fn marker(&self) -> String {
        self.marker_with_lookup(|key| env::var(key).ok())
    }

    /// Resolve the listing page title: env KEYVALUE_SPECIAL_PAGE > config > DEFAULT_SPECIAL_PAGE.
    pub fn special_page(&self) -> String {
        self.special_page_with_lookup(|key| env::var(key).ok())
    }

    /// Resolve CSV options: env KEYVALUE_CSV_DELIMITER / KEYVALUE_CSV_QUOTE > config > defaults.
    pub fn csv_options(&self) -> Result<CsvOptions> {
        self.csv_options_with_lookup(|key| env::var(key).ok())
    }

    pub fn extractor(&self) -> Extractor {
        Extractor::new(self.marker())
    }

    fn marker_with_lookup<F>(&self, lookup_env: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        resolve_text(
            lookup_env("KEYVALUE_MARKER"),
            self.keyvalue.marker.as_deref(),
        )
        .unwrap_or_else(|| DEFAULT_MARKER.to_string())
    }

    fn special_page_with_lookup<F>(&self, lookup_env: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        resolve_text(
            lookup_env("KEYVALUE_SPECIAL_PAGE"),
            self.keyvalue.special_page.as_deref(),
        )
        .unwrap_or_else(|| DEFAULT_SPECIAL_PAGE.to_string())
    }

    fn csv_options_with_lookup<F>(&self, lookup_env: F) -> Result<CsvOptions>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Delimiters may legitimately be whitespace, so env values are not trimmed.
        let delimiter = lookup_env("KEYVALUE_CSV_DELIMITER")
            .filter(|value| !value.is_empty())
            .or_else(|| self.csv.delimiter.clone());
        let quote = lookup_env("KEYVALUE_CSV_QUOTE")
            .filter(|value| !value.is_empty())
            .or_else(|| self.csv.quote.clone());
        CsvOptions::parse(delimiter.as_deref(), quote.as_deref())
            .context("invalid [csv] configuration")
    }
}

fn resolve_text(from_env: Option<String>, from_config: Option<&str>) -> Option<String> {
    if let Some(value) = from_env {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    from_config
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Load and parse a KeyValueConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<KeyValueConfig> {
    if !config_path.exists() {
        return Ok(KeyValueConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: KeyValueConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}
