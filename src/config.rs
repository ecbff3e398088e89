//! Engine configuration.
//!
//! Precedence: call site > env > config file > defaults. Call-site values never
//! touch this struct; they live on the per-query state and win at normalization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::DbError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configured locales; the first one is the query default.
    pub locales: Vec<String>,
    pub collection_name: String,
    pub limit: u64,
    pub skip: u64,
    /// Default exclusions, payload-relative; every value must be `0`.
    pub projections: BTreeMap<String, i32>,
    pub default_sort_field: String,
    /// Expand every reference field when a query names no include paths.
    pub include_references: bool,
    pub reference_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            locales: vec!["en-us".to_string()],
            collection_name: "contents".to_string(),
            limit: 100,
            skip: 0,
            projections: BTreeMap::new(),
            default_sort_field: "updated_at".to_string(),
            include_references: false,
            reference_depth: 4,
        }
    }
}

impl Config {
    /// Parse a (possibly partial) TOML document; absent keys keep their defaults.
    ///
    /// # Errors
    /// Returns an error if the TOML is malformed.
    pub fn from_toml_str(s: &str) -> Result<Self, DbError> {
        Ok(toml::from_str::<Self>(s)?)
    }

    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, DbError> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    /// Overlay `CONTENTLITE_*` environment variables.
    #[must_use]
    pub fn apply_env(self) -> Self {
        self.apply_vars(|k| std::env::var(k).ok())
    }

    pub(crate) fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(s) = var("CONTENTLITE_LOCALES") {
            let locales: Vec<String> = s
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(ToString::to_string)
                .collect();
            if !locales.is_empty() {
                self.locales = locales;
            }
        }
        if let Some(s) = var("CONTENTLITE_COLLECTION") {
            self.collection_name = s;
        }
        if let Some(n) = var("CONTENTLITE_LIMIT").and_then(|s| s.parse().ok()) {
            self.limit = n;
        }
        if let Some(n) = var("CONTENTLITE_SKIP").and_then(|s| s.parse().ok()) {
            self.skip = n;
        }
        if let Some(n) = var("CONTENTLITE_REFERENCE_DEPTH").and_then(|s| s.parse().ok()) {
            self.reference_depth = n;
        }
        self
    }

    /// # Errors
    /// Returns `DbError::Config` when a setting cannot be honoured.
    pub fn validate(&self) -> Result<(), DbError> {
        if self.locales.is_empty() || self.locales.iter().any(String::is_empty) {
            return Err(DbError::Config("at least one non-empty locale is required".into()));
        }
        if self.limit == 0 {
            return Err(DbError::Config("limit must be positive".into()));
        }
        if self.collection_name.is_empty() {
            return Err(DbError::Config("collection_name must not be empty".into()));
        }
        if let Some((k, v)) = self.projections.iter().find(|(_, v)| **v != 0) {
            return Err(DbError::Config(format!("default projection '{k}' must be an exclusion (0), got {v}")));
        }
        Ok(())
    }

    /// The locale applied when a query does not pick one.
    #[must_use]
    pub fn default_locale(&self) -> &str {
        self.locales.first().map_or("en-us", String::as_str)
    }
}
