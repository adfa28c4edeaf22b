use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },

    #[error("TOML serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid range for '{key}': [{lo}, {hi}]")]
    InvalidRange { key: String, lo: f64, hi: f64 },
}

/// How much optional validation the model performs.
///
/// Cheap contract checks (attribute presence, decorator casts, liveness of
/// indices) are always performed. The levels only gate the expensive ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckLevel {
    None,
    /// Verify that score-state inputs still refer to live particles.
    #[default]
    Usage,
    /// Additionally verify that every derivative is finite after evaluation.
    UsageAndInternal,
}

/// An inclusive `[lo, hi]` interval for a float attribute, serialized as a
/// two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct FloatRange {
    /// Lower bound.
    pub lo: f64,
    /// Upper bound.
    pub hi: f64,
}

impl FloatRange {
    pub fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    /// Returns `true` if both bounds are finite and `lo <= hi`.
    pub fn is_valid(&self) -> bool {
        self.lo.is_finite() && self.hi.is_finite() && self.lo <= self.hi
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lo <= value && value <= self.hi
    }

    /// The span `hi - lo`.
    pub fn width(&self) -> f64 {
        self.hi - self.lo
    }
}

impl From<[f64; 2]> for FloatRange {
    fn from([lo, hi]: [f64; 2]) -> Self {
        Self { lo, hi }
    }
}

impl From<FloatRange> for [f64; 2] {
    fn from(range: FloatRange) -> Self {
        [range.lo, range.hi]
    }
}

/// Settings for constructing a [`Model`](super::model::Model).
///
/// Loaded from TOML with kebab-case keys; unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ModelConfig {
    /// Name used in log spans.
    pub name: String,
    /// Optional validation level, `usage` by default.
    #[serde(default)]
    pub check_level: CheckLevel,
    /// Record per-state and per-restraint timings.
    #[serde(default)]
    pub gather_statistics: bool,
    /// Stop summing restraints once the running score exceeds this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_score: Option<f64>,
    /// Explicit ranges keyed by float attribute name.
    #[serde(default)]
    pub ranges: BTreeMap<String, FloatRange>,
}

impl ModelConfig {
    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Toml {
            path: "<string>".to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `Toml` if it does not parse and
    /// `InvalidRange` if a range is empty or not finite.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.ranges.iter().find(|(_, range)| !range.is_valid()) {
            Some((key, range)) => Err(ConfigError::InvalidRange {
                key: key.clone(),
                lo: range.lo,
                hi: range.hi,
            }),
            None => Ok(()),
        }
    }
}

/// Builds a [`ModelConfig`] in code. `name` is the only required field.
#[derive(Default)]
pub struct ModelConfigBuilder {
    name: Option<String>,
    check_level: Option<CheckLevel>,
    gather_statistics: Option<bool>,
    maximum_score: Option<f64>,
    ranges: BTreeMap<String, FloatRange>,
}

impl ModelConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
    pub fn check_level(mut self, level: CheckLevel) -> Self {
        self.check_level = Some(level);
        self
    }
    pub fn gather_statistics(mut self, gather: bool) -> Self {
        self.gather_statistics = Some(gather);
        self
    }
    pub fn maximum_score(mut self, maximum: f64) -> Self {
        self.maximum_score = Some(maximum);
        self
    }
    pub fn range(mut self, key: impl Into<String>, range: FloatRange) -> Self {
        self.ranges.insert(key.into(), range);
        self
    }

    /// Validates and assembles the configuration.
    ///
    /// # Errors
    ///
    /// Returns `MissingParameter` if no name was given and `InvalidRange` for a bad range.
    pub fn build(self) -> Result<ModelConfig, ConfigError> {
        let config = ModelConfig {
            name: self.name.ok_or(ConfigError::MissingParameter("name"))?,
            check_level: self.check_level.unwrap_or_default(),
            gather_statistics: self.gather_statistics.unwrap_or(false),
            maximum_score: self.maximum_score,
            ranges: self.ranges,
        };
        config.validate()?;
        Ok(config)
    }
}
