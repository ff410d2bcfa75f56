//! Engine configuration.
//!
//! Loaded from an optional `scoreguard.toml`, then overridden by
//! `SCOREGUARD_*` environment variables. Every field has a default, so an
//! empty file (or no file) is a valid configuration.
//!
//! ```toml
//! [flagging]
//! high_variance_sd = 15.0
//! outlier_sigma = 2.0
//! min_reliability = 0.7
//!
//! [tracking]
//! default_confidence_threshold = 0.8
//! background = true
//!
//! [store]
//! max_conflict_retries = 32
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::error::{Result, ScoringError};
use crate::flagging::FlagThresholds;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "scoreguard.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Confidence threshold applied to secondary submissions when updating
    /// the evaluator's profile.
    pub default_confidence_threshold: f64,
    /// Run profile updates as a spawned task instead of inline.
    pub background: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            default_confidence_threshold: 0.8,
            background: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Re-read-and-retry attempts on a record version conflict.
    pub max_conflict_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 32,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub flagging: FlagThresholds,
    pub tracking: TrackingConfig,
    pub store: StoreConfig,
}

impl EngineConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ScoringError::Config(e.to_string()))
    }

    /// Load from `path`, or from `scoreguard.toml` in the working directory
    /// when present, then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ScoringError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    /// Apply `SCOREGUARD_*` overrides using `lookup` to read variables.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>> {
            raw.map(|v| {
                v.trim()
                    .parse::<T>()
                    .map_err(|_| ScoringError::Config(format!("{key}: cannot parse {v:?}")))
            })
            .transpose()
        }

        const HIGH_VARIANCE: &str = "SCOREGUARD_HIGH_VARIANCE_SD";
        const OUTLIER_SIGMA: &str = "SCOREGUARD_OUTLIER_SIGMA";
        const MIN_RELIABILITY: &str = "SCOREGUARD_MIN_RELIABILITY";
        const CONFIDENCE: &str = "SCOREGUARD_CONFIDENCE_THRESHOLD";
        const BACKGROUND: &str = "SCOREGUARD_BACKGROUND_TRACKING";
        const RETRIES: &str = "SCOREGUARD_MAX_CONFLICT_RETRIES";

        if let Some(v) = parsed(HIGH_VARIANCE, lookup(HIGH_VARIANCE))? {
            self.flagging.high_variance_sd = v;
        }
        if let Some(v) = parsed(OUTLIER_SIGMA, lookup(OUTLIER_SIGMA))? {
            self.flagging.outlier_sigma = v;
        }
        if let Some(v) = parsed(MIN_RELIABILITY, lookup(MIN_RELIABILITY))? {
            self.flagging.min_reliability = v;
        }
        if let Some(v) = parsed(CONFIDENCE, lookup(CONFIDENCE))? {
            self.tracking.default_confidence_threshold = v;
        }
        if let Some(v) = parsed(BACKGROUND, lookup(BACKGROUND))? {
            self.tracking.background = v;
        }
        if let Some(v) = parsed(RETRIES, lookup(RETRIES))? {
            self.store.max_conflict_retries = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let f = &self.flagging;
        if !(f.high_variance_sd.is_finite() && f.high_variance_sd >= 0.0) {
            return Err(ScoringError::Config(
                "flagging.high_variance_sd must be a non-negative number".into(),
            ));
        }
        if !(f.outlier_sigma.is_finite() && f.outlier_sigma > 0.0) {
            return Err(ScoringError::Config(
                "flagging.outlier_sigma must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&f.min_reliability) {
            return Err(ScoringError::Config(
                "flagging.min_reliability must be within 0..=1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tracking.default_confidence_threshold) {
            return Err(ScoringError::Config(
                "tracking.default_confidence_threshold must be within 0..=1".into(),
            ));
        }
        if self.store.max_conflict_retries == 0 {
            return Err(ScoringError::Config(
                "store.max_conflict_retries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
