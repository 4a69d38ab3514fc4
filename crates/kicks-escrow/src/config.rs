//! # Engine Configuration
//!
//! Tunables for fees, escrow windows, dispute intake and the release sweep.
//! Loaded from YAML, then overridden from `KICKS_*` environment variables,
//! then validated. Every field has a default so an empty file is valid.

use std::path::Path;

use kicks_core::FeeRate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The YAML was malformed or had unknown keys.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    /// An environment override had an unparseable value.
    #[error("invalid value for {var}: \"{value}\"")]
    Env {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
    /// A value is out of range or inconsistent with another.
    #[error("invalid config field {field}: {reason}")]
    Invalid {
        /// Dotted field path.
        field: &'static str,
        /// What is wrong.
        reason: String,
    },
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Platform fee applied when a transaction does not specify one.
    pub default_fee_rate_bps: u32,
    /// Escrow window applied when a transaction does not specify one.
    pub default_escrow_days: u32,
    /// Largest accepted escrow window.
    pub max_escrow_days: u32,
    /// Progress fraction at which the countdown is flagged as near expiry.
    pub near_expiry_threshold: f64,
    /// Dispute intake limits.
    pub dispute: DisputeConfig,
    /// Release sweep settings.
    pub scheduler: SchedulerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_fee_rate_bps: FeeRate::STANDARD.basis_points(),
            default_escrow_days: 3,
            max_escrow_days: 30,
            near_expiry_threshold: 0.75,
            dispute: DisputeConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Limits applied to dispute submissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisputeConfig {
    /// Minimum description length in characters, after trimming.
    pub description_min_chars: usize,
    /// Maximum description length in characters, after trimming.
    pub description_max_chars: usize,
    /// Maximum number of evidence references.
    pub max_evidence: usize,
    /// Maximum size of one evidence file.
    pub max_evidence_bytes: u64,
    /// Accepted evidence MIME types.
    pub allowed_content_types: Vec<String>,
}

impl Default for DisputeConfig {
    fn default() -> Self {
        Self {
            description_min_chars: 20,
            description_max_chars: 2000,
            max_evidence: 5,
            max_evidence_bytes: 10 * 1024 * 1024,
            allowed_content_types: [
                "image/jpeg",
                "image/png",
                "image/webp",
                "image/heic",
                "image/gif",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Auto-release sweep settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Seconds between sweeps.
    pub interval_secs: u64,
    /// Attempts per transaction when a commit conflicts.
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_retries: 3,
        }
    }
}

impl EngineConfig {
    /// Parse YAML. Missing keys take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read a YAML file, apply `KICKS_*` overrides from the process
    /// environment, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml_str(&yaml)?.with_env_overrides(|k| std::env::var(k).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().with_env_overrides(|k| std::env::var(k).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps variable names to values.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        fn parse<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            var: &'static str,
        ) -> Result<Option<T>, ConfigError> {
            match lookup(var) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::Env { var, value }),
            }
        }

        if let Some(v) = parse(&lookup, "KICKS_DEFAULT_FEE_RATE_BPS")? {
            self.default_fee_rate_bps = v;
        }
        if let Some(v) = parse(&lookup, "KICKS_DEFAULT_ESCROW_DAYS")? {
            self.default_escrow_days = v;
        }
        if let Some(v) = parse(&lookup, "KICKS_MAX_ESCROW_DAYS")? {
            self.max_escrow_days = v;
        }
        if let Some(v) = parse(&lookup, "KICKS_NEAR_EXPIRY_THRESHOLD")? {
            self.near_expiry_threshold = v;
        }
        if let Some(v) = parse(&lookup, "KICKS_DISPUTE_DESCRIPTION_MAX_CHARS")? {
            self.dispute.description_max_chars = v;
        }
        if let Some(v) = parse(&lookup, "KICKS_SWEEP_INTERVAL_SECS")? {
            self.scheduler.interval_secs = v;
        }
        if let Some(v) = parse(&lookup, "KICKS_SWEEP_MAX_RETRIES")? {
            self.scheduler.max_retries = v;
        }
        Ok(self)
    }

    /// Check ranges and cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FeeRate::from_basis_points(self.default_fee_rate_bps).map_err(|e| ConfigError::Invalid {
            field: "default_fee_rate_bps",
            reason: e.to_string(),
        })?;
        if self.default_escrow_days > self.max_escrow_days {
            return Err(ConfigError::Invalid {
                field: "default_escrow_days",
                reason: format!(
                    "{} exceeds max_escrow_days ({})",
                    self.default_escrow_days, self.max_escrow_days
                ),
            });
        }
        if !(self.near_expiry_threshold > 0.0 && self.near_expiry_threshold <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "near_expiry_threshold",
                reason: format!("{} is outside (0, 1]", self.near_expiry_threshold),
            });
        }
        let d = &self.dispute;
        if !(500..=2000).contains(&d.description_max_chars) {
            return Err(ConfigError::Invalid {
                field: "dispute.description_max_chars",
                reason: format!("{} is outside 500..=2000", d.description_max_chars),
            });
        }
        if d.description_min_chars == 0 || d.description_min_chars > d.description_max_chars {
            return Err(ConfigError::Invalid {
                field: "dispute.description_min_chars",
                reason: format!(
                    "{} must be between 1 and description_max_chars",
                    d.description_min_chars
                ),
            });
        }
        if d.allowed_content_types.is_empty() {
            return Err(ConfigError::Invalid {
                field: "dispute.allowed_content_types",
                reason: "at least one content type is required".to_string(),
            });
        }
        if self.scheduler.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.interval_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.scheduler.max_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.max_retries",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// The default fee rate as a typed value.
    ///
    /// Falls back to the standard rate if the config was never validated.
    pub fn default_fee_rate(&self) -> FeeRate {
        FeeRate::from_basis_points(self.default_fee_rate_bps).unwrap_or(FeeRate::STANDARD)
    }
}
