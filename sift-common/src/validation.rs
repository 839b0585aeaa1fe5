//! Configuration validation for Sift services.
//!
//! Provides validation logic for configuration fields to ensure
//! all required values are present and within valid ranges.

use thiserror::Error;

use crate::config::{
    AcquisitionConfig, BacktestConfig, CacheConfig, Config, LookbackConfig, ObservabilityConfig,
    ProviderConfig, ScreenerConfig,
};
use crate::util::parse_duration_secs;

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

fn collect(results: Vec<ValidationResult<()>>) -> ValidationResult<()> {
    let mut errors: Vec<ValidationError> = results.into_iter().filter_map(Result::err).collect();
    if errors.is_empty() {
        Ok(())
    } else if errors.len() == 1 {
        Err(errors.remove(0))
    } else {
        Err(ValidationError::Multiple(errors))
    }
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        collect(vec![self.observability.validate(), self.screener.validate()])
    }

    /// Load and validate configuration.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

impl Validate for ScreenerConfig {
    fn validate(&self) -> ValidationResult<()> {
        collect(vec![
            self.provider.validate(),
            self.acquisition.validate(),
            self.lookback.validate(),
            self.cache.validate(),
            self.backtest.validate(),
        ])
    }
}

impl Validate for ProviderConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ValidationError::InvalidValue {
                field: "screener.provider.base_url".into(),
                reason: "must start with http:// or https://".into(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "screener.provider.timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.rate_limit_rpm == 0 {
            return Err(ValidationError::InvalidValue {
                field: "screener.provider.rate_limit_rpm".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for AcquisitionConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.max_concurrent_fetches == 0 {
            return Err(ValidationError::InvalidValue {
                field: "screener.acquisition.max_concurrent_fetches".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.bulk_max_trading_days == 0 {
            return Err(ValidationError::InvalidValue {
                field: "screener.acquisition.bulk_max_trading_days".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for LookbackConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.buffer_days >= self.max_extension_days {
            return Err(ValidationError::Conflict {
                reason: format!(
                    "screener.lookback.buffer_days ({}) must be below max_extension_days ({})",
                    self.buffer_days, self.max_extension_days
                ),
            });
        }
        Ok(())
    }
}

impl Validate for CacheConfig {
    fn validate(&self) -> ValidationResult<()> {
        match parse_duration_secs(&self.ttl) {
            Ok(0) => Err(ValidationError::InvalidValue {
                field: "screener.cache.ttl".into(),
                reason: "must be greater than 0".into(),
            }),
            Ok(_) => Ok(()),
            Err(reason) => Err(ValidationError::InvalidValue {
                field: "screener.cache.ttl".into(),
                reason,
            }),
        }
    }
}

impl Validate for BacktestConfig {
    fn validate(&self) -> ValidationResult<()> {
        if let Some(cmd) = &self.command {
            if cmd.trim().is_empty() {
                return Err(ValidationError::MissingField {
                    field: "screener.backtest.command".into(),
                });
            }
        }
        if self.max_concurrent_jobs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "screener.backtest.max_concurrent_jobs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}
