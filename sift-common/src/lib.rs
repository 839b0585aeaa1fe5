//! Sift Common - shared configuration, validation, and logging for Sift services.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Logging setup
//! - Utility functions (log sanitizing, duration parsing)

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    AcquisitionConfig, BacktestConfig, CacheConfig, Config, EvaluationConfig, LookbackConfig,
    ObservabilityConfig, ProviderConfig, ScreenerConfig,
};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::{Config, ScreenerConfig};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
