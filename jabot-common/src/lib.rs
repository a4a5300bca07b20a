//! jabot-common - shared configuration, logging and error types.
//!
//! This crate provides:
//! - Configuration types and loading (`config.json` + `secrets.json`)
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup
//! - Small string/duration helpers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod config_loader;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    AccountConfig, BackendConfig, BotConfig, Config, GatewayConfig, ObservabilityConfig,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
