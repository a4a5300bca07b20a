//! Configuration validation.
//!
//! Checks that required values are present and within valid ranges before
//! the bot tries to log in.

use thiserror::Error;

use crate::config::{AccountConfig, BackendConfig, BotConfig, Config, ObservabilityConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

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

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.account.validate() {
            errors.push(e);
        }
        if let Err(e) = self.backend.validate() {
            errors.push(e);
        }
        if let Err(e) = self.bot.validate() {
            errors.push(e);
        }
        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }
        if url::Url::parse(&self.gateway.url).is_err() {
            errors.push(ValidationError::InvalidValue {
                field: "gateway.url".into(),
                reason: format!("not a valid URL: {}", self.gateway.url),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

impl Validate for AccountConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.jid.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "account.jid".into(),
            });
        }
        if !self.jid.contains('@') {
            return Err(ValidationError::InvalidValue {
                field: "account.jid".into(),
                reason: "must be of the form user@domain".into(),
            });
        }
        Ok(())
    }
}

impl Validate for BackendConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if url::Url::parse(&self.url).is_err() {
            return Err(ValidationError::InvalidValue {
                field: "backend.url".into(),
                reason: format!("not a valid URL: {}", self.url),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "backend.timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for BotConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.suspend_keyword.trim().is_empty() || self.resume_keyword.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "bot.suspend_keyword / bot.resume_keyword".into(),
            });
        }
        if self.suspend_keyword.trim() == self.resume_keyword.trim() {
            return Err(ValidationError::InvalidValue {
                field: "bot.resume_keyword".into(),
                reason: "must differ from bot.suspend_keyword".into(),
            });
        }
        Ok(())
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
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }
        Ok(())
    }
}
