//! Configuration management for jabot.
//!
//! The bot reads `~/.jabot/config.json`, optionally merged with
//! `~/.jabot/secrets.json` (see [`crate::config_loader`]).
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `JABOT_JID` → account.jid
//! - `JABOT_PASSWORD` → account.password
//! - `JABOT_DEFAULT_JID` → account.default_jid
//! - `JABOT_GATEWAY_URL` → gateway.url
//! - `TULING_API_KEY` → backend.api_key
//! - `JABOT_LOG_LEVEL` → observability.log_level

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".jabot"),
        |dirs| dirs.home_dir().join(".jabot"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Account
// ============================================================================

/// Identity the bot logs in with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Bare address of the bot, e.g. `bot@example.com`
    #[serde(default = "default_jid")]
    pub jid: String,

    /// Login secret
    #[serde(default)]
    pub password: String,

    /// Broadcast target for replies to self-issued commands
    #[serde(default)]
    pub default_jid: String,

    /// Home domain for the subscription guard.
    /// Derived from `jid` when unset.
    #[serde(default)]
    pub domain: Option<String>,

    /// Presence show value announced on login
    #[serde(default = "default_status")]
    pub status: String,

    /// Presence status line announced on login
    #[serde(default = "default_status_message")]
    pub status_message: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            jid: default_jid(),
            password: String::new(),
            default_jid: String::new(),
            domain: None,
            status: default_status(),
            status_message: default_status_message(),
        }
    }
}

fn default_jid() -> String {
    "test@localhost".into()
}

fn default_status() -> String {
    "xa".into()
}

fn default_status_message() -> String {
    "I'm a jabber bot".into()
}

// ============================================================================
// Conversational backend
// ============================================================================

/// Conversational backend used when no command matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Enable backend fallback
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Backend endpoint
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// API key sent with every request
    #[serde(default)]
    pub api_key: String,

    /// Request timeout in seconds
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_backend_url(),
            api_key: String::new(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

fn default_backend_url() -> String {
    "http://www.tuling123.com/openapi/api".into()
}

const fn default_backend_timeout() -> u64 {
    15
}

// ============================================================================
// Stanza gateway
// ============================================================================

/// Stanza gateway the bot connects through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// WebSocket URL of the gateway
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Connect + authenticate timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_gateway_url() -> String {
    "ws://127.0.0.1:5281/stanzas".into()
}

const fn default_connect_timeout() -> u64 {
    10
}

// ============================================================================
// Bot behaviour
// ============================================================================

/// Bot behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Software name reported to version queries
    #[serde(default = "default_version_name")]
    pub version_name: String,

    /// Software version reported to version queries
    #[serde(default = "default_version")]
    pub version: String,

    /// Answer last-activity queries (otherwise reply service-unavailable)
    #[serde(default = "default_true")]
    pub activity_tracking: bool,

    /// Self-addressed keyword that suspends autonomous replies
    #[serde(default = "default_suspend_keyword")]
    pub suspend_keyword: String,

    /// Self-addressed keyword that resumes autonomous replies
    #[serde(default = "default_resume_keyword")]
    pub resume_keyword: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            version_name: default_version_name(),
            version: default_version(),
            activity_tracking: true,
            suspend_keyword: default_suspend_keyword(),
            resume_keyword: default_resume_keyword(),
        }
    }
}

fn default_version_name() -> String {
    "jabot".into()
}

fn default_version() -> String {
    "0.1".into()
}

fn default_suspend_keyword() -> String {
    "退下".into()
}

fn default_resume_keyword() -> String {
    "来人".into()
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to hold at `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

const fn default_true() -> bool {
    true
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Login identity
    #[serde(default)]
    pub account: AccountConfig,

    /// Conversational backend
    #[serde(default)]
    pub backend: BackendConfig,

    /// Stanza gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Bot behaviour
    #[serde(default)]
    pub bot: BotConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default directory, merging `secrets.json`.
    pub fn load() -> Result<Self> {
        Self::load_dir(&config_dir())
    }

    /// Load configuration from a directory holding `config.json` / `secrets.json`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.join("config.json").exists() && !dir.join("secrets.json").exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        let value = crate::config_loader::load_modular_config(Some(dir.to_path_buf()))?;
        serde_json::from_value(value)
            .with_context(|| format!("Failed to parse config from {}", dir.display()))
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(jid) = std::env::var("JABOT_JID") {
            self.account.jid = jid;
        }
        if let Ok(password) = std::env::var("JABOT_PASSWORD") {
            self.account.password = password;
        }
        if let Ok(target) = std::env::var("JABOT_DEFAULT_JID") {
            self.account.default_jid = target;
        }
        if let Ok(url) = std::env::var("JABOT_GATEWAY_URL") {
            self.gateway.url = url;
        }
        if let Ok(key) = std::env::var("TULING_API_KEY") {
            self.backend.api_key = key;
        }
        if let Ok(level) = std::env::var("JABOT_LOG_LEVEL") {
            self.observability.log_level = level;
        }
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        let dir = config_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }
        self.save_to(&dir.join("config.json"))
    }

    /// Copy with the account password and backend key cleared, for writing
    /// to `config.json` while credentials stay in `secrets.json`.
    pub fn without_secrets(&self) -> Self {
        let mut config = self.clone();
        config.account.password.clear();
        config.backend.api_key.clear();
        config
    }

    /// Save configuration to a specific file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Explicit home domain for the subscription guard, if configured.
    pub fn domain_override(&self) -> Option<&str> {
        self.account
            .domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }

    /// Ensure login credentials are present.
    pub fn require_credentials(&self) -> crate::Result<()> {
        if self.account.jid.trim().is_empty() {
            return Err(crate::Error::Config("account.jid is empty".into()));
        }
        if self.account.password.is_empty() {
            return Err(crate::Error::Config("account.password is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.account.jid, "test@localhost");
        assert_eq!(config.account.status, "xa");
        assert!(config.backend.enabled);
        assert_eq!(config.backend.timeout_secs, 15);
        assert_eq!(config.bot.suspend_keyword, "退下");
        assert_eq!(config.bot.resume_keyword, "来人");
        assert_eq!(config.observability.log_format, "pretty");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{"account": {"jid": "bot@example.com", "password": "pw"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.account.jid, "bot@example.com");
        assert_eq!(config.account.status, "xa");
        assert_eq!(config.bot.version_name, "jabot");
    }

    #[test]
    fn domain_override_ignores_blank() {
        let mut config = Config::default();
        assert_eq!(config.domain_override(), None);

        config.account.domain = Some("  ".into());
        assert_eq!(config.domain_override(), None);

        config.account.domain = Some("other.org".into());
        assert_eq!(config.domain_override(), Some("other.org"));
    }

    #[test]
    fn observability_accepts_legacy_aliases() {
        let json = r#"{"level": "debug", "format": "json"}"#;
        let obs: ObservabilityConfig = serde_json::from_str(json).unwrap();
        assert_eq!(obs.log_level, "debug");
        assert_eq!(obs.log_format, "json");
    }

    #[test]
    fn require_credentials_rejects_missing_password() {
        let config = Config::default();
        let err = config.require_credentials().unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn without_secrets_clears_credentials() {
        let mut config = Config::default();
        config.account.password = "pw".into();
        config.backend.api_key = "key".into();
        let public = config.without_secrets();
        assert!(public.account.password.is_empty());
        assert!(public.backend.api_key.is_empty());
        assert_eq!(public.account.jid, config.account.jid);
    }

    #[test]
    fn save_and_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.account.default_jid = "ops@example.com".into();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.account.default_jid, "ops@example.com");
    }
}
