//! Configuration management for Switchboard
//!
//! Parses the server's TOML configuration file and provides typed access to
//! settings. Routing documents are not part of this file: they arrive per
//! request or live in the saved-config directory.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{AppError, AppResult};
use crate::resilience::retry::RetrySettings;
use crate::sticky::DEFAULT_STICKY_TTL_SECONDS;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub sticky_session: StickySessionSettings,
    #[serde(default)]
    providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub guardrails: GuardrailsConfig,
    #[serde(default)]
    pub saved_configs: SavedConfigsSettings,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Identity used to scope circuit breaker counters
    #[serde(default = "default_organisation_id")]
    pub organisation_id: String,
    #[serde(default = "default_workspace_id")]
    pub workspace_id: String,
}

fn default_organisation_id() -> String {
    "default".to_string()
}

fn default_workspace_id() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StickySessionSettings {
    /// TTL applied when a routing document's sticky settings give none
    #[serde(default = "default_sticky_ttl")]
    pub default_ttl_seconds: u64,
}

impl Default for StickySessionSettings {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_sticky_ttl(),
        }
    }
}

fn default_sticky_ttl() -> u64 {
    DEFAULT_STICKY_TTL_SECONDS
}

/// Upstream endpoint for one provider id
///
/// Fields are private; the value is only readable once `Config::validate`
/// has accepted it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    base_url: String,
}

impl ProviderConfig {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Organisation-wide guardrails applied ahead of every routing document
///
/// Entries use the routing document shorthand: a check id string, or a
/// table of check ids to parameters plus optional `deny`/`async` flags.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GuardrailsConfig {
    #[serde(default)]
    pub default_input: Vec<Value>,
    #[serde(default)]
    pub default_output: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SavedConfigsSettings {
    /// Directory of `<slug>.json` routing documents; none when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        // Phase 1: read
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        // Phase 2: parse
        let config: Self = toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
            path: path_display.clone(),
            source,
        })?;

        // Phase 3: validate
        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Validate configuration after parsing
    ///
    /// Called by `from_file()` and `from_str()`. Retry settings are checked
    /// earlier, while deserialising.
    pub fn validate(&self) -> AppResult<()> {
        if self.server.host.trim().is_empty() {
            return Err(AppError::Config(
                "server.host must not be empty".to_string(),
            ));
        }
        if self.server.organisation_id.is_empty() || self.server.workspace_id.is_empty() {
            return Err(AppError::Config(
                "server.organisation_id and server.workspace_id must not be empty".to_string(),
            ));
        }

        for (id, provider) in &self.providers {
            if !provider.base_url.starts_with("http://") && !provider.base_url.starts_with("https://")
            {
                return Err(AppError::Config(format!(
                    "providers.{} has invalid base_url '{}'. base_url must start with 'http://' or 'https://'.",
                    id, provider.base_url
                )));
            }
        }

        if self.sticky_session.default_ttl_seconds == 0 {
            return Err(AppError::Config(
                "sticky_session.default_ttl_seconds must be greater than 0".to_string(),
            ));
        }

        for (field, entries) in [
            ("default_input", &self.guardrails.default_input),
            ("default_output", &self.guardrails.default_output),
        ] {
            if let Some(entry) = entries
                .iter()
                .find(|entry| !entry.is_string() && !entry.is_object())
            {
                return Err(AppError::Config(format!(
                    "guardrails.{} entries must be check ids or tables, got {}",
                    field, entry
                )));
            }
        }

        if !LOG_LEVELS.contains(&self.observability.log_level.as_str()) {
            return Err(AppError::Config(format!(
                "observability.log_level must be one of {:?}, got '{}'",
                LOG_LEVELS, self.observability.log_level
            )));
        }

        Ok(())
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.get(id)
    }

    /// Provider id to base URL, for the pass-through transformer
    pub fn provider_base_urls(&self) -> HashMap<String, String> {
        self.providers
            .iter()
            .map(|(id, provider)| (id.clone(), provider.base_url.clone()))
            .collect()
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
            path: "<string>".to_string(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }
}
