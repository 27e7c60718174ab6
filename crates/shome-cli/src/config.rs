//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use shome_core::AnalyticsConfig;

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,

    /// Carried values older than this many seconds count as undefined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staleness_limit_secs: Option<u64>,

    /// Deadline for a single analytics query, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_timeout_ms: Option<u64>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("staleness_limit_secs", &self.staleness_limit_secs)
            .field("query_timeout_ms", &self.query_timeout_ms)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("shome.db"),
            staleness_limit_secs: None,
            query_timeout_ms: None,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (SHOME_*)
        figment = figment.merge(Env::prefixed("SHOME_"));

        figment.extract()
    }

    /// Analytics settings derived from this configuration.
    ///
    /// Fails if `staleness_limit_secs` does not fit a [`chrono::Duration`].
    pub fn analytics(&self) -> Result<AnalyticsConfig> {
        let staleness_limit = self
            .staleness_limit_secs
            .map(|secs| {
                i64::try_from(secs)
                    .ok()
                    .and_then(chrono::Duration::try_seconds)
                    .with_context(|| format!("staleness_limit_secs out of range: {secs}"))
            })
            .transpose()?;
        Ok(AnalyticsConfig {
            staleness_limit,
            query_timeout: self.query_timeout_ms.map(std::time::Duration::from_millis),
        })
    }
}

/// Returns the platform-specific config directory for shome.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("shome"))
}

/// Returns the platform-specific data directory for shome.
///
/// On Linux: `~/.local/share/shome`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("shome"))
}
