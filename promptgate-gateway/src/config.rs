// Copyright 2025 Promptgate (https://github.com/promptgate)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CredentialCacheConfig;

/// Promptgate Gateway Configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VaultConfig {
    /// Enable proxy-key resolution through the vault (default: false).
    /// Portal keys always resolve; only the proxy chain is gated.
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Maximum number of cached credential resolutions
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: u64,

    /// Time-to-live for cached resolutions, in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Whether to track hit/miss statistics
    #[serde(default = "default_cache_track_stats")]
    pub track_stats: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// SQLite database URL for the log store
    /// (e.g., "sqlite://promptgate.db" or "sqlite::memory:")
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

// Default values
fn default_cache_max_entries() -> u64 {
    10_000
}

fn default_cache_ttl_secs() -> u64 {
    600
}

fn default_cache_track_stats() -> bool {
    true
}

fn default_database_url() -> String {
    "sqlite://promptgate.db".to_string()
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self { enabled: false }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            ttl_secs: default_cache_ttl_secs(),
            track_stats: default_cache_track_stats(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            vault: VaultConfig::default(),
            cache: CacheConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - PROMPTGATE_VAULT_ENABLED: Enable proxy-key resolution (default: false)
    /// - PROMPTGATE_CACHE_MAX_ENTRIES: Credential cache capacity (default: 10000)
    /// - PROMPTGATE_CACHE_TTL_SECS: Credential cache TTL in seconds (default: 600)
    /// - PROMPTGATE_DATABASE_URL: Log store database URL
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(enabled) = std::env::var("PROMPTGATE_VAULT_ENABLED") {
            config.vault.enabled = enabled.parse().unwrap_or(false);
        }

        if let Ok(max_entries) = std::env::var("PROMPTGATE_CACHE_MAX_ENTRIES") {
            if let Ok(val) = max_entries.parse() {
                config.cache.max_entries = val;
            }
        }

        if let Ok(ttl) = std::env::var("PROMPTGATE_CACHE_TTL_SECS") {
            if let Ok(val) = ttl.parse() {
                config.cache.ttl_secs = val;
            }
        }

        if let Ok(url) = std::env::var("PROMPTGATE_DATABASE_URL") {
            config.store.database_url = url;
        }

        config
    }

    /// Load configuration with priority: file > env > defaults
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        config = Self::merge_with_env(config);

        Ok(config)
    }

    /// Merge config with environment variables (env takes priority)
    fn merge_with_env(mut config: Self) -> Self {
        let env_config = Self::from_env();

        if std::env::var("PROMPTGATE_VAULT_ENABLED").is_ok() {
            config.vault.enabled = env_config.vault.enabled;
        }
        if std::env::var("PROMPTGATE_CACHE_MAX_ENTRIES").is_ok() {
            config.cache.max_entries = env_config.cache.max_entries;
        }
        if std::env::var("PROMPTGATE_CACHE_TTL_SECS").is_ok() {
            config.cache.ttl_secs = env_config.cache.ttl_secs;
        }
        if std::env::var("PROMPTGATE_DATABASE_URL").is_ok() {
            config.store.database_url = env_config.store.database_url;
        }

        config
    }

    /// Cache configuration in the form the credential cache consumes
    pub fn cache_config(&self) -> CredentialCacheConfig {
        CredentialCacheConfig {
            max_entries: self.cache.max_entries,
            ttl: Duration::from_secs(self.cache.ttl_secs),
            track_stats: self.cache.track_stats,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            anyhow::bail!("cache.max_entries must be greater than zero");
        }
        if self.cache.ttl_secs == 0 {
            anyhow::bail!("cache.ttl_secs must be greater than zero");
        }
        if self.store.database_url.is_empty() {
            anyhow::bail!("store.database_url must not be empty");
        }
        if !self.store.database_url.starts_with("sqlite:") {
            anyhow::bail!(
                "store.database_url must be a sqlite URL, got: {}",
                self.store.database_url
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert!(!config.vault.enabled);
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.cache.ttl_secs, 600);
        assert_eq!(config.store.database_url, "sqlite://promptgate.db");
        config.validate().unwrap();
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            [vault]
            enabled = true

            [cache]
            max_entries = 50
            ttl_secs = 30

            [store]
            database_url = "sqlite::memory:"
        "#;
        let config: GatewayConfig = toml::from_str(toml).unwrap();
        assert!(config.vault.enabled);
        assert_eq!(config.cache.max_entries, 50);
        assert_eq!(config.cache.ttl_secs, 30);
        assert!(config.cache.track_stats);
        assert_eq!(config.store.database_url, "sqlite::memory:");
        config.validate().unwrap();

        let cache = config.cache_config();
        assert_eq!(cache.ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promptgate.toml");
        std::fs::write(
            &path,
            "[cache]\nmax_entries = 7\n\n[store]\ndatabase_url = \"sqlite::memory:\"\n",
        )
        .unwrap();

        let config = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(config.cache.max_entries, 7);
        assert_eq!(config.cache.ttl_secs, 600);
        assert_eq!(config.store.database_url, "sqlite::memory:");

        assert!(GatewayConfig::from_file(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = GatewayConfig::default();
        config.cache.max_entries = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.store.database_url = "postgres://nope".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("PROMPTGATE_VAULT_ENABLED", "true");
        std::env::set_var("PROMPTGATE_CACHE_TTL_SECS", "120");

        let config = GatewayConfig::from_env();
        assert!(config.vault.enabled);
        assert_eq!(config.cache.ttl_secs, 120);

        std::env::remove_var("PROMPTGATE_VAULT_ENABLED");
        std::env::remove_var("PROMPTGATE_CACHE_TTL_SECS");
    }
}
