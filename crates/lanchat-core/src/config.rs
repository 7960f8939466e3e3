//! Configuration system for LanChat.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $LANCHAT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/lanchat/config.toml
//!   3. ~/.config/lanchat/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::host::{ServiceType, SERVICE_DOMAIN, SERVICE_TYPE};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LanchatConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub discovery: DiscoveryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Name advertised to other hosts and sent as the first chat message.
    /// Empty = system host name.
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP port the listener binds. 0 = OS-assigned.
    pub listen_port: u16,
    /// TCP keepalive idle time before the first probe.
    pub keepalive_idle_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// DNS-SD service type shared by listeners and discoverers.
    pub service_type: String,
    pub domain: String,
    /// Per-resolution timeout.
    pub resolve_timeout_ms: u64,
    /// Restarts allowed after a defunct name service. 0 = unbounded.
    pub max_restarts: u32,
    /// Pause before each restart.
    pub restart_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset.
    pub level: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            display_name: String::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: 0,
            keepalive_idle_secs: 2,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: SERVICE_TYPE.to_string(),
            domain: SERVICE_DOMAIN.to_string(),
            resolve_timeout_ms: 5_000,
            max_restarts: 0,
            restart_delay_ms: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ── Accessors ─────────────────────────────────────────────────────────────────

impl IdentityConfig {
    /// Configured display name, falling back to the system host name.
    pub fn resolved_display_name(&self) -> String {
        if !self.display_name.trim().is_empty() {
            return self.display_name.trim().to_string();
        }
        nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "lanchat".to_string())
    }
}

impl NetworkConfig {
    pub fn keepalive_idle(&self) -> Duration {
        Duration::from_secs(self.keepalive_idle_secs)
    }
}

impl DiscoveryConfig {
    pub fn service_type(&self) -> ServiceType {
        ServiceType::new(self.service_type.clone(), self.domain.clone())
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn max_restarts(&self) -> Option<u32> {
        (self.max_restarts > 0).then_some(self.max_restarts)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("lanchat")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl LanchatConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit file path, then apply env overrides.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            LanchatConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("LANCHAT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&LanchatConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply LANCHAT_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("LANCHAT_IDENTITY__DISPLAY_NAME") {
            self.identity.display_name = v;
        }
        if let Some(p) = var("LANCHAT_NETWORK__LISTEN_PORT").and_then(|v| v.parse().ok()) {
            self.network.listen_port = p;
        }
        if let Some(v) = var("LANCHAT_DISCOVERY__SERVICE_TYPE") {
            self.discovery.service_type = v;
        }
        if let Some(n) = var("LANCHAT_DISCOVERY__MAX_RESTARTS").and_then(|v| v.parse().ok()) {
            self.discovery.max_restarts = n;
        }
        if let Some(v) = var("LANCHAT_LOGGING__LEVEL") {
            self.logging.level = v;
        }
    }
}
