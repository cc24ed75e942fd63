//! Configuration management
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `VIDCALL__SECTION__KEY` environment variables.

use crate::domain::media::ProviderKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default configuration file, read when `VIDCALL_CONFIG` is not set
pub const DEFAULT_CONFIG_FILE: &str = "config/vidcall.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub calls: CallsConfig,
    pub provider: ProviderConfig,
    pub devices: DevicesConfig,
    pub compliance: ComplianceConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
}

/// Call timing policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallsConfig {
    /// Unanswered `Calling`/`Incoming` window
    pub ring_timeout_secs: u64,
    /// `Connecting` window
    pub negotiation_timeout_secs: u64,
    /// Maximum time in `Connected`
    pub duration_cap_secs: u64,
    pub invitation_ttl_secs: i64,
    /// First duration warning, before the cap
    pub warning_lead_secs: u64,
    /// Start of the final countdown, before the cap
    pub final_countdown_secs: u64,
    pub countdown_step_secs: u64,
}

impl CallsConfig {
    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }

    pub fn invitation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.invitation_ttl_secs)
    }
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: 30,
            negotiation_timeout_secs: 15,
            duration_cap_secs: crate::domain::call::DEFAULT_DURATION_CAP_SECS,
            invitation_ttl_secs: crate::domain::invitation::DEFAULT_INVITATION_TTL_SECS,
            warning_lead_secs: 60,
            final_countdown_secs: 30,
            countdown_step_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Local interface addresses offered as host candidates
    pub host_addresses: Vec<String>,
    /// Public address learned from STUN, offered as a server-reflexive candidate
    pub stun_server: Option<String>,
    /// Relay address allocated on the TURN server
    pub turn_server: Option<String>,
    /// Base URL of hosted conferencing rooms
    pub hosted_base_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::PeerLink,
            host_addresses: vec!["127.0.0.1:50000".to_string()],
            stun_server: None,
            turn_server: None,
            hosted_base_url: "https://rooms.example.invalid".to_string(),
        }
    }
}

/// Capture devices available to this process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesConfig {
    pub camera: bool,
    pub microphone: bool,
    pub permission_granted: bool,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            camera: true,
            microphone: true,
            permission_granted: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComplianceConfig {
    pub enabled: bool,
    /// `POST` target, e.g. `https://compliance.example.com/compliance-notify`
    pub endpoint: Option<String>,
    pub supervisor_contact: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl ComplianceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(5000))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL URL; the in-memory store is used when absent
    pub url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                log_level: "info".to_string(),
            },
            calls: CallsConfig::default(),
            provider: ProviderConfig::default(),
            devices: DevicesConfig::default(),
            compliance: ComplianceConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// Load defaults, the configuration file and environment overrides
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var("VIDCALL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("VIDCALL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
