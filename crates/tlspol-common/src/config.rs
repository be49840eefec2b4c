//! Configuration for tlspol

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Socketmap server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream resolver configuration
    #[serde(default)]
    pub dns: DnsConfig,

    /// Cache backend configuration
    #[serde(default)]
    pub redis: RedisConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            dns: DnsConfig::default(),
            redis: RedisConfig::default(),
        }
    }
}

/// Socketmap server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address; `host:port` for TCP, `unix:/path` for a domain socket
    #[serde(default = "default_server_address")]
    pub address: String,

    /// Refresh cached policies before they expire
    #[serde(default = "default_prefetch")]
    pub prefetch: bool,

    /// Append the TLSRPT fragment to plain QUERY replies
    #[serde(default)]
    pub tlsrpt: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
            prefetch: default_prefetch(),
            tlsrpt: false,
        }
    }
}

fn default_server_address() -> String {
    "127.0.0.1:8642".to_string()
}

fn default_prefetch() -> bool {
    true
}

/// Upstream resolver configuration
///
/// The resolver must validate DNSSEC and set the AD bit; the engine trusts
/// that flag and never validates signatures itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address of the trusted validating resolver
    #[serde(default = "default_dns_address")]
    pub address: String,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            address: default_dns_address(),
        }
    }
}

fn default_dns_address() -> String {
    "127.0.0.1:53".to_string()
}

/// Cache backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Bypass the cache layer entirely
    #[serde(default)]
    pub disable: bool,

    /// Backend address
    #[serde(default = "default_redis_address")]
    pub address: String,

    /// Backend password, empty for none
    #[serde(default)]
    pub password: String,

    /// Database number
    #[serde(default)]
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            disable: false,
            address: default_redis_address(),
            password: String::new(),
            db: 0,
        }
    }
}

fn default_redis_address() -> String {
    "127.0.0.1:6379".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load() -> crate::Result<Self> {
        let paths = [
            std::path::PathBuf::from("./config.toml"),
            std::path::PathBuf::from("/etc/tlspol/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    /// Apply `TLSPOL_PREFETCH` / `TLSPOL_TLSRPT` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TLSPOL_PREFETCH") {
            self.server.prefetch = v == "1";
        }
        if let Ok(v) = std::env::var("TLSPOL_TLSRPT") {
            self.server.tlsrpt = v == "1";
        }
    }

    /// Whether the listen address selects a Unix domain socket
    pub fn unix_socket_path(&self) -> Option<&str> {
        self.server.address.strip_prefix("unix:")
    }
}
