//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (HAUL_HOST, HAUL_PORT, HAUL_LAZY)
//! - TOML configuration file
//! - A config path given as the first command line argument

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Hold bundle requests until the build in flight finishes.
    #[serde(default = "default_lazy")]
    pub lazy: bool,

    /// Directory served as static assets.
    #[serde(default = "default_public_root")]
    pub public_root: PathBuf,

    /// Directory receiving systrace dumps.
    #[serde(default = "default_systrace_dir")]
    pub systrace_dir: PathBuf,

    /// Upgrade paths of the realtime channels.
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Upgrade paths of the realtime channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Debugger relay.
    #[serde(default = "default_debugger_path")]
    pub debugger: String,

    /// Live updates for the native hot-reload client.
    #[serde(default = "default_native_hot_path")]
    pub native_hot: String,

    /// Live updates for the Haul HMR client.
    #[serde(default = "default_haul_hmr_path")]
    pub haul_hmr: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Maximum inbound WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("HAUL_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("HAUL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8081)
}

fn default_lazy() -> bool {
    std::env::var("HAUL_LAZY")
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn default_public_root() -> PathBuf {
    PathBuf::from("assets/public")
}

fn default_systrace_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_debugger_path() -> String {
    "/debugger-proxy".to_string()
}

fn default_native_hot_path() -> String {
    "/hot".to_string()
}

fn default_haul_hmr_path() -> String {
    "/haul-hmr".to_string()
}

fn default_max_body_size() -> usize {
    16 * 1024 * 1024 // 16 MB, systrace dumps are large
}

fn default_max_message_size() -> usize {
    haul_transport::websocket::DEFAULT_MAX_MESSAGE_SIZE
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            lazy: default_lazy(),
            public_root: default_public_root(),
            systrace_dir: default_systrace_dir(),
            channels: ChannelsConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            debugger: default_debugger_path(),
            native_hot: default_native_hot_path(),
            haul_hmr: default_haul_hmr_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: default_max_body_size(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit path, the default paths, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let config_paths = ["haul.toml", "~/.config/haul/haul.toml"];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.public_root = expand_path(&config.public_root);
        config.systrace_dir = expand_path(&config.systrace_dir);
        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(raw) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
        None => path.to_path_buf(),
    }
}
