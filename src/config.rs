//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILSINK_CONFIG` (environment variable)
//! 2. `~/.config/mailsink/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailsink\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! Command-line flags override whatever the file says.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging.
    pub general: GeneralConfig,
    /// SMTP listener.
    pub smtp: SmtpConfig,
    /// HTTP listener.
    pub http: HttpConfig,
    /// Message database.
    pub storage: StorageConfig,
    /// Live-update streams.
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Also write logs to a daily file in this directory.
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub ip: IpAddr,
    pub port: u16,
    /// Name announced in the greeting and HELO replies.
    pub hostname: String,
    /// Largest accepted message in bytes (default: 33554432 = 32 MiB).
    pub max_message_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub ip: IpAddr,
    pub port: u16,
    /// Reject `DELETE /` instead of shutting down.
    pub no_quit: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file; messages are kept in memory when unset.
    pub db: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Seconds of silence before an event stream sends `ping`.
    pub ping_interval_secs: u64,
}

// ── Default implementations ─────────────────────────────────────

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            ip: LOCALHOST,
            port: 1025,
            hostname: "mailsink.local".to_string(),
            max_message_size: 32 * 1024 * 1024, // 32 MiB
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            ip: LOCALHOST,
            port: 1080,
            no_quit: false,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 60,
        }
    }
}

impl SmtpConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl HttpConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl NotifyConfig {
    /// Heartbeat window; never shorter than one second.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration from `path`, or from the standard location.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config(path: Option<&Path>) -> Config {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return Config::default();
    };
    if !path.exists() {
        return Config::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(cfg) => {
                tracing::info!(path = %path.display(), "Loaded config");
                cfg
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to parse config, using defaults"
                );
                Config::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to read config file, using defaults"
            );
            Config::default()
        }
    }
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILSINK_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mailsink").join("config.toml"))
}
