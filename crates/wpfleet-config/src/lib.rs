//! Shared configuration for the wpfleet server and CLI.
//!
//! One TOML file, overridable from `WPFLEET_*` environment variables,
//! translated into the runtime types `wpfleet_core` consumes. The CLI
//! layers its own flags (`--api-url`, `--timeout`) on top.

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use wpfleet_core::{ComposeSettings, LifecycleConfig, SyncConfig};

/// Environment prefix. Nested keys use `__`: `WPFLEET_SERVER__LISTEN_ADDR`.
pub const ENV_PREFIX: &str = "WPFLEET_";

/// Default backend address.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration shared by `wpfleet serve` and the client commands.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Backend the client commands talk to.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default)]
    pub client: ClientSettings,

    #[serde(default)]
    pub server: ServerSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            client: ClientSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.into()
}

/// Sync client tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientSettings {
    pub timeout_secs: u64,
    /// Delay of the reconciling refresh after a create.
    pub refresh_delay_ms: u64,
    /// Wait window of each change long-poll.
    pub long_poll_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            refresh_delay_ms: 2000,
            long_poll_secs: 25,
        }
    }
}

/// Which provisioner `wpfleet serve` drives.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProvisionerKind {
    /// `docker compose` on the local host.
    #[default]
    Compose,
    /// In-process, no containers.
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub listen_addr: String,
    /// Host name used to build site URLs.
    pub public_host: String,
    /// Holds `sites.json` and one directory per compose project.
    pub data_dir: PathBuf,
    pub provisioner: ProvisionerKind,
    pub provision_timeout_secs: u64,
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub compose_command: String,
    pub auto_start: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".into(),
            public_host: "localhost".into(),
            data_dir: PathBuf::from("sites"),
            provisioner: ProvisionerKind::Compose,
            provision_timeout_secs: 300,
            port_range_start: 8000,
            port_range_end: 8999,
            compose_command: "docker compose".into(),
            auto_start: true,
        }
    }
}

// ── Translation to runtime types ────────────────────────────────────

impl Config {
    /// The API base URL, with an explicit override (CLI flag) winning.
    pub fn api_url(&self, override_url: Option<&str>) -> Result<Url, ConfigError> {
        let raw = override_url.unwrap_or(&self.api_base_url);
        let url = Url::parse(raw)
            .map_err(|e| ConfigError::invalid("api_base_url", format!("{raw}: {e}")))?;
        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "api_base_url",
                format!("expected an http(s) URL, got '{raw}'"),
            ));
        }
        Ok(url)
    }

    /// Build the sync client settings. `timeout` overrides
    /// `client.timeout_secs` when given.
    pub fn sync_config(
        &self,
        override_url: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<SyncConfig, ConfigError> {
        let mut config = SyncConfig::new(self.api_url(override_url)?);
        config.timeout = timeout.unwrap_or(Duration::from_secs(self.client.timeout_secs));
        config.refresh_delay = Duration::from_millis(self.client.refresh_delay_ms);
        config.long_poll_wait = Duration::from_secs(self.client.long_poll_secs);
        Ok(config)
    }
}

impl ServerSettings {
    pub fn listen_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr.parse().map_err(|_| {
            ConfigError::invalid(
                "server.listen_addr",
                format!("expected host:port, got '{}'", self.listen_addr),
            )
        })
    }

    pub fn port_range(&self) -> Result<RangeInclusive<u16>, ConfigError> {
        if self.port_range_start == 0 || self.port_range_start > self.port_range_end {
            return Err(ConfigError::invalid(
                "server.port_range",
                format!(
                    "{}-{} is not a valid port range",
                    self.port_range_start, self.port_range_end
                ),
            ));
        }
        Ok(self.port_range_start..=self.port_range_end)
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision_timeout_secs)
    }

    pub fn lifecycle_config(&self) -> Result<LifecycleConfig, ConfigError> {
        if self.provision_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "server.provision_timeout_secs",
                "must be greater than zero",
            ));
        }
        Ok(LifecycleConfig {
            provision_timeout: self.provision_timeout(),
            auto_start: self.auto_start,
        })
    }

    /// Location of the durable site registry.
    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("sites.json")
    }

    pub fn compose_settings(&self) -> Result<ComposeSettings, ConfigError> {
        let compose_command: Vec<String> = self
            .compose_command
            .split_whitespace()
            .map(ToOwned::to_owned)
            .collect();
        if compose_command.is_empty() {
            return Err(ConfigError::invalid(
                "server.compose_command",
                "must not be empty",
            ));
        }
        Ok(ComposeSettings {
            data_dir: self.data_dir.clone(),
            compose_command,
            public_host: self.public_host.clone(),
            command_timeout: self.provision_timeout(),
        })
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "wpfleet", "wpfleet").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("wpfleet");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file at `path`, then the environment.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the config from `path` (or the platform location) plus environment.
/// A missing file is not an error.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    let config: Config = figment(&path).extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

pub fn to_toml(cfg: &Config) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(cfg)?)
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, to_toml(cfg)?)?;
    Ok(())
}
