//! Configuration module
//!
//! Settings are merged from built-in defaults, an optional YAML file,
//! `PEERLINK_*` environment variables and finally CLI overrides.

mod layout;

pub use layout::*;

use crate::forward::DEFAULT_BASE_PORT;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "PEERLINK_";

/// Files probed in the working directory when no explicit path is given
const SETTINGS_CANDIDATES: &[&str] = &["peerlink.yaml", "peerlink.yml"];

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::config(format!("unknown log format: {}", other))),
        }
    }
}

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Log level
    #[serde(rename = "log-level")]
    pub log_level: String,

    /// Log format
    #[serde(rename = "log-format")]
    pub log_format: LogFormat,

    /// Client installation settings
    pub client: ClientSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            client: ClientSettings::default(),
        }
    }
}

/// Client installation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Installation root (platform default when unset)
    #[serde(rename = "install-dir")]
    pub install_dir: Option<PathBuf>,

    /// Configuration directory, relative to the installation root unless absolute
    #[serde(rename = "config-dir")]
    pub config_dir: String,

    /// Default remote Trojan port
    #[serde(rename = "server-port")]
    pub server_port: u16,

    /// Default TLS verification mode for new endpoints
    #[serde(rename = "allow-insecure")]
    pub allow_insecure: bool,

    /// First port probed when a forward has no explicit listen port
    #[serde(rename = "forward-base-port")]
    pub forward_base_port: u16,
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            install_dir: None,
            config_dir: DEFAULT_CONFIG_DIR.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            allow_insecure: true,
            forward_base_port: DEFAULT_BASE_PORT,
        }
    }
}

impl Settings {
    /// Load settings from an explicit file or the first default candidate,
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => match SETTINGS_CANDIDATES.iter().map(Path::new).find(|p| p.is_file()) {
                Some(candidate) => Self::from_file(candidate)?,
                None => Settings::default(),
            },
        };
        settings.apply_env(std::env::vars())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a YAML file without environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading settings from {}", path.display());
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::persist("read settings", path, e))?;
        Self::from_str(&content)
    }

    /// Parse settings from a YAML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Settings::default());
        }
        let settings: Settings = serde_yaml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `PEERLINK_*` overrides from the given variables
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.trim();
            match name {
                "LOG_LEVEL" => self.log_level = value.to_ascii_lowercase(),
                "LOG_FORMAT" => self.log_format = value.parse()?,
                "INSTALL_DIR" if !value.is_empty() => {
                    self.client.install_dir = Some(PathBuf::from(value))
                }
                "CONFIG_DIR" if !value.is_empty() => self.client.config_dir = value.to_string(),
                "SERVER_PORT" => self.client.server_port = parse_port(name, value)?,
                "FORWARD_BASE_PORT" => self.client.forward_base_port = parse_port(name, value)?,
                "ALLOW_INSECURE" => self.client.allow_insecure = parse_bool(value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(Error::config(format!("unknown log level: {}", self.log_level)));
        }
        if self.client.server_port == 0 {
            return Err(Error::config("client server port cannot be 0"));
        }
        if self.client.forward_base_port == 0 {
            return Err(Error::config("forward base port cannot be 0"));
        }
        if self.client.config_dir.trim().is_empty() {
            return Err(Error::config("client config directory cannot be empty"));
        }
        Ok(())
    }

    /// Installation root, falling back to the platform default
    pub fn install_dir(&self) -> PathBuf {
        self.client
            .install_dir
            .clone()
            .unwrap_or_else(default_install_dir)
    }

    /// Resolve installation paths from these settings
    pub fn paths(&self) -> Result<InstallPaths> {
        InstallPaths::resolve(&self.install_dir(), Some(self.client.config_dir.as_str()))
    }
}

fn parse_port(name: &str, value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .map_err(|_| Error::config(format!("invalid {}{} value {:?}", ENV_PREFIX, name, value)))
}

/// Parse a permissive boolean flag (`1/true/yes/on`, `0/false/no/off`)
pub fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::validation(format!("invalid boolean value {:?}", value))),
    }
}
