//! Layered configuration.
//!
//! Precedence, lowest first: built-in defaults, `.beads/claim.toml` in the
//! workspace, environment variables, then CLI flags (applied by the binary).
//! In local dev, call `dotenvy::dotenv().ok()` before [`Config::from_env`].

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::store::sqlite::DEFAULT_BUSY_TIMEOUT_MS;
use crate::workspace::BEADS_DIR;

/// File name of the optional per-workspace config, inside `.beads/`.
pub const CONFIG_FILE_NAME: &str = "claim.toml";

pub const ENV_BUSY_TIMEOUT_MS: &str = "BD_CLAIM_BUSY_TIMEOUT_MS";
pub const ENV_LOG_LEVEL: &str = "BD_CLAIM_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "BD_CLAIM_LOG_FORMAT";
pub const ENV_SKIP_VERSION_CHECK: &str = "BD_CLAIM_SKIP_VERSION_CHECK";
pub const ENV_OTEL_ENDPOINT: &str = "OTEL_ENDPOINT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub busy_timeout_ms: u64,
    pub log_level: String,
    pub log_format: LogFormat,
    pub skip_version_check: bool,
    pub otel_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            // Stdout is the result channel; stay quiet unless asked.
            log_level: "error".to_string(),
            log_format: LogFormat::Compact,
            skip_version_check: false,
            otel_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::Config(format!(
                "unknown log format {other:?}, expected \"compact\" or \"json\""
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Compact => f.write_str("compact"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// `.beads/claim.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    busy_timeout_ms: Option<u64>,
    log_level: Option<String>,
    log_format: Option<LogFormat>,
    skip_version_check: Option<bool>,
    otel_endpoint: Option<String>,
}

impl Config {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_from(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Defaults, then the workspace file (if any), then the environment.
    pub fn load(workspace_root: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(root) = workspace_root {
            let path = root.join(BEADS_DIR).join(CONFIG_FILE_NAME);
            match std::fs::read_to_string(&path) {
                Ok(raw) => config.apply_toml(&raw).map_err(|e| match e {
                    Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
                    other => other,
                })?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        config.apply_env_from(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Defaults overlaid with a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config = Self::default();
        config.apply_toml(raw)?;
        Ok(config)
    }

    fn apply_toml(&mut self, raw: &str) -> Result<()> {
        let file: FileConfig =
            toml::from_str(raw).map_err(|e| Error::Config(format!("invalid config file: {e}")))?;

        if let Some(ms) = file.busy_timeout_ms {
            self.busy_timeout_ms = ms;
        }
        if let Some(level) = file.log_level {
            self.log_level = level;
        }
        if let Some(format) = file.log_format {
            self.log_format = format;
        }
        if let Some(skip) = file.skip_version_check {
            self.skip_version_check = skip;
        }
        if file.otel_endpoint.is_some() {
            self.otel_endpoint = file.otel_endpoint;
        }
        self.validate()
    }

    /// Overlay variables resolved through `lookup`. Unset and empty
    /// variables leave the current value alone.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(raw) = var(ENV_BUSY_TIMEOUT_MS) {
            self.busy_timeout_ms = raw.trim().parse().map_err(|_| {
                Error::Config(format!("{ENV_BUSY_TIMEOUT_MS} must be a number of milliseconds, got {raw:?}"))
            })?;
        }
        if let Some(level) = var(ENV_LOG_LEVEL) {
            self.log_level = level.trim().to_string();
        }
        if let Some(raw) = var(ENV_LOG_FORMAT) {
            self.log_format = raw.parse()?;
        }
        if let Some(raw) = var(ENV_SKIP_VERSION_CHECK) {
            self.skip_version_check = parse_flag(ENV_SKIP_VERSION_CHECK, &raw)?;
        }
        if let Some(endpoint) = var(ENV_OTEL_ENDPOINT) {
            self.otel_endpoint = Some(endpoint.trim().to_string());
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.busy_timeout_ms == 0 {
            return Err(Error::Config("busy timeout must be greater than zero".to_string()));
        }
        if self.log_level.trim().is_empty() {
            return Err(Error::Config("log level cannot be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{name} must be a boolean, got {raw:?}"))),
    }
}
