use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "TERMBRIDGE_CONFIG";

/// Top-level configuration, normally loaded from `~/.termbridge/config.toml`.
///
/// Every section is optional in the file; missing fields take their defaults.
/// Environment variables are applied on top by [`Config::apply_env_overrides`].
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cli: CliConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
}

impl Config {
    /// Resolve the configuration the daemon runs with: the file named by
    /// `TERMBRIDGE_CONFIG`, else `~/.termbridge/config.toml` when present,
    /// else defaults. Environment overrides are applied last.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::read_file(Path::new(&path))?,
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::read_file(&path)?
                } else {
                    tracing::info!(path = %path.display(), "no config file found, using defaults");
                    Config::default()
                }
            }
        };
        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific path without consulting the environment.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let cfg = Self::read_file(&path.into())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in production;
    /// tests pass a closure over a map.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!(value = %port, "ignoring unparseable PORT"),
            }
        }
        if let Some(dir) = lookup("TERMBRIDGE_STATIC_DIR") {
            self.server.static_dir = if dir.is_empty() { None } else { Some(dir) };
        }
        if let Some(command) = lookup("TERMBRIDGE_COMMAND") {
            self.cli.command = command;
        }
        if let Some(args) = lookup("TERMBRIDGE_ARGS") {
            self.cli.args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(cwd) = lookup("TERMBRIDGE_CWD") {
            self.cli.cwd = if cwd.is_empty() { None } else { Some(cwd) };
        }
        if let Some(format) = lookup("TERMBRIDGE_LOG_FORMAT") {
            match format.as_str() {
                "json" => self.general.log_format = LogFormat::Json,
                "pretty" => self.general.log_format = LogFormat::Pretty,
                other => tracing::warn!(value = %other, "ignoring unknown TERMBRIDGE_LOG_FORMAT"),
            }
        }
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cli.command.trim().is_empty() {
            return Err(ConfigError::Validation("cli.command must not be empty".into()));
        }
        if self.server.port == 0 {
            return Err(ConfigError::Validation("server.port must be non-zero".into()));
        }
        self.terminal.validate()
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(cfg)
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".termbridge")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory of browser assets served for any path the API does not claim.
    #[serde(default)]
    pub static_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: None,
        }
    }
}

impl ServerConfig {
    /// `host:port`, bracketing bare IPv6 literals.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    3000
}

/// The program launched inside each session's PTY.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CliConfig {
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            cwd: None,
            term: default_term(),
            env: BTreeMap::new(),
        }
    }
}

fn default_command() -> String {
    if cfg!(windows) {
        "cmd.exe".into()
    } else {
        "/bin/sh".into()
    }
}
fn default_term() -> String {
    "xterm-256color".into()
}

/// Terminal geometry policy applied by the session bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerminalConfig {
    /// Size a session assumes before the browser reports one.
    #[serde(default = "default_initial_cols")]
    pub initial_cols: u16,
    #[serde(default = "default_initial_rows")]
    pub initial_rows: u16,
    /// Substituted for missing or non-numeric resize values.
    #[serde(default = "default_fallback_cols")]
    pub default_cols: u16,
    #[serde(default = "default_fallback_rows")]
    pub default_rows: u16,
    #[serde(default = "default_min_cols")]
    pub min_cols: u16,
    #[serde(default = "default_min_rows")]
    pub min_rows: u16,
    /// Upper bound on concurrently running PTYs across all sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            initial_cols: default_initial_cols(),
            initial_rows: default_initial_rows(),
            default_cols: default_fallback_cols(),
            default_rows: default_fallback_rows(),
            min_cols: default_min_cols(),
            min_rows: default_min_rows(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl TerminalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_cols == 0 || self.min_rows == 0 {
            return Err(ConfigError::Validation(
                "terminal.min_cols and terminal.min_rows must be at least 1".into(),
            ));
        }
        if self.default_cols < self.min_cols || self.default_rows < self.min_rows {
            return Err(ConfigError::Validation(format!(
                "terminal default size {}x{} is below the minimum {}x{}",
                self.default_cols, self.default_rows, self.min_cols, self.min_rows
            )));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Validation(
                "terminal.max_sessions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_initial_cols() -> u16 {
    100
}
fn default_initial_rows() -> u16 {
    30
}
fn default_fallback_cols() -> u16 {
    80
}
fn default_fallback_rows() -> u16 {
    24
}
fn default_min_cols() -> u16 {
    20
}
fn default_min_rows() -> u16 {
    10
}
fn default_max_sessions() -> usize {
    64
}
