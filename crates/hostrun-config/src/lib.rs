//! Layered configuration for the hostrun service.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > TOML file > defaults

use hostrun_mcp::{LaunchDefaults, SessionSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// The default bind address.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// The default bind port.
pub const DEFAULT_PORT: u16 = 10000;

/// The default log filter.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// The default per-IP request budget.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'pretty' or 'json', got '{other}'")),
        }
    }
}

/// Resolved configuration for a hostrun process.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub security: SecurityConfig,
    pub session: SessionSettings,
    /// The TOML file that was read, if one existed.
    pub config_file: Option<PathBuf>,
    /// Problems that did not stop loading, such as an unparseable config
    /// file. Loading runs before logging is set up, so callers report these.
    pub warnings: Vec<String>,
}

/// Settings for the HTTP middleware.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub api_key: Option<String>,
    pub cors_origins: Vec<String>,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_minute: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            cors_origins: vec!["*".to_string()],
            rate_limit_enabled: true,
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
        }
    }
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub security: SecuritySection,
    #[serde(default)]
    pub mcp: McpSection,
    #[serde(default)]
    pub launch: LaunchSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecuritySection {
    pub api_key: Option<String>,
    pub cors_origins: Option<Vec<String>>,
    pub rate_limit_enabled: Option<bool>,
    pub rate_limit_per_minute: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpSection {
    pub cache_enabled: Option<bool>,
    pub cache_ttl_secs: Option<u64>,
    pub auto_cleanup: Option<bool>,
    pub idle_timeout_secs: Option<u64>,
    pub failed_grace_secs: Option<u64>,
    pub cleanup_interval_secs: Option<u64>,
    pub handshake_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub call_timeout_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchSection {
    pub npm_config_cache: Option<String>,
    pub node_path: Option<String>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config_path: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl RunnerConfig {
    /// Load configuration from the process environment and config file.
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        Self::load_from(overrides, |key| std::env::var(key).ok())
    }

    /// Load configuration, reading environment variables through `env`.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables
    /// 3. Config file (--config, else $HOSTRUN_CONFIG_DIR/config.toml,
    ///    else ~/.hostrun/config.toml)
    /// 4. Defaults
    pub fn load_from<F>(overrides: CliOverrides, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = overrides
            .config_path
            .clone()
            .unwrap_or_else(|| config_dir(&env).join("config.toml"));
        let mut warnings = Vec::new();
        let (file, config_file) = match load_settings_file(&path) {
            Ok(Some(file)) => (file, Some(path)),
            Ok(None) => (SettingsFile::default(), None),
            Err(warning) => {
                warnings.push(warning);
                (SettingsFile::default(), None)
            }
        };
        let mut config = Self::resolve(overrides, &env, file, config_file)?;
        config.warnings = warnings;
        Ok(config)
    }

    fn resolve<F>(
        overrides: CliOverrides,
        env: &F,
        file: SettingsFile,
        config_file: Option<PathBuf>,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let session = resolve_session(env, &file)?;

        let host = overrides
            .host
            .or_else(|| env("HOST"))
            .or(file.server.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = match overrides.port {
            Some(port) => port,
            None => parsed(env, "PORT")?
                .or(file.server.port)
                .unwrap_or(DEFAULT_PORT),
        };

        let log_level = overrides
            .log_level
            .or_else(|| env("LOG_LEVEL"))
            .or(file.logging.level)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let log_format = parsed(env, "LOG_FORMAT")?
            .or(file.logging.format)
            .unwrap_or_default();

        let defaults = SecurityConfig::default();
        let security = SecurityConfig {
            api_key: env("API_KEY")
                .or(file.security.api_key)
                .filter(|key| !key.is_empty()),
            cors_origins: env("CORS_ORIGINS")
                .map(|origins| split_list(&origins))
                .or(file.security.cors_origins)
                .unwrap_or(defaults.cors_origins),
            rate_limit_enabled: flag(env, "RATE_LIMIT_ENABLED")?
                .or(file.security.rate_limit_enabled)
                .unwrap_or(defaults.rate_limit_enabled),
            rate_limit_per_minute: parsed(env, "RATE_LIMIT_PER_MINUTE")?
                .or(file.security.rate_limit_per_minute)
                .unwrap_or(defaults.rate_limit_per_minute),
        };
        if security.rate_limit_per_minute == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_PER_MINUTE".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(RunnerConfig {
            host,
            port,
            log_level,
            log_format,
            security,
            session,
            config_file,
            warnings: Vec::new(),
        })
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn resolve_session<F>(env: &F, file: &SettingsFile) -> Result<SessionSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = SessionSettings::default();
    let mcp = &file.mcp;

    let secs = |key: &str, file_value: Option<u64>, default: Duration| {
        parsed::<u64, _>(env, key)
            .map(|v| v.or(file_value).map(Duration::from_secs).unwrap_or(default))
    };

    let npm_config_cache = env("NPM_CONFIG_CACHE")
        .or_else(|| file.launch.npm_config_cache.clone())
        .unwrap_or_else(|| std::env::temp_dir().join(".npm").display().to_string());
    let node_path = env("NODE_PATH").or_else(|| file.launch.node_path.clone());

    Ok(SessionSettings {
        cache_enabled: flag(env, "MCP_CACHE_ENABLED")?
            .or(mcp.cache_enabled)
            .unwrap_or(defaults.cache_enabled),
        cache_ttl: secs("MCP_CACHE_TTL", mcp.cache_ttl_secs, defaults.cache_ttl)?,
        auto_cleanup: flag(env, "MCP_AUTO_CLEANUP")?
            .or(mcp.auto_cleanup)
            .unwrap_or(defaults.auto_cleanup),
        idle_timeout: secs(
            "MCP_SESSION_TIMEOUT",
            mcp.idle_timeout_secs,
            defaults.idle_timeout,
        )?,
        failed_grace: secs(
            "MCP_FAILED_GRACE",
            mcp.failed_grace_secs,
            defaults.failed_grace,
        )?,
        cleanup_interval: secs(
            "MCP_CLEANUP_INTERVAL",
            mcp.cleanup_interval_secs,
            defaults.cleanup_interval,
        )?
        .max(Duration::from_secs(1)),
        handshake_timeout: secs(
            "MCP_HANDSHAKE_TIMEOUT",
            mcp.handshake_timeout_secs,
            defaults.handshake_timeout,
        )?,
        request_timeout: secs(
            "MCP_REQUEST_TIMEOUT",
            mcp.request_timeout_secs,
            defaults.request_timeout,
        )?,
        call_timeout: secs(
            "MCP_CALL_TIMEOUT",
            mcp.call_timeout_secs,
            defaults.call_timeout,
        )?,
        shutdown_grace: secs(
            "MCP_SHUTDOWN_GRACE",
            mcp.shutdown_grace_secs,
            defaults.shutdown_grace,
        )?,
        launch: LaunchDefaults::node(Some(npm_config_cache), node_path),
    })
}

/// Get the hostrun config directory path (~/.hostrun/).
pub fn config_dir<F>(env: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = env("HOSTRUN_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hostrun")
}

/// Load and parse a TOML settings file.
///
/// `Ok(None)` if the file does not exist; `Err` describes a file that exists
/// but could not be read or parsed.
fn load_settings_file(path: &Path) -> Result<Option<SettingsFile>, String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("Failed to read {}: {}", path.display(), e)),
    };
    toml::from_str(&content)
        .map(Some)
        .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
}

fn parsed<T, F>(env: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|raw| {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            })
        })
        .transpose()
}

fn flag<F>(env: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}' is not a boolean"),
            }),
        })
        .transpose()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
