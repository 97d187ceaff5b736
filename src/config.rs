//! Configuration management.
//!
//! Configuration can be set via environment variables:
//! - `OPENROUTER_API_KEY` - Required. Your OpenRouter API key.
//! - `DEFAULT_MODEL` - Optional. Model used for all four roles. Defaults to `openai/gpt-4o-mini`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `MAX_RETAINED_TASKS` - Optional. Terminal tasks kept in memory. Defaults to `1000`.
//! - `BROWSER` - Optional. Browser the execution process drives. Defaults to `chromium`.
//! - `HEADLESS` - Optional. Run the browser headless. Defaults to `true`.
//! - `EXEC_PORT` - Optional. Port the execution process listens on. Defaults to `3456`.
//! - `EXEC_PATH` - Optional. Path override for the execution-process binary.
//! - `EXEC_PROFILE_DIR` - Optional. Browser user-profile directory.
//! - `VISION_MODE` - Optional. Expose the vision action set. Defaults to `false`.
//! - `TOOL_TIMEOUT_SECS` - Optional. Per-tool wire call timeout. Defaults to `30`.
//! - `STARTUP_TIMEOUT_SECS` - Optional. Execution-process readiness timeout. Defaults to `20`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Default name of the execution-process binary, resolved via PATH unless
/// `EXEC_PATH` overrides it.
pub const DEFAULT_EXEC_BINARY: &str = "browser-agent";

/// Configuration for the supervised execution process.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Browser the execution process automates (chromium, firefox, webkit)
    pub browser: String,

    /// Run the browser without a visible window
    pub headless: bool,

    /// Port the execution process serves its tool API on
    pub port: u16,

    /// Path override for the execution-process binary
    pub executable: Option<PathBuf>,

    /// Browser user-profile directory, if persistence is wanted
    pub profile_dir: Option<PathBuf>,

    /// Expose the vision action set in addition to the base set
    pub vision: bool,

    /// Timeout for a single tool wire call
    pub tool_timeout: Duration,

    /// How long to wait for the readiness marker after spawning
    pub startup_timeout: Duration,
}

impl ExecConfig {
    /// Tool API endpoint derived from the configured port.
    pub fn base_endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Binary to spawn, honoring the path override.
    pub fn binary(&self) -> PathBuf {
        self.executable
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EXEC_BINARY))
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            browser: "chromium".to_string(),
            headless: true,
            port: 3456,
            executable: None,
            profile_dir: None,
            vision: false,
            tool_timeout: Duration::from_secs(30),
            startup_timeout: Duration::from_secs(20),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenRouter API key
    pub api_key: String,

    /// Model used for all four role agents
    pub default_model: String,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Terminal tasks retained in memory before oldest-first eviction
    pub max_retained_tasks: usize,

    /// Execution-process configuration
    pub exec: ExecConfig,
}

fn parse_env<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e)))
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// `ConfigError::MissingEnvVar` if `OPENROUTER_API_KEY` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let default_model =
            std::env::var("DEFAULT_MODEL").unwrap_or_else(|_| "openai/gpt-4o-mini".to_string());

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_env("PORT", "3000")?;
        let max_retained_tasks = parse_env("MAX_RETAINED_TASKS", "1000")?;

        let exec = ExecConfig {
            browser: std::env::var("BROWSER").unwrap_or_else(|_| "chromium".to_string()),
            headless: env_flag("HEADLESS", true),
            port: parse_env("EXEC_PORT", "3456")?,
            executable: std::env::var("EXEC_PATH").ok().map(PathBuf::from),
            profile_dir: std::env::var("EXEC_PROFILE_DIR").ok().map(PathBuf::from),
            vision: env_flag("VISION_MODE", false),
            tool_timeout: Duration::from_secs(parse_env("TOOL_TIMEOUT_SECS", "30")?),
            startup_timeout: Duration::from_secs(parse_env("STARTUP_TIMEOUT_SECS", "20")?),
        };

        Ok(Self {
            api_key,
            default_model,
            host,
            port,
            max_retained_tasks,
            exec,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, default_model: String) -> Self {
        Self {
            api_key,
            default_model,
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_retained_tasks: 1000,
            exec: ExecConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_endpoint_uses_configured_port() {
        let exec = ExecConfig {
            port: 4100,
            ..ExecConfig::default()
        };
        assert_eq!(exec.base_endpoint(), "http://127.0.0.1:4100");
    }

    #[test]
    fn binary_override_wins() {
        let mut exec = ExecConfig::default();
        assert_eq!(exec.binary(), PathBuf::from(DEFAULT_EXEC_BINARY));

        exec.executable = Some(PathBuf::from("/opt/bin/browser-agent"));
        assert_eq!(exec.binary(), PathBuf::from("/opt/bin/browser-agent"));
    }
}
