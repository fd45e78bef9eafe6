use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

const CONFIG_FILE_NAME: &str = "notepurge.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
    #[error("Invalid server host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub misskey: MisskeyConfig,
    pub retry: Option<RetryConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct MisskeyConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub token: String,
}

// Keeps the API token out of debug logs.
impl fmt::Debug for MisskeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MisskeyConfig")
            .field("host", &self.host)
            .field("token", &if self.token.is_empty() { "" } else { "***" })
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub fallback_wait_ms: Option<u64>,
    pub max_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

/// Values given on the command line; they win over the file and the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub token: Option<String>,
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(5),
            fallback_wait_ms: Some(10_000),
            max_wait_ms: Some(120_000),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Some("info".to_string()),
        }
    }
}

/// Build the API base endpoint `https://<host>/api/` for a bare host name.
///
/// The host must not carry a scheme, path, query or credentials.
pub fn api_endpoint(host: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidHost {
        host: host.to_string(),
        reason: reason.to_string(),
    };

    if host.is_empty() {
        return Err(invalid("host is empty"));
    }
    if host.contains("://") {
        return Err(invalid("remove the scheme, e.g. use 'misskey.io'"));
    }
    if host
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '@' | '\\'))
    {
        return Err(invalid("must be a bare host name or address"));
    }

    let url = Url::parse(&format!("https://{host}/api/"))
        .map_err(|e| invalid(&e.to_string()))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("no host name found"));
    }

    Ok(url)
}

impl Config {
    /// Load configuration from TOML file with XDG directory support, environment
    /// variable and command line overrides
    pub fn load(
        config_path: Option<PathBuf>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let config_file = match config_path {
            Some(path) => path,
            None => Self::find_config_file(),
        };

        let mut config = if config_file.exists() {
            tracing::debug!("Loading config from: {}", config_file.display());
            let content = std::fs::read_to_string(&config_file)?;
            toml::from_str::<Config>(&content)?
        } else {
            tracing::debug!("No config file found, using environment variables only");
            Config {
                misskey: MisskeyConfig::default(),
                retry: None,
                logging: None,
            }
        };

        config.apply_env_overrides()?;
        config.apply_overrides(overrides);

        if config.retry.is_none() {
            config.retry = Some(RetryConfig::default());
        }
        if config.logging.is_none() {
            config.logging = Some(LoggingConfig::default());
        }

        config.validate()?;

        Ok(config)
    }

    /// Find configuration file in the current directory, then the user config directory
    fn find_config_file() -> PathBuf {
        let current_dir_config = PathBuf::from(CONFIG_FILE_NAME);
        if current_dir_config.exists() {
            return current_dir_config;
        }

        // dirs honours XDG_CONFIG_HOME and falls back to ~/.config
        if let Some(user_config) = dirs::config_dir()
            .map(|dir| dir.join("notepurge").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
        {
            return user_config;
        }

        current_dir_config
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = env::var("NOTEPURGE_MISSKEY_HOST") {
            self.misskey.host = host;
        }
        if let Ok(token) = env::var("NOTEPURGE_MISSKEY_TOKEN") {
            self.misskey.token = token;
        }

        if let Ok(max_attempts) = env::var("NOTEPURGE_RETRY_MAX_ATTEMPTS") {
            let retry = self.retry.get_or_insert_with(RetryConfig::default);
            retry.max_attempts = Some(max_attempts.parse().map_err(|_| {
                ConfigError::InvalidValue(
                    "NOTEPURGE_RETRY_MAX_ATTEMPTS must be a valid number".to_string(),
                )
            })?);
        }
        if let Ok(fallback_wait) = env::var("NOTEPURGE_RETRY_FALLBACK_WAIT_MS") {
            let retry = self.retry.get_or_insert_with(RetryConfig::default);
            retry.fallback_wait_ms = Some(fallback_wait.parse().map_err(|_| {
                ConfigError::InvalidValue(
                    "NOTEPURGE_RETRY_FALLBACK_WAIT_MS must be a valid number".to_string(),
                )
            })?);
        }
        if let Ok(max_wait) = env::var("NOTEPURGE_RETRY_MAX_WAIT_MS") {
            let retry = self.retry.get_or_insert_with(RetryConfig::default);
            retry.max_wait_ms = Some(max_wait.parse().map_err(|_| {
                ConfigError::InvalidValue(
                    "NOTEPURGE_RETRY_MAX_WAIT_MS must be a valid number".to_string(),
                )
            })?);
        }

        if let Ok(level) = env::var("NOTEPURGE_LOG_LEVEL") {
            let logging = self.logging.get_or_insert_with(LoggingConfig::default);
            logging.level = Some(level);
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(host) = overrides.host {
            self.misskey.host = host;
        }
        if let Some(token) = overrides.token {
            self.misskey.token = token;
        }
        if let Some(max_attempts) = overrides.max_attempts {
            let retry = self.retry.get_or_insert_with(RetryConfig::default);
            retry.max_attempts = Some(max_attempts);
        }
    }

    /// Validate that all required configuration is present
    fn validate(&self) -> Result<(), ConfigError> {
        if self.misskey.host.is_empty() {
            return Err(ConfigError::MissingRequired(
                "misskey.host, --host or NOTEPURGE_MISSKEY_HOST".to_string(),
            ));
        }

        if self.misskey.token.is_empty() {
            return Err(ConfigError::MissingRequired(
                "misskey.token, --token or NOTEPURGE_MISSKEY_TOKEN".to_string(),
            ));
        }

        api_endpoint(&self.misskey.host)?;

        if let Some(ref retry) = self.retry {
            if retry.max_attempts == Some(0) {
                return Err(ConfigError::InvalidValue(
                    "retry.max_attempts must be at least 1".to_string(),
                ));
            }
            if let (Some(fallback), Some(max)) = (retry.fallback_wait_ms, retry.max_wait_ms) {
                if fallback > max {
                    return Err(ConfigError::InvalidValue(
                        "retry.fallback_wait_ms must not exceed retry.max_wait_ms".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Get the retry configuration with defaults
    pub fn retry(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    /// Get the logging configuration with defaults
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }
}
