use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

const ENV_BACKEND_URL: &str = "MATCHIT_BACKEND_URL";
const ENV_API_KEY: &str = "MATCHIT_API_KEY";
const ENV_ACCESS_TOKEN: &str = "MATCHIT_ACCESS_TOKEN";
const ENV_USER_ID: &str = "MATCHIT_USER_ID";
const ENV_LOG_LEVEL: &str = "MATCHIT_LOG_LEVEL";
const ENV_LOG_FORMAT: &str = "MATCHIT_LOG_FORMAT";
const ENV_POLL_INTERVAL_MS: &str = "MATCHIT_POLL_INTERVAL_MS";
const ENV_TYPING_COUNTDOWN_MS: &str = "MATCHIT_TYPING_COUNTDOWN_MS";

/// Errors raised while loading or validating a [`ClientConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported configuration format '{0}'. Use 'yaml' or 'json'.")]
    UnsupportedFormat(String),
    #[error("Invalid {name} value '{value}'")]
    InvalidEnv { name: &'static str, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, ANSI colored lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Logging settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Timings of the message reconciler.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Interval of the polling backstop.
    pub poll_interval_ms: u64,
    /// How long a peer's typing indicator stays up without a new signal.
    pub typing_countdown_ms: u64,
    /// Timeout applied to every backend request and realtime join.
    pub request_timeout_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            typing_countdown_ms: 1_800,
            request_timeout_ms: 10_000,
        }
    }
}

impl RealtimeConfig {
    /// [`poll_interval_ms`](Self::poll_interval_ms) as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// [`typing_countdown_ms`](Self::typing_countdown_ms) as a `Duration`.
    #[must_use]
    pub const fn typing_countdown(&self) -> Duration {
        Duration::from_millis(self.typing_countdown_ms)
    }

    /// [`request_timeout_ms`](Self::request_timeout_ms) as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Command-line values that win over every other configuration source.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// `--backend-url`
    pub backend_url: Option<String>,
    /// `--user`
    pub user_id: Option<Uuid>,
    /// `--log-level`
    pub log_level: Option<String>,
}

/// The main configuration structure for the `MatchIT` chat client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the backend platform (table API lives under `rest/v1/`).
    pub backend_url: String,

    /// Public (anon) API key sent with every request.
    pub api_key: String,

    /// User access token; requests fall back to the API key when absent.
    pub access_token: Option<String>,

    /// The signed-in user.
    pub user_id: Option<Uuid>,

    /// Logging settings.
    pub logging: LoggingConfig,

    /// Reconciler timings.
    pub realtime: RealtimeConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ClientConfig {
    /// Generates a default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            backend_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            access_token: None,
            user_id: None,
            logging: LoggingConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// File values win over environment variables; environment variables
    /// only fill values still at their defaults. `overrides` win over both.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when the file cannot be read or parsed, an
    /// environment variable is malformed, or the result fails validation.
    pub fn load_config(
        config_path: Option<PathBuf>,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(&path)?,
            None => Self::with_defaults(),
        };

        config.apply_env()?;

        if let Some(url) = &overrides.backend_url {
            config.backend_url.clone_from(url);
        }
        if let Some(user_id) = overrides.user_id {
            config.user_id = Some(user_id);
        }
        if let Some(level) = &overrides.log_level {
            config.logging.level.clone_from(level);
        }

        config
            .validate()
            .map_err(|errors| ConfigError::Invalid(errors.join("; ")))?;

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Ok(serde_yml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        let defaults = Self::with_defaults();

        if self.backend_url == defaults.backend_url
            && let Ok(url) = env::var(ENV_BACKEND_URL)
        {
            self.backend_url = url;
        }
        if self.api_key == defaults.api_key
            && let Ok(key) = env::var(ENV_API_KEY)
        {
            self.api_key = key;
        }
        if self.access_token.is_none()
            && let Ok(token) = env::var(ENV_ACCESS_TOKEN)
        {
            self.access_token = Some(token);
        }
        if self.user_id.is_none()
            && let Ok(value) = env::var(ENV_USER_ID)
        {
            let user_id = Uuid::parse_str(value.trim()).map_err(|_| ConfigError::InvalidEnv {
                name: ENV_USER_ID,
                value: value.clone(),
            })?;
            self.user_id = Some(user_id);
        }
        if self.logging.level == defaults.logging.level
            && let Ok(level) = env::var(ENV_LOG_LEVEL)
        {
            self.logging.level = level;
        }
        if self.logging.format == defaults.logging.format
            && let Ok(value) = env::var(ENV_LOG_FORMAT)
        {
            self.logging.format = value.parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_LOG_FORMAT,
                value: value.clone(),
            })?;
        }
        if self.realtime.poll_interval_ms == defaults.realtime.poll_interval_ms
            && let Some(ms) = read_millis(ENV_POLL_INTERVAL_MS)?
        {
            self.realtime.poll_interval_ms = ms;
        }
        if self.realtime.typing_countdown_ms == defaults.realtime.typing_countdown_ms
            && let Some(ms) = read_millis(ENV_TYPING_COUNTDOWN_MS)?
        {
            self.realtime.typing_countdown_ms = ms;
        }

        Ok(())
    }

    /// Parsed backend base URL, always ending in `/` so relative joins
    /// keep any path prefix.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when `backend_url` is not a URL.
    pub fn backend_base_url(&self) -> Result<Url, ConfigError> {
        let mut raw = self.backend_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw)
            .map_err(|err| ConfigError::Invalid(format!("backend_url '{}': {err}", self.backend_url)))
    }

    /// Validate the complete configuration.
    ///
    /// # Errors
    /// Returns every problem found, one message per entry.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(err) = self.backend_base_url() {
            errors.push(err.to_string());
        }
        if self.realtime.poll_interval_ms == 0 {
            errors.push("Invalid poll interval. Must be greater than 0.".to_string());
        }
        if self.realtime.typing_countdown_ms == 0 {
            errors.push("Invalid typing countdown. Must be greater than 0.".to_string());
        }
        if self.realtime.request_timeout_ms == 0 {
            errors.push("Invalid request timeout. Must be greater than 0.".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn read_millis(name: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
        Err(_) => Ok(None),
    }
}
