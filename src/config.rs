//! Layered configuration for the relay.
//!
//! Resolution order, later layers winning:
//! defaults → `chat-relay.toml` (or `--config`) → environment → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3001
//! db_path = "data/chat.db"
//! dev = false
//!
//! [completion]
//! model = "gpt-3.5-turbo"
//! temperature = 0.7
//! base_url = "https://api.openai.com/v1"
//!
//! [logging]
//! level = "info"
//! json = false
//! dir = "logs"
//! ```
//!
//! The completion credential only comes from the environment
//! (`OPENAI_API_KEY`, `.env` supported) and is fixed for the process lifetime.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "chat-relay.toml";
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Permissive CORS for a front-end dev server on another origin.
    #[serde(default)]
    pub dev: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/chat.db")
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: default_db_path(),
            dev: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionSettings {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// When set, logs are also written to daily-rotated files here.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

/// Contents of the TOML config file. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RelayToml {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub completion: CompletionSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl RelayToml {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` if given (it must exist), else `chat-relay.toml` in the
    /// working directory if present, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

/// Fully resolved settings, fixed at start-up.
#[derive(Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub completion: CompletionSettings,
    pub logging: LoggingSettings,
    api_key: Option<String>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("server", &self.server)
            .field("completion", &self.completion)
            .field("logging", &self.logging)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Settings {
    /// Resolve from the config file and the process environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = RelayToml::load_or_default(config_path)?;
        Self::from_layers(file, |key| std::env::var(key).ok())
    }

    /// Apply environment overrides (looked up through `env`) on top of `file`.
    pub fn from_layers<F>(file: RelayToml, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let RelayToml {
            mut server,
            mut completion,
            mut logging,
        } = file;

        if let Some(host) = env("CHAT_RELAY_HOST") {
            server.host = host;
        }
        if let Some(port) = env("PORT") {
            server.port = port.parse().map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                key: "PORT",
                value: port.clone(),
                message: e.to_string(),
            })?;
        }
        if let Some(db_path) = env("DATABASE_PATH") {
            server.db_path = PathBuf::from(db_path);
        }

        if let Some(model) = env("OPENAI_MODEL") {
            completion.model = model;
        }
        if let Some(temperature) = env("OPENAI_TEMPERATURE") {
            completion.temperature =
                temperature
                    .parse()
                    .map_err(|e: std::num::ParseFloatError| ConfigError::InvalidValue {
                        key: "OPENAI_TEMPERATURE",
                        value: temperature.clone(),
                        message: e.to_string(),
                    })?;
        }
        if let Some(base_url) = env("OPENAI_BASE_URL") {
            completion.base_url = base_url;
        }

        if let Some(level) = env("CHAT_RELAY_LOG") {
            logging.level = level;
        }
        if let Some(json) = env("CHAT_RELAY_LOG_JSON") {
            logging.json = matches!(json.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        let api_key = env(API_KEY_VAR).filter(|key| !key.trim().is_empty());

        let settings = Self {
            server,
            completion,
            logging,
            api_key,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let temperature = self.completion.temperature;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidValue {
                key: "completion.temperature",
                value: temperature.to_string(),
                message: "must be between 0 and 2".into(),
            });
        }
        if self.completion.model.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "completion.model",
                value: self.completion.model.clone(),
                message: "must not be empty".into(),
            });
        }
        if !self.completion.base_url.starts_with("http://") && !self.completion.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "completion.base_url",
                value: self.completion.base_url.clone(),
                message: "must be an http(s) URL".into(),
            });
        }
        Ok(())
    }

    /// The completion credential; serving without one is a start-up error.
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or(ConfigError::MissingCredential(API_KEY_VAR))
    }
}
