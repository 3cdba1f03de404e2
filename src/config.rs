use petfeeder_core::BackendSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_HISTORY_PAGE_SIZE: usize = 5;
const DEFAULT_UPCOMING_WINDOW: usize = 2;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Backend project URL (e.g., "https://project.example.co")
    pub url: ConfigValue<Option<String>>,
    /// Public anon key of the project
    pub anon_key: ConfigValue<Option<String>>,
    pub email: ConfigValue<Option<String>>,
    #[serde(skip_serializing)]
    pub password: ConfigValue<Option<String>>,
    /// Feeding history rows per page
    pub history_page_size: ConfigValue<usize>,
    /// Number of upcoming schedules shown
    pub upcoming_window: ConfigValue<usize>,
    /// Re-open dropped change feeds
    pub reconnect: ConfigValue<bool>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct BackendSection {
    url: Option<String>,
    anon_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AccountSection {
    email: Option<String>,
    password: Option<String>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    backend: BackendSection,
    account: AccountSection,
    history_page_size: Option<usize>,
    upcoming_window: Option<usize>,
    reconnect: Option<bool>,
}

fn from_file<T>(current: &mut ConfigValue<T>, value: Option<T>) {
    if let Some(value) = value {
        *current = ConfigValue::new(value, ConfigSource::File);
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut url = ConfigValue::new(None, ConfigSource::Default);
        let mut anon_key = ConfigValue::new(None, ConfigSource::Default);
        let mut email = ConfigValue::new(None, ConfigSource::Default);
        let mut password = ConfigValue::new(None, ConfigSource::Default);
        let mut history_page_size =
            ConfigValue::new(DEFAULT_HISTORY_PAGE_SIZE, ConfigSource::Default);
        let mut upcoming_window = ConfigValue::new(DEFAULT_UPCOMING_WINDOW, ConfigSource::Default);
        let mut reconnect = ConfigValue::new(true, ConfigSource::Default);
        let mut config_file = None;

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            from_file(&mut url, file_config.backend.url.map(Some));
            from_file(&mut anon_key, file_config.backend.anon_key.map(Some));
            from_file(&mut email, file_config.account.email.map(Some));
            from_file(&mut password, file_config.account.password.map(Some));
            from_file(&mut history_page_size, file_config.history_page_size);
            from_file(&mut upcoming_window, file_config.upcoming_window);
            from_file(&mut reconnect, file_config.reconnect);
        }

        // Apply environment variable overrides
        if let Ok(value) = std::env::var("PETFEEDER_URL") {
            url = ConfigValue::new(Some(value), ConfigSource::Environment);
        }
        if let Ok(value) = std::env::var("PETFEEDER_ANON_KEY") {
            anon_key = ConfigValue::new(Some(value), ConfigSource::Environment);
        }
        if let Ok(value) = std::env::var("PETFEEDER_EMAIL") {
            email = ConfigValue::new(Some(value), ConfigSource::Environment);
        }
        if let Ok(value) = std::env::var("PETFEEDER_PASSWORD") {
            password = ConfigValue::new(Some(value), ConfigSource::Environment);
        }
        if let Ok(value) = std::env::var("PETFEEDER_HISTORY_PAGE_SIZE") {
            let size = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PETFEEDER_HISTORY_PAGE_SIZE", value))?;
            history_page_size = ConfigValue::new(size, ConfigSource::Environment);
        }

        if history_page_size.value == 0 {
            return Err(ConfigError::InvalidValue(
                "history_page_size",
                "0".to_string(),
            ));
        }

        Ok(Self {
            url,
            anon_key,
            email,
            password,
            history_page_size,
            upcoming_window,
            reconnect,
            config_file,
        })
    }

    /// Connection settings, or an error naming the first missing value.
    pub fn backend_settings(&self) -> Result<BackendSettings, ConfigError> {
        let url = self
            .url
            .value
            .clone()
            .ok_or(ConfigError::Missing("backend.url", "PETFEEDER_URL"))?;
        let anon_key = self
            .anon_key
            .value
            .clone()
            .ok_or(ConfigError::Missing("backend.anon_key", "PETFEEDER_ANON_KEY"))?;
        Ok(BackendSettings {
            url,
            anon_key,
            reconnect: self.reconnect.value,
        })
    }

    /// Email and password to sign in with.
    pub fn credentials(&self) -> Result<(String, String), ConfigError> {
        let email = self
            .email
            .value
            .clone()
            .ok_or(ConfigError::Missing("account.email", "PETFEEDER_EMAIL"))?;
        let password = self
            .password
            .value
            .clone()
            .ok_or(ConfigError::Missing("account.password", "PETFEEDER_PASSWORD"))?;
        Ok((email, password))
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/petfeeder/
    /// - macOS: ~/Library/Application Support/petfeeder/
    /// - Windows: %APPDATA%/petfeeder/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("petfeeder")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidValue(&'static str, String),
    /// Config key and environment variable of a required value
    Missing(&'static str, &'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(key, value) => {
                write!(f, "Invalid value for {}: '{}'", key, value)
            }
            ConfigError::Missing(key, env) => {
                write!(f, "Missing {} (set it in the config file or {})", key, env)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
