//! Configuration
//!
//! Resolved in three layers, later ones winning: built-in defaults, an
//! optional TOML file, then environment variables (a `.env` file is loaded
//! into the environment by the binary before this runs).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::throttle::RetryPolicy;

/// Used when `--config` is not given and the file exists.
pub const DEFAULT_CONFIG_FILE: &str = "arbolado.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Read config {path} failed: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Parse config {path} failed: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: '{value}'")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub uri: String,
    pub database: String,
    pub server_selection_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017/arbolado".to_string(),
            database: "arbolado".to_string(),
            server_selection_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    pub max_in_flight: usize,
    pub min_interval_ms: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            min_interval_ms: 500,
            max_retries: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 4000,
        }
    }
}

impl BulkConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub root: PathBuf,
    /// Defaults to a `file://` URL of the absolute `root`.
    pub public_base_url: Option<String>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("images"),
            public_base_url: None,
        }
    }
}

impl ImageConfig {
    pub fn base_url(&self) -> String {
        match &self.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let root = std::path::absolute(&self.root).unwrap_or_else(|_| self.root.clone());
                let root = root.to_string_lossy().replace('\\', "/");
                let root = root.trim_end_matches('/');
                if root.starts_with('/') {
                    format!("file://{root}")
                } else {
                    format!("file:///{root}")
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub classifier: ClassifierConfig,
    pub bulk: BulkConfig,
    pub images: ImageConfig,
}

impl Config {
    /// Explicit `path` must exist; otherwise `arbolado.toml` is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Config::default(),
        };

        config.apply_env(|key: &str| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str, path: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let path_str = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path_str.clone(),
            source,
        })?;
        tracing::debug!(path = %path_str, "Loaded config file");
        Self::from_toml(&content, &path_str)
    }

    /// Overrides from environment variables; `lookup` is `std::env::var` outside tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(uri) = lookup("MONGO_URI") {
            self.store.uri = uri;
        }
        if let Some(database) = lookup("ARBOLADO_DB") {
            self.store.database = database;
        }
        if let Some(endpoint) = lookup("ARBOLADO_CLASSIFIER_URL") {
            self.classifier.endpoint = endpoint;
        }
        if let Some(key) = lookup("ARBOLADO_CLASSIFIER_KEY") {
            self.classifier.api_key = Some(key);
        }
        if let Some(value) = lookup("ARBOLADO_CLASSIFIER_TIMEOUT_SECS") {
            self.classifier.timeout_secs = parse_env("ARBOLADO_CLASSIFIER_TIMEOUT_SECS", value)?;
        }
        if let Some(value) = lookup("ARBOLADO_MAX_IN_FLIGHT") {
            self.bulk.max_in_flight = parse_env("ARBOLADO_MAX_IN_FLIGHT", value)?;
        }
        if let Some(value) = lookup("ARBOLADO_MIN_INTERVAL_MS") {
            self.bulk.min_interval_ms = parse_env("ARBOLADO_MIN_INTERVAL_MS", value)?;
        }
        if let Some(value) = lookup("ARBOLADO_MAX_RETRIES") {
            self.bulk.max_retries = parse_env("ARBOLADO_MAX_RETRIES", value)?;
        }
        if let Some(root) = lookup("ARBOLADO_IMAGE_ROOT") {
            self.images.root = PathBuf::from(root);
        }
        if let Some(url) = lookup("ARBOLADO_IMAGE_BASE_URL") {
            self.images.public_base_url = Some(url);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bulk.max_in_flight == 0 {
            return Err(ConfigError::Invalid("bulk.max_in_flight must be at least 1".into()));
        }
        if self.bulk.initial_backoff_ms > self.bulk.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "bulk.initial_backoff_ms exceeds bulk.max_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    /// Commands that call the classifier need an endpoint.
    pub fn validate_classifier(&self) -> Result<(), ConfigError> {
        if self.classifier.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "classifier endpoint not configured. Set ARBOLADO_CLASSIFIER_URL or \
                 [classifier] endpoint in arbolado.toml"
                    .into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}
