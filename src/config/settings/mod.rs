
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::ImageSearchError;

pub const DEFAULT_TABLE_NAME: &str = "image_search";
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedder: EmbedderConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// LanceDB connection URI; the config directory's `vectors` folder when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub table_name: String,
    pub embedding_dimension: usize,
    pub timeout_seconds: u64,
    pub full_text_index: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: None,
            table_name: DEFAULT_TABLE_NAME.to_string(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            timeout_seconds: 30,
            full_text_index: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbedderConfig {
    /// Base URL of an OpenAI-compatible API
    pub base_url: String,
    pub embedding_model: String,
    pub caption_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            embedding_model: "jina-clip-v2".to_string(),
            caption_model: "llava:latest".to_string(),
            api_key: None,
            timeout_seconds: 60,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    pub batch_size: usize,
    /// Caption each image while loading so text search has something to match
    pub captions: bool,
    pub extensions: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            captions: true,
            extensions: vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()],
        }
    }
}

/// How hybrid search combines the vector and text channels
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FusionStrategy {
    /// Normalized scores blended client side by `vector_weight`
    #[default]
    Weighted,
    /// The store's own rank fusion
    Native,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    pub vector_weight: f32,
    pub recall_multiplier: usize,
    pub fusion: FusionStrategy,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            vector_weight: 0.7,
            recall_multiplier: 5,
            fusion: FusionStrategy::Weighted,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid table name: {0:?} (must be non-empty and contain only letters, digits, '_' or '-')")]
    InvalidTableName(String),
    #[error("Invalid embedding dimension: {0} (must be between 2 and 8192)")]
    InvalidEmbeddingDimension(usize),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid model name: {0:?} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid batch size: {0} (must be between 1 and 10000)")]
    InvalidBatchSize(usize),
    #[error("Invalid extension list (must name at least one extension)")]
    InvalidExtensions,
    #[error("Invalid search limit: {0} (must be at least 1)")]
    InvalidLimit(usize),
    #[error("Invalid vector weight: {0} (must be between 0.0 and 1.0)")]
    InvalidVectorWeight(f32),
    #[error("Invalid recall multiplier: {0} (must be between 1 and 100)")]
    InvalidRecallMultiplier(usize),
    #[error("Invalid value for {name}: {value}")]
    InvalidEnvironment { name: &'static str, value: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl From<ConfigError> for ImageSearchError {
    #[inline]
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl Config {
    /// Per-user configuration directory
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("image-search"))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load `config.toml` from `config_dir`, falling back to defaults when it does not
    /// exist, then apply environment overrides
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str::<Config>(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Self::default()
        };
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .apply_env_overrides()
            .context("Invalid environment override")?;
        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Override file settings from `IMG_TABLE_NAME`, `EMBEDDING_DIMENSION`, `API_KEY`
    /// and `BASE_URL`
    #[inline]
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(table_name) = env_var("IMG_TABLE_NAME") {
            self.store.table_name = table_name;
        }

        if let Some(dimension) = env_var("EMBEDDING_DIMENSION") {
            self.store.embedding_dimension =
                dimension
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnvironment {
                        name: "EMBEDDING_DIMENSION",
                        value: dimension,
                    })?;
        }

        if let Some(api_key) = env_var("API_KEY") {
            self.embedder.api_key = Some(api_key);
        }

        if let Some(base_url) = env_var("BASE_URL") {
            self.embedder.base_url = base_url;
        }

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.embedder.validate()?;
        self.ingest.validate()?;
        self.search.validate()?;
        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Connection URI for the vector database
    #[inline]
    pub fn vector_database_uri(&self) -> String {
        self.store.uri.clone().unwrap_or_else(|| {
            format!("file://{}", self.get_base_dir().join("vectors").display())
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_table_name(&self.table_name) {
            return Err(ConfigError::InvalidTableName(self.table_name.clone()));
        }

        if !(2..=8192).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        if !(1..=600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        Ok(())
    }

    pub fn set_table_name(&mut self, table_name: String) -> Result<(), ConfigError> {
        if !is_valid_table_name(&table_name) {
            return Err(ConfigError::InvalidTableName(table_name));
        }
        self.table_name = table_name;
        Ok(())
    }

    pub fn set_embedding_dimension(&mut self, dimension: usize) -> Result<(), ConfigError> {
        if !(2..=8192).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.embedding_dimension = dimension;
        Ok(())
    }
}

impl EmbedderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if self.caption_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.caption_model.clone()));
        }

        if !(1..=600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        Ok(())
    }

    /// Parsed base URL, always ending in `/` so endpoint paths join beneath it
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(self.base_url.clone()));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    pub fn set_base_url(&mut self, base_url: String) -> Result<(), ConfigError> {
        let candidate = EmbedderConfig {
            base_url: base_url.clone(),
            ..self.clone()
        };
        candidate.base_url()?;
        self.base_url = base_url;
        Ok(())
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10_000).contains(&self.batch_size) {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if self
            .extensions
            .iter()
            .all(|extension| extension.trim().is_empty())
        {
            return Err(ConfigError::InvalidExtensions);
        }

        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: usize) -> Result<(), ConfigError> {
        if !(1..=10_000).contains(&batch_size) {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_limit == 0 {
            return Err(ConfigError::InvalidLimit(self.default_limit));
        }

        if !(0.0..=1.0).contains(&self.vector_weight) {
            return Err(ConfigError::InvalidVectorWeight(self.vector_weight));
        }

        if !(1..=100).contains(&self.recall_multiplier) {
            return Err(ConfigError::InvalidRecallMultiplier(
                self.recall_multiplier,
            ));
        }

        Ok(())
    }

    pub fn set_vector_weight(&mut self, weight: f32) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&weight) {
            return Err(ConfigError::InvalidVectorWeight(weight));
        }
        self.vector_weight = weight;
        Ok(())
    }
}
