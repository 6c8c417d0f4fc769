// Configuration management module
// TOML settings file, environment overrides and their display

pub mod display;
pub mod settings;

pub use display::{init_config, show_config};
pub use settings::{
    Config, ConfigError, EmbedderConfig, FusionStrategy, IngestConfig, SearchConfig, StoreConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
