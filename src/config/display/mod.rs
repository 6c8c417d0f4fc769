
use anyhow::{Context, Result};
use console::style;

use super::Config;

/// Write the current settings to `config.toml` unless a file already exists
///
/// Returns whether a new file was written.
#[inline]
pub fn init_config(config: &Config) -> Result<bool> {
    let config_path = config.config_file_path();
    if config_path.exists() {
        eprintln!(
            "{}",
            style("Found existing configuration, leaving it untouched.").green()
        );
        return Ok(false);
    }

    config.save().context("Failed to write default configuration")?;
    eprintln!("{}", style("✓ Configuration saved successfully!").green());
    eprintln!("Edit {} to change settings.", config_path.display());
    Ok(true)
}

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());

    for (section, entries) in config_sections(config) {
        eprintln!();
        eprintln!("{}", style(section).bold().yellow());
        for (label, value) in entries {
            eprintln!("  {}: {}", label, style(value).cyan());
        }
    }

    eprintln!();
    match config.embedder.base_url() {
        Ok(url) => eprintln!("  Embedding API: {}", style(url).cyan()),
        Err(e) => eprintln!("  Embedding API: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

type Section = (&'static str, Vec<(&'static str, String)>);

/// Settings grouped the way `show_config` prints them; secrets are masked
fn config_sections(config: &Config) -> Vec<Section> {
    let api_key = match &config.embedder.api_key {
        Some(key) if !key.is_empty() => "********".to_string(),
        _ => "(not set)".to_string(),
    };

    vec![
        (
            "Store Settings:",
            vec![
                ("URI", config.vector_database_uri()),
                ("Table", config.store.table_name.clone()),
                ("Dimension", config.store.embedding_dimension.to_string()),
                ("Timeout (s)", config.store.timeout_seconds.to_string()),
                ("Full-text Index", config.store.full_text_index.to_string()),
            ],
        ),
        (
            "Embedder Settings:",
            vec![
                ("Base URL", config.embedder.base_url.clone()),
                ("Embedding Model", config.embedder.embedding_model.clone()),
                ("Caption Model", config.embedder.caption_model.clone()),
                ("API Key", api_key),
                ("Timeout (s)", config.embedder.timeout_seconds.to_string()),
                ("Retries", config.embedder.retry_attempts.to_string()),
            ],
        ),
        (
            "Ingest Settings:",
            vec![
                ("Batch Size", config.ingest.batch_size.to_string()),
                ("Captions", config.ingest.captions.to_string()),
                ("Extensions", config.ingest.extensions.join(", ")),
            ],
        ),
        (
            "Search Settings:",
            vec![
                ("Default Limit", config.search.default_limit.to_string()),
                ("Vector Weight", config.search.vector_weight.to_string()),
                (
                    "Recall Multiplier",
                    config.search.recall_multiplier.to_string(),
                ),
                ("Fusion", format!("{:?}", config.search.fusion).to_lowercase()),
            ],
        ),
    ]
}
