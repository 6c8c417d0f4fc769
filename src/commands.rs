use anyhow::{Context, Result};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, get_config_dir, init_config, show_config};
use crate::database::LanceStore;
use crate::embeddings::RemoteEmbedder;
use crate::image_store::{ImageStore, ImageStoreOptions};
use crate::scanner::ImageScanner;

/// Load configuration from the user's config directory
#[inline]
pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir()?;
    Config::load(config_dir)
}

/// Wire the LanceDB store, remote embedder and filesystem scanner together
#[inline]
pub async fn open_image_store(config: &Config) -> Result<ImageStore> {
    let store = LanceStore::new(config)
        .await
        .context("Failed to open vector database")?;
    let embedder = RemoteEmbedder::new(config)?;
    let scanner = ImageScanner::from_config(&config.ingest);

    Ok(ImageStore::new(
        Arc::new(store),
        Arc::new(embedder),
        Arc::new(scanner),
        ImageStoreOptions::from_config(config),
    ))
}

fn table_name<'a>(config: &'a Config, table_name: Option<&'a str>) -> &'a str {
    table_name.unwrap_or(config.store.table_name.as_str())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize results")?;
    println!("{}", json);
    Ok(())
}

/// Write a default config file, or print the active configuration
#[inline]
pub fn configure(show: bool) -> Result<()> {
    let config = load_config()?;
    if show {
        return show_config(&config);
    }

    if init_config(&config)? {
        println!("Wrote {}", config.config_file_path().display());
    } else {
        println!(
            "Configuration already exists at {}",
            config.config_file_path().display()
        );
    }
    Ok(())
}

/// Create the table and its indexes if they do not exist yet
#[inline]
pub async fn create_table(table: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let name = table_name(&config, table);
    let image_store = open_image_store(&config).await?;

    let handle = image_store.ensure_collection(name).await?;
    println!(
        "Table '{}' is ready ({} dimensions)",
        handle.name(),
        handle.dimension()
    );
    Ok(())
}

/// Check that the vector database and the embedding service respond
#[inline]
pub async fn check_connection() -> Result<()> {
    let config = load_config()?;
    let mut healthy = true;

    println!("🗄️  Vector database ({}):", config.vector_database_uri());
    match open_image_store(&config).await {
        Ok(image_store) => match image_store.check_connection().await {
            Ok(()) => println!("   ✅ Connected"),
            Err(e) => {
                healthy = false;
                println!("   ❌ Query failed - {}", e);
            }
        },
        Err(e) => {
            healthy = false;
            println!("   ❌ Failed to connect - {:#}", e);
        }
    }

    println!("🤖 Embedding service ({}):", config.embedder.base_url);
    match RemoteEmbedder::new(&config) {
        Ok(embedder) => {
            match tokio::task::spawn_blocking(move || embedder.health_check()).await? {
                Ok(()) => {
                    println!("   ✅ Connected");
                    println!("   📋 Embedding model: {}", config.embedder.embedding_model);
                    println!("   📝 Caption model: {}", config.embedder.caption_model);
                }
                Err(e) => {
                    healthy = false;
                    println!("   ❌ Unhealthy - {}", e);
                }
            }
        }
        Err(e) => {
            healthy = false;
            println!("   ❌ Invalid configuration - {:#}", e);
        }
    }

    if !healthy {
        anyhow::bail!("One or more services are unreachable");
    }
    Ok(())
}

/// Ingest every image below `dir`, then optimize the table
#[inline]
pub async fn load_images(dir: &Path, batch_size: Option<usize>, table: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let name = table_name(&config, table);
    let batch_size = batch_size.unwrap_or(config.ingest.batch_size);
    let image_store = open_image_store(&config).await?;

    let ingestion = image_store
        .load_directory(dir, name, batch_size)
        .await
        .with_context(|| format!("Failed to start loading {}", dir.display()))?;

    let bar = if console::user_attended_stderr() {
        ProgressBar::new(ingestion.total() as u64).with_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] Loading {msg}")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };

    let mut ticks = Box::pin(ingestion.into_stream());
    let mut loaded = 0;
    while let Some(tick) = ticks.next().await {
        let progress = match tick {
            Ok(progress) => progress,
            Err(e) => {
                bar.abandon();
                return Err(e).context("Loading stopped");
            }
        };

        // the up-front count may be stale
        if progress.finished as u64 > bar.length().unwrap_or(0) {
            bar.set_length(progress.finished as u64);
        }
        bar.set_position(progress.finished as u64);
        bar.set_message(progress.path.display().to_string());
        loaded = progress.finished;
    }
    bar.finish_and_clear();

    if loaded > 0 {
        info!("Optimizing table '{}'", name);
        if let Err(e) = image_store.optimize(name).await {
            warn!("Optimize after load failed: {}", e);
        }
    }

    println!("Loaded {} images into '{}'", loaded, name);
    Ok(())
}

/// Print the images closest to `image`
#[inline]
pub async fn search_image(image: &Path, top_k: Option<usize>, table: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let name = table_name(&config, table);
    let k = top_k.unwrap_or(config.search.default_limit);
    let image_store = open_image_store(&config).await?;

    let results = image_store.search_by_image(image, k, name).await?;
    print_json(&results)
}

/// Print the images whose caption matches `query`
#[inline]
pub async fn search_text(query: &str, limit: Option<usize>, table: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let name = table_name(&config, table);
    let limit = limit.unwrap_or(config.search.default_limit);
    let image_store = open_image_store(&config).await?;

    let results = image_store.search_by_caption(query, limit, name).await?;
    print_json(&results)
}

/// Options for [`search_hybrid`] beyond the query image
#[derive(Debug, Default, Clone)]
pub struct HybridArgs<'a> {
    pub limit: Option<usize>,
    pub vector_weight: Option<f32>,
    pub distance_threshold: Option<f32>,
    pub table: Option<&'a str>,
}

/// Print the fused vector and caption matches for `image`
#[inline]
pub async fn search_hybrid(image: &Path, args: HybridArgs<'_>) -> Result<()> {
    let config = load_config()?;
    let name = table_name(&config, args.table);
    let limit = args.limit.unwrap_or(config.search.default_limit);
    let vector_weight = args.vector_weight.unwrap_or(config.search.vector_weight);
    let image_store = open_image_store(&config).await?;

    let results = image_store
        .hybrid_search(image, name, limit, vector_weight, args.distance_threshold)
        .await?;
    print_json(&results)
}

/// Print row count, dimension and indexes of a table
#[inline]
pub async fn show_status(table: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let name = table_name(&config, table);
    let image_store = open_image_store(&config).await?;

    let status = image_store.status(name).await?;
    print_json(&status)
}
