// Image store module
// Orchestrates the collection lifecycle, ingestion and the three search modes
// over injected store, embedder and image source collaborators

pub mod collections;
pub mod fusion;
pub mod ingest;
pub mod key;
pub mod search;

#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{Config, FusionStrategy};
use crate::database::{DistanceMetric, IndexKind, Store};
use crate::embeddings::Embedder;
use crate::scanner::ImageSource;
use crate::{ImageSearchError, Result};

pub use collections::{CollectionHandle, CollectionManager};
pub use fusion::fuse_weighted;
pub use ingest::{IngestProgress, Ingestion};
pub use key::{KEY_SEPARATOR, make_key, split_key};

/// Canonical search hit.
///
/// Which score is meaningful depends on the search mode: `distance` for
/// image search, `text_score` for caption search, `fusion_score` for hybrid
/// search. Unused scores serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub file_name: String,
    pub file_path: String,
    pub caption: Option<String>,
    pub distance: Option<f32>,
    pub text_score: Option<f32>,
    pub fusion_score: Option<f32>,
}

impl SearchResult {
    /// Composite key of the hit
    #[inline]
    pub fn key(&self) -> String {
        make_key(&self.file_name, &self.file_path)
    }
}

/// Settings the image store needs from the application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ImageStoreOptions {
    /// Vector dimension of newly created collections
    pub dimension: usize,
    pub metric: DistanceMetric,
    /// Create a full-text index over captions
    pub full_text: bool,
    /// Caption images during ingestion
    pub captions: bool,
    /// Upper bound for every individual store call
    pub store_timeout: Duration,
    /// Hybrid search over-fetches `limit * recall_multiplier` rows per channel
    pub recall_multiplier: usize,
    pub fusion: FusionStrategy,
}

impl Default for ImageStoreOptions {
    #[inline]
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ImageStoreOptions {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            dimension: config.store.embedding_dimension,
            metric: DistanceMetric::L2,
            full_text: config.store.full_text_index,
            captions: config.ingest.captions,
            store_timeout: Duration::from_secs(config.store.timeout_seconds),
            recall_multiplier: config.search.recall_multiplier.max(1),
            fusion: config.search.fusion,
        }
    }
}

/// Summary of one collection, as reported by `status`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStatus {
    pub name: String,
    pub rows: usize,
    pub dimension: Option<usize>,
    pub indexes: Vec<IndexKind>,
}

/// Image indexing and search over pluggable collaborators
pub struct ImageStore {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    source: Arc<dyn ImageSource>,
    options: ImageStoreOptions,
    collections: CollectionManager,
}

impl ImageStore {
    #[inline]
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        source: Arc<dyn ImageSource>,
        options: ImageStoreOptions,
    ) -> Self {
        let collections = CollectionManager::new(Arc::clone(&store), &options);
        Self {
            store,
            embedder,
            source,
            options,
            collections,
        }
    }

    #[inline]
    pub fn options(&self) -> &ImageStoreOptions {
        &self.options
    }

    #[inline]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Create the collection and its indexes if needed
    #[inline]
    pub async fn ensure_collection(&self, name: &str) -> Result<CollectionHandle> {
        self.collections.ensure(name).await
    }

    /// Look up an existing collection without creating it
    #[inline]
    pub async fn open_collection(&self, name: &str) -> Result<CollectionHandle> {
        self.collections.open(name).await
    }

    /// Probe the store with `SELECT 1`
    #[inline]
    pub async fn check_connection(&self) -> Result<()> {
        with_timeout(
            self.options.store_timeout,
            "connection check",
            self.store.raw_sql("SELECT 1"),
        )
        .await?;
        debug!("Store connection check passed");
        Ok(())
    }

    /// Row count, dimension and indexes of an existing collection
    #[inline]
    pub async fn status(&self, name: &str) -> Result<CollectionStatus> {
        let handle = self.collections.open(name).await?;
        let timeout = self.options.store_timeout;

        let rows = with_timeout(timeout, "count rows", self.store.count_rows(name)).await?;
        let indexes = with_timeout(timeout, "list indexes", self.store.list_indexes(name)).await?;

        Ok(CollectionStatus {
            name: handle.name().to_string(),
            rows,
            dimension: Some(handle.dimension()),
            indexes,
        })
    }

    /// Compact the collection and build any index that was waiting for data
    #[inline]
    pub async fn optimize(&self, name: &str) -> Result<()> {
        self.collections.open(name).await?;
        with_timeout(
            self.options.store_timeout,
            "optimize",
            self.store.optimize(name),
        )
        .await
    }
}

/// Bound a store call by `limit`; expiry is reported as the store being
/// unavailable and is never retried
pub(crate) async fn with_timeout<T, F>(limit: Duration, action: &str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Store call '{}' timed out after {:?}", action, limit);
            Err(ImageSearchError::StoreUnavailable(format!(
                "{} timed out after {:?}",
                action, limit
            )))
        }
    }
}
