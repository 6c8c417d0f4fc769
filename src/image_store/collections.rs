//! Lazily created, cached collections.
//!
//! The first [`CollectionManager::ensure`] for a name creates the table and
//! its indexes; later calls return the cached handle. Concurrent callers for
//! the same unseen name share a single initialization, while different names
//! never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{ImageStoreOptions, with_timeout};
use crate::database::{CollectionSpec, DistanceMetric, Store};
use crate::{ImageSearchError, Result};

/// A collection known to exist with the expected dimension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    name: String,
    dimension: usize,
}

impl CollectionHandle {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

pub struct CollectionManager {
    store: Arc<dyn Store>,
    dimension: usize,
    metric: DistanceMetric,
    full_text: bool,
    timeout: Duration,
    cells: Mutex<HashMap<String, Arc<OnceCell<CollectionHandle>>>>,
}

impl CollectionManager {
    #[inline]
    pub fn new(store: Arc<dyn Store>, options: &ImageStoreOptions) -> Self {
        Self {
            store,
            dimension: options.dimension,
            metric: options.metric,
            full_text: options.full_text,
            timeout: options.store_timeout,
            cells: Mutex::new(HashMap::new()),
        }
    }

    fn spec(&self, name: &str) -> CollectionSpec {
        CollectionSpec {
            name: name.to_string(),
            dimension: self.dimension,
            metric: self.metric,
            full_text: self.full_text,
        }
    }

    fn cell(&self, name: &str) -> Result<Arc<OnceCell<CollectionHandle>>> {
        let mut cells = self
            .cells
            .lock()
            .map_err(|_| ImageSearchError::Database("collection cache lock poisoned".to_string()))?;
        Ok(Arc::clone(cells.entry(name.to_string()).or_default()))
    }

    fn cached(&self, name: &str) -> Option<CollectionHandle> {
        self.cells
            .lock()
            .ok()
            .and_then(|cells| cells.get(name).and_then(|cell| cell.get().cloned()))
    }

    /// Create the collection and any missing index, once per name.
    ///
    /// A failed attempt leaves nothing cached, so the next call retries and
    /// picks up from whatever the store already holds.
    #[inline]
    pub async fn ensure(&self, name: &str) -> Result<CollectionHandle> {
        validate_name(name)?;

        let cell = self.cell(name)?;
        cell.get_or_try_init(|| self.initialize(name))
            .await
            .cloned()
    }

    /// Handle for an existing collection; `NotFound` when it does not exist
    #[inline]
    pub async fn open(&self, name: &str) -> Result<CollectionHandle> {
        validate_name(name)?;

        if let Some(handle) = self.cached(name) {
            return Ok(handle);
        }

        let exists = with_timeout(
            self.timeout,
            "has_collection",
            self.store.has_collection(name),
        )
        .await?;
        if !exists {
            return Err(ImageSearchError::NotFound(name.to_string()));
        }

        self.check_dimension(name).await?;
        Ok(self.handle(name))
    }

    fn handle(&self, name: &str) -> CollectionHandle {
        CollectionHandle {
            name: name.to_string(),
            dimension: self.dimension,
        }
    }

    async fn check_dimension(&self, name: &str) -> Result<()> {
        let stored = with_timeout(
            self.timeout,
            "collection_dimension",
            self.store.collection_dimension(name),
        )
        .await?;

        match stored {
            Some(found) if found != self.dimension => Err(ImageSearchError::SchemaConflict {
                collection: name.to_string(),
                expected: self.dimension,
                found,
            }),
            _ => Ok(()),
        }
    }

    async fn initialize(&self, name: &str) -> Result<CollectionHandle> {
        let spec = self.spec(name);

        let exists = with_timeout(
            self.timeout,
            "has_collection",
            self.store.has_collection(name),
        )
        .await?;

        if exists {
            debug!("Collection '{}' already exists", name);
            self.check_dimension(name).await?;
        } else {
            info!(
                "Creating collection '{}' ({} dimensions, {:?})",
                name, spec.dimension, spec.metric
            );
            with_timeout(
                self.timeout,
                "create_collection",
                self.store.create_collection(&spec),
            )
            .await?;
        }

        let present = with_timeout(self.timeout, "list_indexes", self.store.list_indexes(name))
            .await?;
        for kind in spec.required_indexes() {
            if present.contains(&kind) {
                continue;
            }
            debug!("Creating {:?} index on '{}'", kind, name);
            with_timeout(
                self.timeout,
                "create_index",
                self.store.create_index(&spec, kind),
            )
            .await?;
        }

        Ok(self.handle(name))
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ImageSearchError::InvalidQuery(
            "collection name cannot be empty".to_string(),
        ));
    }
    Ok(())
}
