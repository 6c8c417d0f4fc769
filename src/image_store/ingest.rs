//! Batched, streaming ingestion of a directory of images.
//!
//! An [`Ingestion`] pulls paths from an [`ImageSource`], embeds (and
//! optionally captions) each image, and upserts records in batches. It yields
//! one [`IngestProgress`] per accumulated record. The upsert of a full batch
//! runs in the background while the next records are embedded; upserts
//! themselves never overlap and are applied in source order.

use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ImageStore, with_timeout};
use crate::database::{ImageRecord, Store};
use crate::embeddings::{Caption, Embedder};
use crate::scanner::ImageSource;
use crate::{ImageSearchError, Result};

/// Progress tick emitted after each record is accumulated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestProgress {
    pub finished: usize,
    /// Number of paths the source reported up front; may be inaccurate
    pub total: usize,
    /// Image that was just processed
    pub path: PathBuf,
}

impl IngestProgress {
    /// Completed share in `[0, 1]`, tolerant of an inaccurate `total`
    #[inline]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.finished as f64 / self.total as f64).min(1.0)
    }
}

impl ImageStore {
    /// Start ingesting every image below `root` into `collection`.
    ///
    /// The collection is created if needed before the first path is read.
    /// Drive the returned [`Ingestion`] to do the work.
    #[inline]
    pub async fn load_directory(
        &self,
        root: &Path,
        collection: &str,
        batch_size: usize,
    ) -> Result<Ingestion> {
        if batch_size == 0 {
            return Err(ImageSearchError::InvalidQuery(
                "batch size must be at least 1".to_string(),
            ));
        }

        let handle = self.collections.ensure(collection).await?;

        let source = Arc::clone(&self.source);
        let count_root = root.to_path_buf();
        let total = match tokio::task::spawn_blocking(move || source.count(&count_root)).await {
            Ok(Ok(total)) => total,
            Ok(Err(e)) => {
                warn!("Could not count images in {}: {}", root.display(), e);
                0
            }
            Err(e) => {
                warn!("Image count task failed: {}", e);
                0
            }
        };

        let paths = self.source.scan(root)?;
        info!(
            "Loading {} images from {} into '{}' (batch size {})",
            total,
            root.display(),
            collection,
            batch_size
        );

        Ok(Ingestion {
            collection: handle.name().to_string(),
            dimension: handle.dimension(),
            store: Arc::clone(&self.store),
            embedder: Arc::clone(&self.embedder),
            captions: self.options.captions,
            timeout: self.options.store_timeout,
            batch_size,
            paths,
            total,
            finished: 0,
            batch: Vec::with_capacity(batch_size),
            in_flight: None,
            done: false,
        })
    }
}

/// A running ingestion; see the module docs
///
/// Dropping it between ticks keeps every batch already handed to the store
/// (an upsert in progress completes in the background) and discards the
/// partially filled batch.
pub struct Ingestion {
    collection: String,
    dimension: usize,
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    captions: bool,
    timeout: Duration,
    batch_size: usize,
    paths: Box<dyn Iterator<Item = PathBuf> + Send>,
    total: usize,
    finished: usize,
    batch: Vec<ImageRecord>,
    in_flight: Option<JoinHandle<Result<()>>>,
    done: bool,
}

impl Ingestion {
    /// Number of images the source reported
    #[inline]
    pub fn total(&self) -> usize {
        self.total
    }

    /// Records accumulated so far
    #[inline]
    pub fn finished(&self) -> usize {
        self.finished
    }

    /// Process the next image.
    ///
    /// Returns `None` once every record has been committed. After an error
    /// the run is over and further calls return `None`.
    #[inline]
    pub async fn next_tick(&mut self) -> Option<Result<IngestProgress>> {
        if self.done {
            return None;
        }

        match self.step().await {
            Ok(Some(progress)) => Some(Ok(progress)),
            Ok(None) => {
                self.done = true;
                info!(
                    "Finished loading {} images into '{}'",
                    self.finished, self.collection
                );
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }

    /// Drive the ingestion as a stream of progress ticks
    #[inline]
    pub fn into_stream(self) -> impl Stream<Item = Result<IngestProgress>> + Send {
        futures::stream::unfold(self, |mut ingestion| async move {
            let tick = ingestion.next_tick().await?;
            Some((tick, ingestion))
        })
    }

    async fn step(&mut self) -> Result<Option<IngestProgress>> {
        // surface a failed background upsert before reporting more progress
        if self.in_flight.as_ref().is_some_and(JoinHandle::is_finished) {
            self.wait_in_flight().await?;
        }

        let Some(path) = self.paths.next() else {
            self.flush().await?;
            self.wait_in_flight().await?;
            return Ok(None);
        };

        let record = Self::build_record(&self.embedder, self.captions, &path).await?;
        if record.embedding.len() != self.dimension {
            return Err(ImageSearchError::SchemaConflict {
                collection: self.collection.clone(),
                expected: self.dimension,
                found: record.embedding.len(),
            });
        }

        self.batch.push(record);
        self.finished += 1;

        if self.batch.len() >= self.batch_size {
            self.flush().await?;
        }

        Ok(Some(IngestProgress {
            finished: self.finished,
            total: self.total,
            path,
        }))
    }

    async fn build_record(
        embedder: &Arc<dyn Embedder>,
        captions: bool,
        path: &Path,
    ) -> Result<ImageRecord> {
        let caption = async {
            if !captions {
                return String::new();
            }
            let caption = embedder.caption_image(path).await;
            if let Caption::Unavailable(reason) = &caption {
                warn!("No caption for {}: {}", path.display(), reason);
            }
            caption.into_stored()
        };

        let (embedding, caption) = tokio::join!(embedder.embed_image(path), caption);

        Ok(ImageRecord {
            file_name: path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
            file_path: path.to_string_lossy().to_string(),
            caption,
            embedding: embedding?,
        })
    }

    /// Hand the current batch to the store once the previous upsert is done
    async fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }

        self.wait_in_flight().await?;

        let records = mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        let store = Arc::clone(&self.store);
        let collection = self.collection.clone();
        let timeout = self.timeout;

        debug!("Upserting batch of {} into '{}'", records.len(), collection);
        self.in_flight = Some(tokio::spawn(async move {
            with_timeout(timeout, "upsert", store.upsert(&collection, &records)).await
        }));
        Ok(())
    }

    async fn wait_in_flight(&mut self) -> Result<()> {
        match self.in_flight.take() {
            Some(task) => task.await.map_err(|e| {
                ImageSearchError::Database(format!("Upsert task failed: {}", e))
            })?,
            None => Ok(()),
        }
    }
}
