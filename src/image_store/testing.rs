// Test doubles for the image store's collaborators

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::database::{CollectionSpec, ImageRecord, IndexKind, MemoryStore, Store, StoreRow};
use crate::embeddings::{Caption, Embedder};
use crate::scanner::ImageSource;
use crate::{ImageSearchError, Result};

/// In-memory store that records how it was called
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    pub creates: AtomicUsize,
    pub index_creates: AtomicUsize,
    pub text_queries: AtomicUsize,
    pub hybrid_queries: AtomicUsize,
    pub calls: AtomicUsize,
    pub upserts: Mutex<Vec<usize>>,
    /// Sleep inside `create_collection`, widening race windows
    pub create_delay: Duration,
    /// Sleep before every call
    pub stall: Duration,
    /// Fail the n-th upsert (1-based)
    pub fail_upsert: Option<usize>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_sizes(&self) -> Vec<usize> {
        self.upserts.lock().expect("upsert log lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.stall.is_zero() {
            tokio::time::sleep(self.stall).await;
        }
    }
}

#[async_trait]
impl Store for CountingStore {
    async fn has_collection(&self, name: &str) -> Result<bool> {
        self.enter().await;
        self.inner.has_collection(name).await
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        self.enter().await;
        self.creates.fetch_add(1, Ordering::SeqCst);
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        self.inner.create_collection(spec).await
    }

    async fn list_indexes(&self, name: &str) -> Result<Vec<IndexKind>> {
        self.enter().await;
        self.inner.list_indexes(name).await
    }

    async fn create_index(&self, spec: &CollectionSpec, kind: IndexKind) -> Result<()> {
        self.enter().await;
        self.index_creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_index(spec, kind).await
    }

    async fn collection_dimension(&self, name: &str) -> Result<Option<usize>> {
        self.enter().await;
        self.inner.collection_dimension(name).await
    }

    async fn upsert(&self, name: &str, records: &[ImageRecord]) -> Result<()> {
        self.enter().await;
        let attempt = {
            let mut upserts = self.upserts.lock().expect("upsert log lock");
            upserts.push(records.len());
            upserts.len()
        };
        if self.fail_upsert == Some(attempt) {
            return Err(ImageSearchError::Database("injected upsert failure".to_string()));
        }
        self.inner.upsert(name, records).await
    }

    async fn vector_query(&self, name: &str, vector: &[f32], k: usize) -> Result<Vec<StoreRow>> {
        self.enter().await;
        self.inner.vector_query(name, vector, k).await
    }

    async fn text_query(&self, name: &str, text: &str, limit: usize) -> Result<Vec<StoreRow>> {
        self.enter().await;
        self.text_queries.fetch_add(1, Ordering::SeqCst);
        self.inner.text_query(name, text, limit).await
    }

    async fn hybrid_query(
        &self,
        name: &str,
        vector: &[f32],
        text: &str,
        limit: usize,
    ) -> Result<Vec<StoreRow>> {
        self.enter().await;
        self.hybrid_queries.fetch_add(1, Ordering::SeqCst);
        self.inner.hybrid_query(name, vector, text, limit).await
    }

    async fn raw_sql(&self, statement: &str) -> Result<Vec<StoreRow>> {
        self.enter().await;
        self.inner.raw_sql(statement).await
    }

    async fn count_rows(&self, name: &str) -> Result<usize> {
        self.enter().await;
        self.inner.count_rows(name).await
    }
}

/// Embedder answering from fixed tables keyed by file name
#[derive(Default)]
pub struct FakeEmbedder {
    pub vectors: HashMap<String, Vec<f32>>,
    pub captions: HashMap<String, String>,
    pub image_embeds: AtomicUsize,
    pub caption_calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, file_name: &str, vector: Vec<f32>, caption: Option<&str>) -> Self {
        self.vectors.insert(file_name.to_string(), vector);
        if let Some(caption) = caption {
            self.captions
                .insert(file_name.to_string(), caption.to_string());
        }
        self
    }

    fn file_name(path: &Path) -> String {
        path.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed_image(&self, path: &Path) -> Result<Vec<f32>> {
        self.image_embeds.fetch_add(1, Ordering::SeqCst);
        self.vectors
            .get(&Self::file_name(path))
            .cloned()
            .ok_or_else(|| ImageSearchError::Embed(format!("cannot decode {}", path.display())))
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| ImageSearchError::Embed(format!("no vector for {:?}", text)))
    }

    async fn caption_image(&self, path: &Path) -> Caption {
        self.caption_calls.fetch_add(1, Ordering::SeqCst);
        match self.captions.get(&Self::file_name(path)) {
            Some(caption) => Caption::Text(caption.clone()),
            None => Caption::Unavailable("no caption configured".to_string()),
        }
    }
}

/// Source yielding a fixed list of paths regardless of root
pub struct FixedSource {
    pub paths: Vec<PathBuf>,
    /// Reported by `count`; defaults to the real length
    pub reported_total: Option<usize>,
}

impl FixedSource {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            paths: names
                .into_iter()
                .map(|name| PathBuf::from("/images").join(name.as_ref()))
                .collect(),
            reported_total: None,
        }
    }
}

impl ImageSource for FixedSource {
    fn count(&self, _root: &Path) -> Result<usize> {
        Ok(self.reported_total.unwrap_or(self.paths.len()))
    }

    fn scan(&self, _root: &Path) -> Result<Box<dyn Iterator<Item = PathBuf> + Send>> {
        Ok(Box::new(self.paths.clone().into_iter()))
    }
}

/// Unit vector along `axis`, offset slightly by `tilt` on the next axis
pub fn vector(dimension: usize, axis: usize, tilt: f32) -> Vec<f32> {
    let mut v = vec![0.0; dimension];
    v[axis % dimension] = 1.0;
    v[(axis + 1) % dimension] += tilt;
    v
}
