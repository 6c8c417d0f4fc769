// Vector and caption search

use std::path::Path;

use tracing::debug;

use super::{ImageStore, SearchResult, split_key, with_timeout};
use crate::database::StoreRow;
use crate::{ImageSearchError, Result};

impl SearchResult {
    /// Build a hit from a store row, recovering name and path from the
    /// composite key when the row lacks them
    #[inline]
    pub fn from_row(row: StoreRow) -> Self {
        let (file_name, file_path) = match (row.file_name, row.file_path) {
            (Some(file_name), Some(file_path)) => (file_name, file_path),
            _ => split_key(&row.id),
        };

        Self {
            file_name,
            file_path,
            caption: row.caption,
            distance: None,
            text_score: None,
            fusion_score: None,
        }
    }

    pub(crate) fn from_vector_row(row: StoreRow) -> Self {
        let distance = row.distance;
        Self {
            distance,
            ..Self::from_row(row)
        }
    }

    pub(crate) fn from_text_row(row: StoreRow) -> Self {
        let text_score = row.score;
        Self {
            text_score,
            ..Self::from_row(row)
        }
    }

    pub(crate) fn from_fused_row(row: StoreRow) -> Self {
        let (distance, fusion_score) = (row.distance, row.score);
        Self {
            distance,
            fusion_score,
            ..Self::from_row(row)
        }
    }
}

pub(crate) fn validate_limit(limit: usize, what: &str) -> Result<()> {
    if limit == 0 {
        return Err(ImageSearchError::InvalidQuery(format!(
            "{} must be at least 1",
            what
        )));
    }
    Ok(())
}

impl ImageStore {
    /// The `k` images closest to the query image, nearest first
    #[inline]
    pub async fn search_by_image(
        &self,
        path: &Path,
        k: usize,
        collection: &str,
    ) -> Result<Vec<SearchResult>> {
        validate_limit(k, "k")?;
        let handle = self.collections.open(collection).await?;

        let embedding = self.embedder.embed_image(path).await?;
        let rows = self.nearest_rows(handle.name(), handle.dimension(), &embedding, k).await?;

        debug!("Image search returned {} results", rows.len());
        Ok(rows.into_iter().map(SearchResult::from_vector_row).collect())
    }

    /// Images whose caption matches `text`, most relevant first.
    ///
    /// Blank text matches nothing and never reaches the store.
    #[inline]
    pub async fn search_by_caption(
        &self,
        text: &str,
        limit: usize,
        collection: &str,
    ) -> Result<Vec<SearchResult>> {
        validate_limit(limit, "limit")?;
        let text = text.trim();
        if text.is_empty() {
            debug!("Empty caption query; returning no results");
            return Ok(Vec::new());
        }

        let handle = self.collections.open(collection).await?;
        let rows = self.matching_rows(handle.name(), text, limit).await?;

        debug!("Caption search for {:?} returned {} results", text, rows.len());
        Ok(rows.into_iter().map(SearchResult::from_text_row).collect())
    }

    pub(crate) async fn nearest_rows(
        &self,
        collection: &str,
        dimension: usize,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<StoreRow>> {
        if embedding.len() != dimension {
            return Err(ImageSearchError::SchemaConflict {
                collection: collection.to_string(),
                expected: dimension,
                found: embedding.len(),
            });
        }

        with_timeout(
            self.options.store_timeout,
            "vector_query",
            self.store.vector_query(collection, embedding, k),
        )
        .await
    }

    pub(crate) async fn matching_rows(
        &self,
        collection: &str,
        text: &str,
        limit: usize,
    ) -> Result<Vec<StoreRow>> {
        with_timeout(
            self.options.store_timeout,
            "text_query",
            self.store.text_query(collection, text, limit),
        )
        .await
    }
}
