// Database module
// Store abstraction shared by the LanceDB and in-memory backends

pub mod lancedb;
pub mod memory;
pub mod sql;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::image_store::key::make_key;

pub use self::lancedb::LanceStore;
pub use memory::MemoryStore;

/// Distance metric used by the vector index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Euclidean distance; backends may report it squared
    #[default]
    L2,
}

/// Secondary structures a collection can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Approximate nearest-neighbour index over the embedding column
    Vector,
    /// Inverted index over the caption column
    FullText,
}

/// Everything a backend needs to create a collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub full_text: bool,
}

impl CollectionSpec {
    /// Indexes the collection is expected to carry once fully created
    #[inline]
    pub fn required_indexes(&self) -> Vec<IndexKind> {
        let mut kinds = vec![IndexKind::Vector];
        if self.full_text {
            kinds.push(IndexKind::FullText);
        }
        kinds
    }
}

/// One indexed image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub file_name: String,
    pub file_path: String,
    /// Empty when captioning was disabled or unavailable
    pub caption: String,
    pub embedding: Vec<f32>,
}

impl ImageRecord {
    /// Composite key under which the record is upserted
    #[inline]
    pub fn key(&self) -> String {
        make_key(&self.file_name, &self.file_path)
    }
}

/// Canonical row returned by every store query.
///
/// Backends convert their native result shape into this struct before
/// returning, so nothing above the store boundary sees Arrow batches or
/// backend-specific column names.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoreRow {
    /// Composite key of the record
    pub id: String,
    pub file_name: Option<String>,
    pub file_path: Option<String>,
    pub caption: Option<String>,
    /// Vector-channel distance (lower is closer)
    pub distance: Option<f32>,
    /// Text relevance or fused rank score (higher is better)
    pub score: Option<f32>,
}

/// Vector store capability consumed by the image store.
///
/// Implementations never retry and never swallow errors; the caller decides
/// what a failure means.
#[async_trait]
pub trait Store: Send + Sync {
    /// Whether a collection with this name exists
    async fn has_collection(&self, name: &str) -> Result<bool>;

    /// Create the table for a collection. Indexes are created separately
    /// through [`Store::create_index`] so that a half-finished creation can
    /// be resumed.
    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()>;

    /// Indexes currently present on the collection
    async fn list_indexes(&self, name: &str) -> Result<Vec<IndexKind>>;

    /// Create one index on an existing collection. A backend may defer an
    /// index it cannot build yet; in that case it keeps reporting it missing.
    async fn create_index(&self, spec: &CollectionSpec, kind: IndexKind) -> Result<()>;

    /// Vector dimension of an existing collection, if the backend can tell
    async fn collection_dimension(&self, name: &str) -> Result<Option<usize>>;

    /// Insert or overwrite records by composite key
    async fn upsert(&self, name: &str, records: &[ImageRecord]) -> Result<()>;

    /// `k` nearest neighbours, ascending by distance
    async fn vector_query(&self, name: &str, vector: &[f32], k: usize) -> Result<Vec<StoreRow>>;

    /// Full-text match over captions, descending by relevance
    async fn text_query(&self, name: &str, text: &str, limit: usize) -> Result<Vec<StoreRow>>;

    /// Rank-fused vector and text query, descending by fused score
    async fn hybrid_query(
        &self,
        name: &str,
        vector: &[f32],
        text: &str,
        limit: usize,
    ) -> Result<Vec<StoreRow>>;

    /// Administrative statement from the subset described in [`sql`]
    async fn raw_sql(&self, statement: &str) -> Result<Vec<StoreRow>>;

    /// Number of records in the collection
    async fn count_rows(&self, name: &str) -> Result<usize>;

    /// Compact storage and build any deferred index
    async fn optimize(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

/// Reciprocal rank fusion constant
pub const RRF_K: f32 = 60.0;

/// Fuse two ranked row lists by reciprocal rank.
///
/// Each row contributes `1 / (RRF_K + rank)` per list it appears in. Rows are
/// merged by id, keeping the vector row's distance and the first caption
/// seen. Output is sorted by fused score, descending.
#[inline]
pub fn reciprocal_rank_fusion(
    vector_rows: Vec<StoreRow>,
    text_rows: Vec<StoreRow>,
    limit: usize,
) -> Vec<StoreRow> {
    let mut fused: Vec<StoreRow> = Vec::with_capacity(vector_rows.len() + text_rows.len());
    let mut positions = std::collections::HashMap::new();

    for (rank, row) in vector_rows.into_iter().enumerate() {
        let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
        positions.insert(row.id.clone(), fused.len());
        fused.push(StoreRow {
            score: Some(contribution),
            ..row
        });
    }

    for (rank, row) in text_rows.into_iter().enumerate() {
        let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
        if let Some(&position) = positions.get(&row.id) {
            let existing = &mut fused[position];
            existing.score = Some(existing.score.unwrap_or(0.0) + contribution);
            if existing.caption.is_none() {
                existing.caption = row.caption;
            }
        } else {
            positions.insert(row.id.clone(), fused.len());
            fused.push(StoreRow {
                distance: None,
                score: Some(contribution),
                ..row
            });
        }
    }

    fused.sort_by(|a, b| {
        b.score
            .unwrap_or(0.0)
            .total_cmp(&a.score.unwrap_or(0.0))
    });
    fused.truncate(limit);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, distance: Option<f32>, caption: Option<&str>) -> StoreRow {
        StoreRow {
            id: id.to_string(),
            caption: caption.map(str::to_string),
            distance,
            ..StoreRow::default()
        }
    }

    #[test]
    fn required_indexes_follow_full_text_flag() {
        let mut spec = CollectionSpec {
            name: "images".to_string(),
            dimension: 4,
            metric: DistanceMetric::L2,
            full_text: true,
        };
        assert_eq!(
            spec.required_indexes(),
            vec![IndexKind::Vector, IndexKind::FullText]
        );

        spec.full_text = false;
        assert_eq!(spec.required_indexes(), vec![IndexKind::Vector]);
    }

    #[test]
    fn rrf_rewards_rows_in_both_lists() {
        let vector_rows = vec![row("a", Some(0.1), None), row("b", Some(0.2), None)];
        let text_rows = vec![row("b", None, Some("dog")), row("c", None, Some("cat"))];

        let fused = reciprocal_rank_fusion(vector_rows, text_rows, 10);
        let ids: Vec<&str> = fused.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);

        let b = &fused[0];
        assert_eq!(b.distance, Some(0.2));
        assert_eq!(b.caption.as_deref(), Some("dog"));
        assert_eq!(fused[2].distance, None);
    }

    #[test]
    fn rrf_truncates() {
        let vector_rows = vec![row("a", Some(0.1), None), row("b", Some(0.2), None)];
        let fused = reciprocal_rank_fusion(vector_rows, Vec::new(), 1);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].id, "a");
    }
}
