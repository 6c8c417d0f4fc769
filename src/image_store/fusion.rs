//! Hybrid search: vector and caption channels combined.
//!
//! At `vector_weight` 1.0 hybrid search is plain image search and at 0.0 it
//! is caption search on the query image's own caption. In between, the
//! configured [`FusionStrategy`] decides how the channels are merged.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use super::search::validate_limit;
use super::{ImageStore, SearchResult, with_timeout};
use crate::config::FusionStrategy;
use crate::database::reciprocal_rank_fusion;
use crate::embeddings::Caption;
use crate::{ImageSearchError, Result};

/// Blend normalized vector and text scores.
///
/// Distances become similarities `1 - d / max_d` and text scores become
/// `s / max_s`, a zero maximum being treated as 1.0. Each key's fused score is
/// `w * vec_sim + (1 - w) * text_sim`, a missing channel contributing 0.
/// Output is sorted by fused score, descending, and truncated to `limit`.
#[inline]
pub fn fuse_weighted(
    vector_results: Vec<SearchResult>,
    text_results: Vec<SearchResult>,
    vector_weight: f32,
    limit: usize,
) -> Vec<SearchResult> {
    let max_distance = vector_results
        .iter()
        .filter_map(|r| r.distance)
        .fold(0.0_f32, f32::max);
    let max_score = text_results
        .iter()
        .filter_map(|r| r.text_score)
        .fold(0.0_f32, f32::max);

    let vector_similarity = |distance: f32| {
        if max_distance > 0.0 {
            1.0 - distance / max_distance
        } else {
            1.0
        }
    };
    let text_similarity = |score: f32| score / if max_score > 0.0 { max_score } else { 1.0 };

    let mut fused: Vec<SearchResult> = Vec::with_capacity(vector_results.len() + text_results.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for result in vector_results {
        let similarity = result.distance.map_or(0.0, vector_similarity);
        let key = result.key();
        if positions.contains_key(&key) {
            continue;
        }
        positions.insert(key, fused.len());
        fused.push(SearchResult {
            text_score: None,
            fusion_score: Some(vector_weight * similarity),
            ..result
        });
    }

    for result in text_results {
        let contribution = (1.0 - vector_weight) * result.text_score.map_or(0.0, text_similarity);
        match positions.get(&result.key()) {
            Some(&position) => {
                let existing = &mut fused[position];
                existing.fusion_score = Some(existing.fusion_score.unwrap_or(0.0) + contribution);
                if existing.caption.as_deref().is_none_or(str::is_empty) {
                    existing.caption = result.caption;
                }
            }
            None => {
                positions.insert(result.key(), fused.len());
                fused.push(SearchResult {
                    distance: None,
                    text_score: None,
                    fusion_score: Some(contribution),
                    ..result
                });
            }
        }
    }

    fused.sort_by(|a, b| {
        b.fusion_score
            .unwrap_or(0.0)
            .total_cmp(&a.fusion_score.unwrap_or(0.0))
    });
    fused.truncate(limit);
    fused
}

fn within_threshold(result: &SearchResult, threshold: Option<f32>) -> bool {
    match (result.distance, threshold) {
        (Some(distance), Some(threshold)) => distance <= threshold,
        _ => true,
    }
}

fn validate_hybrid(vector_weight: f32, distance_threshold: Option<f32>) -> Result<()> {
    if !vector_weight.is_finite() || !(0.0..=1.0).contains(&vector_weight) {
        return Err(ImageSearchError::InvalidQuery(format!(
            "vector weight must be between 0 and 1, got {}",
            vector_weight
        )));
    }

    if let Some(threshold) = distance_threshold {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ImageSearchError::InvalidQuery(format!(
                "distance threshold must be a non-negative number, got {}",
                threshold
            )));
        }
    }

    Ok(())
}

impl ImageStore {
    /// Search by an image's embedding and its caption at once
    ///
    /// # Arguments
    /// * `path` - Query image; embedded once and captioned once per call
    /// * `vector_weight` - Share of the vector channel, in `[0, 1]`
    /// * `distance_threshold` - Drop hits whose vector distance exceeds it
    #[inline]
    pub async fn hybrid_search(
        &self,
        path: &Path,
        collection: &str,
        limit: usize,
        vector_weight: f32,
        distance_threshold: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        validate_limit(limit, "limit")?;
        validate_hybrid(vector_weight, distance_threshold)?;

        if vector_weight >= 1.0 {
            debug!("Hybrid search at weight 1.0; using image search only");
            let mut results = self.search_by_image(path, limit, collection).await?;
            results.retain(|r| within_threshold(r, distance_threshold));
            return Ok(results);
        }

        if vector_weight <= 0.0 {
            debug!("Hybrid search at weight 0.0; using caption search only");
            self.collections.open(collection).await?;
            return match self.embedder.caption_image(path).await {
                Caption::Text(caption) => self.search_by_caption(&caption, limit, collection).await,
                Caption::Unavailable(reason) => {
                    warn!("Query image has no caption ({}); no text results", reason);
                    Ok(Vec::new())
                }
            };
        }

        let handle = self.collections.open(collection).await?;
        let (embedding, caption) = tokio::join!(
            self.embedder.embed_image(path),
            self.embedder.caption_image(path)
        );
        let embedding = embedding?;
        if let Caption::Unavailable(reason) = &caption {
            warn!("Query image has no caption ({}); vector channel only", reason);
        }
        let caption = caption.text().map(str::trim).filter(|text| !text.is_empty());

        let recall = limit.saturating_mul(self.options.recall_multiplier);
        debug!(
            "Hybrid search ({:?}) with weight {} and recall {}",
            self.options.fusion, vector_weight, recall
        );

        match self.options.fusion {
            FusionStrategy::Weighted => {
                let vector_results: Vec<SearchResult> = self
                    .nearest_rows(handle.name(), handle.dimension(), &embedding, recall)
                    .await?
                    .into_iter()
                    .map(SearchResult::from_vector_row)
                    .filter(|r| within_threshold(r, distance_threshold))
                    .collect();

                let text_results = match caption {
                    Some(text) => self
                        .matching_rows(handle.name(), text, recall)
                        .await?
                        .into_iter()
                        .map(SearchResult::from_text_row)
                        .collect(),
                    None => Vec::new(),
                };

                Ok(fuse_weighted(
                    vector_results,
                    text_results,
                    vector_weight,
                    limit,
                ))
            }
            FusionStrategy::Native => {
                let rows = match caption {
                    Some(text) => {
                        if embedding.len() != handle.dimension() {
                            return Err(ImageSearchError::SchemaConflict {
                                collection: handle.name().to_string(),
                                expected: handle.dimension(),
                                found: embedding.len(),
                            });
                        }
                        with_timeout(
                            self.options.store_timeout,
                            "hybrid_query",
                            self.store
                                .hybrid_query(handle.name(), &embedding, text, recall),
                        )
                        .await?
                    }
                    None => {
                        let vector_rows = self
                            .nearest_rows(handle.name(), handle.dimension(), &embedding, recall)
                            .await?;
                        reciprocal_rank_fusion(vector_rows, Vec::new(), recall)
                    }
                };

                let mut results: Vec<SearchResult> = rows
                    .into_iter()
                    .take(limit)
                    .map(SearchResult::from_fused_row)
                    .collect();
                results.retain(|r| within_threshold(r, distance_threshold));
                Ok(results)
            }
        }
    }
}
