// In-process store
// Keeps collections in memory; used for tests, benchmarks and dry runs

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::debug;

use super::sql::{Statement, parse_statement};
use super::{CollectionSpec, ImageRecord, IndexKind, Store, StoreRow, reciprocal_rank_fusion};
use crate::{ImageSearchError, Result};

#[derive(Debug)]
struct MemoryCollection {
    spec: CollectionSpec,
    indexes: Vec<IndexKind>,
    records: Vec<ImageRecord>,
}

/// Store backend that keeps every collection in a process-local map.
///
/// Distances are squared Euclidean, matching what LanceDB reports for its L2
/// metric. Text relevance is the number of caption tokens matching any query
/// token.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, MemoryCollection>>> {
        self.collections
            .read()
            .map_err(|_| ImageSearchError::Database("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, MemoryCollection>>> {
        self.collections
            .write()
            .map_err(|_| ImageSearchError::Database("memory store lock poisoned".to_string()))
    }

    fn row_for(record: &ImageRecord) -> StoreRow {
        StoreRow {
            id: record.key(),
            file_name: Some(record.file_name.clone()),
            file_path: Some(record.file_path.clone()),
            caption: Some(record.caption.clone()),
            distance: None,
            score: None,
        }
    }

    fn nearest(&self, name: &str, vector: &[f32], k: usize) -> Result<Vec<StoreRow>> {
        let collections = self.read()?;
        let collection = collections
            .get(name)
            .ok_or_else(|| ImageSearchError::NotFound(name.to_string()))?;

        let mut rows: Vec<StoreRow> = collection
            .records
            .iter()
            .map(|record| StoreRow {
                distance: Some(squared_l2(&record.embedding, vector)),
                ..Self::row_for(record)
            })
            .collect();

        rows.sort_by(|a, b| {
            a.distance
                .unwrap_or(f32::MAX)
                .total_cmp(&b.distance.unwrap_or(f32::MAX))
        });
        rows.truncate(k);
        Ok(rows)
    }

    fn matching(&self, name: &str, text: &str, limit: usize) -> Result<Vec<StoreRow>> {
        let collections = self.read()?;
        let collection = collections
            .get(name)
            .ok_or_else(|| ImageSearchError::NotFound(name.to_string()))?;

        let terms = tokenize(text);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows: Vec<StoreRow> = collection
            .records
            .iter()
            .filter_map(|record| {
                let hits = tokenize(&record.caption)
                    .into_iter()
                    .filter(|token| terms.contains(token))
                    .count();
                (hits > 0).then(|| StoreRow {
                    score: Some(hits as f32),
                    ..Self::row_for(record)
                })
            })
            .collect();

        rows.sort_by(|a, b| b.score.unwrap_or(0.0).total_cmp(&a.score.unwrap_or(0.0)));
        rows.truncate(limit);
        Ok(rows)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(name))
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let mut collections = self.write()?;
        if collections.contains_key(&spec.name) {
            return Err(ImageSearchError::Database(format!(
                "collection '{}' already exists",
                spec.name
            )));
        }

        debug!(
            "Creating in-memory collection '{}' ({} dimensions)",
            spec.name, spec.dimension
        );
        collections.insert(
            spec.name.clone(),
            MemoryCollection {
                spec: spec.clone(),
                indexes: Vec::new(),
                records: Vec::new(),
            },
        );
        Ok(())
    }

    async fn list_indexes(&self, name: &str) -> Result<Vec<IndexKind>> {
        self.read()?
            .get(name)
            .map(|collection| collection.indexes.clone())
            .ok_or_else(|| ImageSearchError::NotFound(name.to_string()))
    }

    async fn create_index(&self, spec: &CollectionSpec, kind: IndexKind) -> Result<()> {
        let mut collections = self.write()?;
        let collection = collections
            .get_mut(&spec.name)
            .ok_or_else(|| ImageSearchError::NotFound(spec.name.clone()))?;
        if !collection.indexes.contains(&kind) {
            collection.indexes.push(kind);
        }
        Ok(())
    }

    async fn collection_dimension(&self, name: &str) -> Result<Option<usize>> {
        Ok(self
            .read()?
            .get(name)
            .map(|collection| collection.spec.dimension))
    }

    async fn upsert(&self, name: &str, records: &[ImageRecord]) -> Result<()> {
        let mut collections = self.write()?;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| ImageSearchError::NotFound(name.to_string()))?;

        // reject the whole batch before touching any row
        let dimension = collection.spec.dimension;
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != dimension) {
            return Err(ImageSearchError::SchemaConflict {
                collection: name.to_string(),
                expected: dimension,
                found: bad.embedding.len(),
            });
        }

        for record in records {
            let key = record.key();
            match collection.records.iter_mut().find(|r| r.key() == key) {
                Some(existing) => *existing = record.clone(),
                None => collection.records.push(record.clone()),
            }
        }

        debug!("Upserted {} records into '{}'", records.len(), name);
        Ok(())
    }

    async fn vector_query(&self, name: &str, vector: &[f32], k: usize) -> Result<Vec<StoreRow>> {
        self.nearest(name, vector, k)
    }

    async fn text_query(&self, name: &str, text: &str, limit: usize) -> Result<Vec<StoreRow>> {
        self.matching(name, text, limit)
    }

    async fn hybrid_query(
        &self,
        name: &str,
        vector: &[f32],
        text: &str,
        limit: usize,
    ) -> Result<Vec<StoreRow>> {
        let vector_rows = self.nearest(name, vector, limit)?;
        let text_rows = self.matching(name, text, limit)?;
        Ok(reciprocal_rank_fusion(vector_rows, text_rows, limit))
    }

    async fn raw_sql(&self, statement: &str) -> Result<Vec<StoreRow>> {
        match parse_statement(statement)? {
            Statement::Ping => Ok(Vec::new()),
            Statement::Select {
                predicate: Some(_), ..
            } => Err(ImageSearchError::InvalidQuery(
                "the in-memory store does not evaluate WHERE clauses".to_string(),
            )),
            Statement::Select { table, limit, .. } => {
                let collections = self.read()?;
                let collection = collections
                    .get(&table)
                    .ok_or_else(|| ImageSearchError::NotFound(table.clone()))?;
                Ok(collection
                    .records
                    .iter()
                    .take(limit.unwrap_or(usize::MAX))
                    .map(Self::row_for)
                    .collect())
            }
        }
    }

    async fn count_rows(&self, name: &str) -> Result<usize> {
        self.read()?
            .get(name)
            .map(|collection| collection.records.len())
            .ok_or_else(|| ImageSearchError::NotFound(name.to_string()))
    }
}
