
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, Float64Array, RecordBatchIterator, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::index::Index;
use lancedb::index::scalar::FullTextSearchQuery;
use lancedb::index::vector::IvfHnswSqIndexBuilder;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use tracing::{debug, info, warn};

use super::{
    CAPTION_COLUMN, DISTANCE_COLUMN, FILE_NAME_COLUMN, FILE_PATH_COLUMN, ID_COLUMN,
    MIN_ROWS_FOR_VECTOR_INDEX, SCORE_COLUMN, VECTOR_COLUMN,
};
use crate::config::Config;
use crate::database::sql::{Statement, parse_statement};
use crate::database::{
    CollectionSpec, ImageRecord, IndexKind, Store, StoreRow, reciprocal_rank_fusion,
};
use crate::{ImageSearchError, Result};

/// Vector store backed by an embedded LanceDB database
pub struct LanceStore {
    connection: Connection,
    uri: String,
    /// Indexes requested while the table was too small to build them
    deferred: Mutex<HashMap<String, Vec<IndexKind>>>,
}

/// Map a LanceDB error, keeping missing tables distinguishable
fn store_error(action: &str, error: lancedb::Error) -> ImageSearchError {
    match error {
        lancedb::Error::TableNotFound { name, .. } => ImageSearchError::NotFound(name),
        other => ImageSearchError::Database(format!("Failed to {}: {}", action, other)),
    }
}

impl LanceStore {
    /// Open the database configured for this installation
    ///
    /// # Arguments
    /// * `config` - Application configuration containing the store location
    #[inline]
    pub async fn new(config: &Config) -> Result<Self> {
        let uri = config.vector_database_uri();
        if let Some(path) = uri.strip_prefix("file://") {
            std::fs::create_dir_all(path).map_err(|e| {
                ImageSearchError::Database(format!(
                    "Failed to create vector database directory: {}",
                    e
                ))
            })?;
        }
        Self::connect(&uri).await
    }

    /// Open a database stored under a local directory
    #[inline]
    pub async fn open_path(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        Self::connect(&format!("file://{}", path.display())).await
    }

    /// Connect to a LanceDB URI
    #[inline]
    pub async fn connect(uri: &str) -> Result<Self> {
        debug!("Connecting to LanceDB at {}", uri);

        let connection = lancedb::connect(uri).execute().await.map_err(|e| {
            ImageSearchError::StoreUnavailable(format!("Failed to connect to LanceDB: {}", e))
        })?;

        info!("Vector store connected at {}", uri);
        Ok(Self {
            connection,
            uri: uri.to_string(),
            deferred: Mutex::new(HashMap::new()),
        })
    }

    /// URI the store is connected to
    #[inline]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    async fn table(&self, name: &str) -> Result<Table> {
        self.connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| store_error("open table", e))
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        self.connection.table_names().execute().await.map_err(|e| {
            ImageSearchError::StoreUnavailable(format!("Failed to list tables: {}", e))
        })
    }

    /// Create schema with the specified vector dimension
    fn create_schema(vector_dim: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new(ID_COLUMN, DataType::Utf8, false),
            Field::new(
                VECTOR_COLUMN,
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    vector_dim as i32,
                ),
                false,
            ),
            Field::new(FILE_NAME_COLUMN, DataType::Utf8, false),
            Field::new(FILE_PATH_COLUMN, DataType::Utf8, false),
            Field::new(CAPTION_COLUMN, DataType::Utf8, false),
        ]))
    }

    /// Create a RecordBatch from image records
    fn create_record_batch(
        records: &[&ImageRecord],
        vector_dim: usize,
    ) -> Result<RecordBatch> {
        let len = records.len();

        let mut ids = Vec::with_capacity(len);
        let mut file_names = Vec::with_capacity(len);
        let mut file_paths = Vec::with_capacity(len);
        let mut captions = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * vector_dim);

        for record in records {
            ids.push(record.key());
            file_names.push(record.file_name.as_str());
            file_paths.push(record.file_path.as_str());
            captions.push(record.caption.as_str());
            flat_values.extend_from_slice(&record.embedding);
        }

        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array =
            FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(values_array), None)
                .map_err(|e| {
                    ImageSearchError::Database(format!("Failed to create vector array: {}", e))
                })?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(file_names)),
            Arc::new(StringArray::from(file_paths)),
            Arc::new(StringArray::from(captions)),
        ];

        RecordBatch::try_new(Self::create_schema(vector_dim), arrays).map_err(|e| {
            ImageSearchError::Database(format!("Failed to create record batch: {}", e))
        })
    }

    /// Columns fetched by queries; the embedding itself is never read back
    fn result_columns() -> Select {
        Select::columns(&[ID_COLUMN, FILE_NAME_COLUMN, FILE_PATH_COLUMN, CAPTION_COLUMN])
    }

    /// Drain a result stream into canonical rows
    async fn collect_rows(
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<StoreRow>> {
        let mut rows = Vec::new();

        while let Some(batch) = results.try_next().await.map_err(|e| {
            ImageSearchError::Database(format!("Failed to read result stream: {}", e))
        })? {
            rows.extend(Self::parse_batch(&batch)?);
        }

        debug!("Parsed {} rows from result stream", rows.len());
        Ok(rows)
    }

    /// Parse a single record batch. Only the id column is mandatory; rows
    /// without name or path columns are resolved from the id upstream.
    fn parse_batch(batch: &RecordBatch) -> Result<Vec<StoreRow>> {
        let ids = batch
            .column_by_name(ID_COLUMN)
            .ok_or_else(|| ImageSearchError::Database("Missing id column".to_string()))?
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| ImageSearchError::Database("Invalid id column type".to_string()))?;

        let file_names = string_column(batch, FILE_NAME_COLUMN);
        let file_paths = string_column(batch, FILE_PATH_COLUMN);
        let captions = string_column(batch, CAPTION_COLUMN);
        let distances = float_column(batch, DISTANCE_COLUMN);
        let scores = float_column(batch, SCORE_COLUMN);

        Ok((0..batch.num_rows())
            .map(|row| StoreRow {
                id: ids.value(row).to_string(),
                file_name: string_value(file_names, row),
                file_path: string_value(file_paths, row),
                caption: string_value(captions, row),
                distance: distances.as_ref().and_then(|values| values[row]),
                score: scores.as_ref().and_then(|values| values[row]),
            })
            .collect())
    }

    fn defer_index(&self, name: &str, kind: IndexKind) {
        if let Ok(mut deferred) = self.deferred.lock() {
            let kinds = deferred.entry(name.to_string()).or_default();
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
    }

    fn deferred_indexes(&self, name: &str) -> Vec<IndexKind> {
        self.deferred
            .lock()
            .map(|deferred| deferred.get(name).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn clear_deferred(&self, name: &str, kind: IndexKind) {
        if let Ok(mut deferred) = self.deferred.lock() {
            if let Some(kinds) = deferred.get_mut(name) {
                kinds.retain(|k| *k != kind);
            }
        }
    }

    /// Build one index if the table holds enough rows for it.
    ///
    /// Returns whether the index was built.
    async fn build_index(&self, table: &Table, kind: IndexKind, rows: usize) -> Result<bool> {
        let (column, index) = match kind {
            IndexKind::Vector => {
                if rows < MIN_ROWS_FOR_VECTOR_INDEX {
                    return Ok(false);
                }
                (
                    VECTOR_COLUMN,
                    Index::IvfHnswSq(
                        IvfHnswSqIndexBuilder::default().distance_type(DistanceType::L2),
                    ),
                )
            }
            IndexKind::FullText => {
                if rows == 0 {
                    return Ok(false);
                }
                (CAPTION_COLUMN, Index::FTS(Default::default()))
            }
        };

        table
            .create_index(&[column], index)
            .execute()
            .await
            .map_err(|e| store_error("create index", e))?;

        info!("Created {:?} index on {}.{}", kind, table.name(), column);
        Ok(true)
    }

    /// Try every deferred index for a table; failures are logged, not raised
    async fn build_deferred_indexes(&self, table: &Table) {
        let name = table.name().to_string();
        let pending = self.deferred_indexes(&name);
        if pending.is_empty() {
            return;
        }

        let rows = match table.count_rows(None).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Failed to count rows of '{}': {}", name, e);
                return;
            }
        };

        for kind in pending {
            match self.build_index(table, kind, rows).await {
                Ok(true) => self.clear_deferred(&name, kind),
                Ok(false) => debug!("{:?} index on '{}' still deferred ({} rows)", kind, name, rows),
                Err(e) => warn!("Failed to build deferred {:?} index on '{}': {}", kind, name, e),
            }
        }
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_any().downcast_ref::<StringArray>())
}

fn string_value(column: Option<&StringArray>, row: usize) -> Option<String> {
    column.and_then(|values| (!values.is_null(row)).then(|| values.value(row).to_string()))
}

/// Read a score column that may be either f32 or f64
fn float_column(batch: &RecordBatch, name: &str) -> Option<Vec<Option<f32>>> {
    let column = batch.column_by_name(name)?;
    if let Some(values) = column.as_any().downcast_ref::<Float32Array>() {
        return Some(values.iter().collect());
    }
    column
        .as_any()
        .downcast_ref::<Float64Array>()
        .map(|values| values.iter().map(|v| v.map(|v| v as f32)).collect())
}

#[async_trait]
impl Store for LanceStore {
    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.table_names().await?.iter().any(|t| t == name))
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        info!(
            "Creating table '{}' with {} dimensions",
            spec.name, spec.dimension
        );

        self.connection
            .create_empty_table(&spec.name, Self::create_schema(spec.dimension))
            .execute()
            .await
            .map_err(|e| store_error("create table", e))?;

        Ok(())
    }

    async fn list_indexes(&self, name: &str) -> Result<Vec<IndexKind>> {
        let table = self.table(name).await?;
        let indices = table
            .list_indices()
            .await
            .map_err(|e| store_error("list indices", e))?;

        let mut kinds = Vec::new();
        for index in indices {
            if index.columns.iter().any(|c| c == VECTOR_COLUMN) {
                kinds.push(IndexKind::Vector);
            } else if index.columns.iter().any(|c| c == CAPTION_COLUMN) {
                kinds.push(IndexKind::FullText);
            }
        }
        Ok(kinds)
    }

    async fn create_index(&self, spec: &CollectionSpec, kind: IndexKind) -> Result<()> {
        let table = self.table(&spec.name).await?;
        let rows = table
            .count_rows(None)
            .await
            .map_err(|e| store_error("count rows", e))?;

        if !self.build_index(&table, kind, rows).await? {
            debug!(
                "Deferring {:?} index on '{}' until it holds enough rows ({})",
                kind, spec.name, rows
            );
            self.defer_index(&spec.name, kind);
        }
        Ok(())
    }

    async fn collection_dimension(&self, name: &str) -> Result<Option<usize>> {
        if !self.has_collection(name).await? {
            return Ok(None);
        }

        let schema = self
            .table(name)
            .await?
            .schema()
            .await
            .map_err(|e| store_error("get table schema", e))?;

        Ok(schema.fields().iter().find_map(|field| {
            match (field.name() == VECTOR_COLUMN, field.data_type()) {
                (true, DataType::FixedSizeList(_, size)) => Some(*size as usize),
                _ => None,
            }
        }))
    }

    async fn upsert(&self, name: &str, records: &[ImageRecord]) -> Result<()> {
        if records.is_empty() {
            debug!("No records to upsert");
            return Ok(());
        }

        let vector_dim = self
            .collection_dimension(name)
            .await?
            .ok_or_else(|| ImageSearchError::NotFound(name.to_string()))?;

        if let Some(bad) = records.iter().find(|r| r.embedding.len() != vector_dim) {
            return Err(ImageSearchError::SchemaConflict {
                collection: name.to_string(),
                expected: vector_dim,
                found: bad.embedding.len(),
            });
        }

        // merge_insert rejects duplicate source keys; the last occurrence wins
        let mut latest: HashMap<String, usize> = HashMap::with_capacity(records.len());
        for (position, record) in records.iter().enumerate() {
            latest.insert(record.key(), position);
        }
        let unique: Vec<&ImageRecord> = records
            .iter()
            .enumerate()
            .filter(|(position, record)| latest.get(&record.key()) == Some(position))
            .map(|(_, record)| record)
            .collect();

        let record_batch = Self::create_record_batch(&unique, vector_dim)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        let table = self.table(name).await?;
        let mut merge = table.merge_insert(&[ID_COLUMN]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| store_error("upsert records", e))?;

        debug!("Upserted {} records into '{}'", unique.len(), name);

        self.build_deferred_indexes(&table).await;
        Ok(())
    }

    async fn vector_query(&self, name: &str, vector: &[f32], k: usize) -> Result<Vec<StoreRow>> {
        debug!("Vector query on '{}' with k = {}", name, k);

        let results = self
            .table(name)
            .await?
            .vector_search(vector)
            .map_err(|e| store_error("create vector search", e))?
            .column(VECTOR_COLUMN)
            .distance_type(DistanceType::L2)
            .select(Self::result_columns())
            .limit(k)
            .execute()
            .await
            .map_err(|e| store_error("execute vector search", e))?;

        Self::collect_rows(results).await
    }

    async fn text_query(&self, name: &str, text: &str, limit: usize) -> Result<Vec<StoreRow>> {
        debug!("Full-text query on '{}': {}", name, text);

        // no caption index yet (empty table) or full-text disabled
        if !self.list_indexes(name).await?.contains(&IndexKind::FullText) {
            debug!("No full-text index on '{}', returning no matches", name);
            return Ok(Vec::new());
        }

        let results = self
            .table(name)
            .await?
            .query()
            .full_text_search(FullTextSearchQuery::new(text.to_owned()))
            .select(Self::result_columns())
            .limit(limit)
            .execute()
            .await
            .map_err(|e| store_error("execute full-text search", e))?;

        Self::collect_rows(results).await
    }

    async fn hybrid_query(
        &self,
        name: &str,
        vector: &[f32],
        text: &str,
        limit: usize,
    ) -> Result<Vec<StoreRow>> {
        let (vector_rows, text_rows) = tokio::try_join!(
            self.vector_query(name, vector, limit),
            self.text_query(name, text, limit),
        )?;
        Ok(reciprocal_rank_fusion(vector_rows, text_rows, limit))
    }

    async fn raw_sql(&self, statement: &str) -> Result<Vec<StoreRow>> {
        match parse_statement(statement)? {
            Statement::Ping => {
                self.table_names().await?;
                Ok(Vec::new())
            }
            Statement::Select {
                table,
                predicate,
                limit,
            } => {
                let mut query = self
                    .table(&table)
                    .await?
                    .query()
                    .select(Self::result_columns());
                if let Some(predicate) = predicate {
                    query = query.only_if(predicate);
                }
                if let Some(limit) = limit {
                    query = query.limit(limit);
                }

                let results = query
                    .execute()
                    .await
                    .map_err(|e| store_error("execute statement", e))?;
                Self::collect_rows(results).await
            }
        }
    }

    async fn count_rows(&self, name: &str) -> Result<usize> {
        self.table(name)
            .await?
            .count_rows(None)
            .await
            .map_err(|e| store_error("count rows", e))
    }

    async fn optimize(&self, name: &str) -> Result<()> {
        debug!("Optimizing table '{}'", name);

        let table = self.table(name).await?;
        table
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| store_error("optimize table", e))?;

        self.build_deferred_indexes(&table).await;

        info!("Vector database optimization completed for '{}'", name);
        Ok(())
    }
}
