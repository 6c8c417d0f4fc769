// LanceDB vector database module
// Embedded, file-backed implementation of the Store trait

pub mod vector_store;

pub use vector_store::LanceStore;

/// Composite key column
pub const ID_COLUMN: &str = "id";
/// Embedding column (fixed-size list of f32)
pub const VECTOR_COLUMN: &str = "vector";
pub const FILE_NAME_COLUMN: &str = "file_name";
pub const FILE_PATH_COLUMN: &str = "file_path";
/// Caption column, target of the full-text index
pub const CAPTION_COLUMN: &str = "caption";
/// Column LanceDB adds to vector search results
pub const DISTANCE_COLUMN: &str = "_distance";
/// Column LanceDB adds to full-text search results
pub const SCORE_COLUMN: &str = "_score";

/// Below this many rows a vector index is not trained; searches fall back to
/// an exact scan, which is also the better choice at that size.
pub const MIN_ROWS_FOR_VECTOR_INDEX: usize = 1000;
