use thiserror::Error;

pub type Result<T> = std::result::Result<T, ImageSearchError>;

#[derive(Error, Debug)]
pub enum ImageSearchError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Schema conflict on '{collection}': expected dimension {expected}, found {found}")]
    SchemaConflict {
        collection: String,
        expected: usize,
        found: usize,
    },

    #[error("Embedding error: {0}")]
    Embed(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Collection not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod image_store;
pub mod scanner;
