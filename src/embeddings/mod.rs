// Embeddings module
// Turns images and text into vectors, and images into short captions

pub mod remote;

#[cfg(test)]
mod tests;

use std::path::Path;

use async_trait::async_trait;

use crate::Result;

pub use remote::RemoteEmbedder;

/// Outcome of captioning an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caption {
    Text(String),
    /// No caption could be produced; carries the reason
    Unavailable(String),
}

impl Caption {
    /// The caption text, if one was produced
    #[inline]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Unavailable(_) => None,
        }
    }

    /// Caption as stored alongside the image; unavailable captions are stored empty
    #[inline]
    pub fn into_stored(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Unavailable(_) => String::new(),
        }
    }
}

/// Produces vectors and captions for the image store
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed an image file. Unreadable or corrupt input is an `Embed` error.
    async fn embed_image(&self, path: &Path) -> Result<Vec<f32>>;

    /// Embed a text query into the same space as the images
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Describe an image in a word or two. Never fails; problems surface as
    /// [`Caption::Unavailable`].
    async fn caption_image(&self, path: &Path) -> Caption;
}

/// Scale a vector to unit length in place; zero vectors are left untouched
#[inline]
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
