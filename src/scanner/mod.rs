// Image source module
// Finds candidate image files below a root directory

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::IngestConfig;
use crate::{ImageSearchError, Result};

pub const DEFAULT_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// A finite, restartable sequence of image paths
pub trait ImageSource: Send + Sync {
    /// Number of paths `scan` would yield. Used for progress only.
    fn count(&self, root: &Path) -> Result<usize>;

    /// Absolute paths of every candidate image below `root`
    fn scan(&self, root: &Path) -> Result<Box<dyn Iterator<Item = PathBuf> + Send>>;
}

/// Filesystem walker that yields image files by extension
///
/// Hidden entries, `__MACOSX` resource-fork folders and paths holding anything
/// other than printable ASCII below the root are skipped.
#[derive(Debug, Clone)]
pub struct ImageScanner {
    extensions: Arc<[String]>,
}

impl Default for ImageScanner {
    #[inline]
    fn default() -> Self {
        Self::with_extensions(DEFAULT_EXTENSIONS)
    }
}

impl ImageScanner {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scanner accepting the given extensions, compared case-insensitively.
    /// A leading dot is ignored.
    #[inline]
    pub fn with_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions: Vec<String> = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self {
            extensions: extensions.into(),
        }
    }

    #[inline]
    pub fn from_config(config: &IngestConfig) -> Self {
        Self::with_extensions(&config.extensions)
    }

    #[inline]
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn is_resource_fork(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name().to_string_lossy().contains("MACOSX")
}

fn is_printable_ascii(path: &Path) -> bool {
    path.to_str()
        .is_some_and(|s| s.chars().all(|c| (' '..='~').contains(&c)))
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
}

impl ImageSource for ImageScanner {
    fn count(&self, root: &Path) -> Result<usize> {
        let total = self.scan(root)?.count();
        info!("Counted {} images in {}", total, root.display());
        Ok(total)
    }

    fn scan(&self, root: &Path) -> Result<Box<dyn Iterator<Item = PathBuf> + Send>> {
        let root = std::fs::canonicalize(root)?;
        if !root.is_dir() {
            return Err(ImageSearchError::InvalidQuery(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        debug!("Scanning {} for {:?}", root.display(), self.extensions);

        let extensions = Arc::clone(&self.extensions);
        let base = root.clone();
        let paths = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_hidden(entry) && !is_resource_fork(entry))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.path().is_file())
            .map(DirEntry::into_path)
            .filter(move |path| {
                let relative = path.strip_prefix(&base).unwrap_or(path);
                if !is_printable_ascii(relative) {
                    debug!("Skipping path with unprintable characters: {:?}", path);
                    return false;
                }
                has_extension(path, &extensions)
            });

        Ok(Box::new(paths))
    }
}
