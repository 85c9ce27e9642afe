//! Custom error types for the deploy client.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed archive {}: {reason}", .path.display())]
    MalformedArchive { path: PathBuf, reason: String },

    /// The remote side could not produce a catalog. Never treated as an empty catalog.
    #[error("Failed to fetch {catalog} catalog: {reason}")]
    CatalogFetch { catalog: &'static str, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("API error [{code}]: {message}")]
    Api { code: String, message: String },

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl DeployError {
    /// Classify a zip error raised while reading or writing `path`.
    pub fn from_zip(path: &Path, err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => DeployError::Io(e),
            other => DeployError::MalformedArchive {
                path: path.to_path_buf(),
                reason: other.to_string(),
            },
        }
    }

    pub fn is_catalog_fetch(&self) -> bool {
        matches!(self, DeployError::CatalogFetch { .. })
    }
}

impl From<tokio::task::JoinError> for DeployError {
    fn from(err: tokio::task::JoinError) -> Self {
        DeployError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
