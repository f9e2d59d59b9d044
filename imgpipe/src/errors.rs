use std::path::PathBuf;

use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid or inconsistent configuration
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Filter name that does not map to a known kernel
    #[error("Unknown image filter '{name}'")]
    UnknownFilter { name: String },

    /// Secret store has no entry with this name
    #[error("Secret '{name}' not found in {store} secret store")]
    MissingSecret { name: String, store: &'static str },

    /// Secret entry exists but could not be interpreted
    #[error("Secret '{name}' is invalid: {reason}")]
    InvalidSecret { name: String, reason: String },

    /// Photo search failed (bad status or unparseable body)
    #[error("Photo search failed: {message}")]
    Search { message: String },

    /// Image download returned a non-200 status; the original file was not written
    #[error("Failed to download {url}: status {status}")]
    DownloadFailed { url: String, status: u16 },

    /// Transport-level HTTP failure
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Image decode, filter or encode failure
    #[error("Failed to process image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Local file I/O failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Metadata serialization failure
    #[error("Failed to write metadata record: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Object storage failure
    #[error("Failed to upload {key} to bucket {bucket}: {message}")]
    Storage { bucket: String, key: String, message: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }

    /// Whether this error only affects a single image, so the run can continue with the next one.
    ///
    /// Configuration, credential and search failures are fatal for the whole run.
    pub fn is_item_failure(&self) -> bool {
        match self {
            Error::DownloadFailed { .. }
            | Error::Http(_)
            | Error::Image { .. }
            | Error::Io { .. }
            | Error::Metadata(_)
            | Error::Storage { .. } => true,
            Error::Config { .. }
            | Error::UnknownFilter { .. }
            | Error::MissingSecret { .. }
            | Error::InvalidSecret { .. }
            | Error::Search { .. }
            | Error::Other(_) => false,
        }
    }

    /// Short machine-friendly label used in logs and the run report
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config",
            Error::UnknownFilter { .. } => "unknown_filter",
            Error::MissingSecret { .. } => "missing_secret",
            Error::InvalidSecret { .. } => "invalid_secret",
            Error::Search { .. } => "search",
            Error::DownloadFailed { .. } => "download",
            Error::Http(_) => "http",
            Error::Image { .. } => "image",
            Error::Io { .. } => "io",
            Error::Metadata(_) => "metadata",
            Error::Storage { .. } => "storage",
            Error::Other(_) => "other",
        }
    }
}

/// Type alias for pipeline results
pub type Result<T> = std::result::Result<T, Error>;
