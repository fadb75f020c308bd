use std::path::PathBuf;

use thiserror::Error;

/// Everything that can stop a split.
///
/// Errors are raised where they are detected (reader, partitioner, writer)
/// and travel unchanged up to [`run_split`](crate::split::run_split).
#[derive(Error, Debug)]
pub enum SplitError {
    #[error("unsupported archive format: {0} (expected .cbz, .zip, .cbr or .rar)")]
    UnsupportedFormat(String),

    #[error("`{tool}` was not found; it is required to read RAR-based archives")]
    MissingExternalTool { tool: String },

    #[error("corrupt archive {archive}: {reason}")]
    CorruptArchive { archive: String, reason: String },

    #[error("invalid partition request: {0}")]
    InvalidPartitionRequest(String),

    #[error("invalid naming template {template:?}: {reason}")]
    InvalidTemplate {
        template: String,
        reason: &'static str,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("output file already exists: {}", .0.display())]
    NameCollision(PathBuf),

    #[error("split cancelled")]
    Cancelled,
}

impl SplitError {
    pub(crate) fn corrupt(archive: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SplitError::CorruptArchive {
            archive: archive.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SplitError::Io {
            path: path.into(),
            source,
        }
    }

    /// Keep the underlying `io::Error` when an I/O helper reports through anyhow.
    pub(crate) fn from_anyhow(path: impl Into<PathBuf>, err: anyhow::Error) -> Self {
        match err.downcast::<std::io::Error>() {
            Ok(source) => SplitError::io(path, source),
            Err(err) => SplitError::io(path, std::io::Error::other(format!("{err:#}"))),
        }
    }
}

pub type Result<T> = std::result::Result<T, SplitError>;
