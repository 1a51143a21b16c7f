//! Error types for proseql-storage.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the storage adapter, codec registry, and file watcher.
#[derive(Error, Debug)]
pub enum StorageError {
    /// `read`/`watch` on a path that does not exist.
    #[error("path not found: {path}")]
    NotFound { path: PathBuf },

    /// The filesystem denied the requested operation.
    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Any other I/O failure.
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A codec was requested for an extension with no registered handler.
    #[error("unsupported format: {extension}")]
    UnsupportedFormat { extension: String },

    /// A codec failed to serialize a value.
    #[error("serialization failed ({codec}): {message}")]
    Serialization { codec: String, message: String },

    /// A codec failed to parse bytes into a value.
    #[error("deserialization failed ({codec}): {message}")]
    Deserialization { codec: String, message: String },

    /// The prose codec's `@prose` directive is missing, duplicated, or malformed.
    #[error("malformed prose template: {message}")]
    ProseTemplate { message: String },

    /// The filesystem watcher could not be established.
    #[error("watch failed on {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return StorageError::NotFound { path };
        }
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return StorageError::PermissionDenied { path };
        }
        StorageError::Io { path, source }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
