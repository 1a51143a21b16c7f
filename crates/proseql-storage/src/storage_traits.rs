//! Storage adapter trait definitions for ProseQL.
//!
//! `StorageAdapter` is the collaborator the persistence trigger (§4.12) and
//! migration runner (§4.13) write through: `read`/`write`/`append`/
//! `ensure_dir`/`watch`. Two implementations are provided: `FsStorageAdapter`
//! (real filesystem, `fs.rs`) and `MemoryStorageAdapter` (test fake,
//! `fakes.rs`), mirroring the trait-plus-fake pattern this workspace already
//! uses for its storage traits.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StorageResult;

/// A single externally-observed change to a watched path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// The file's contents changed (created or modified).
    Changed(PathBuf),
    /// The file was removed.
    Removed(PathBuf),
}

/// A live filesystem watch. Dropping it stops the underlying watcher.
pub struct WatchHandle {
    pub(crate) receiver: mpsc::Receiver<WatchEvent>,
    // Keeps the platform watcher (or any other resource backing this watch)
    // alive for as long as the handle is held.
    _guard: Box<dyn Send + Sync>,
}

impl WatchHandle {
    pub fn new(receiver: mpsc::Receiver<WatchEvent>, guard: Box<dyn Send + Sync>) -> Self {
        Self {
            receiver,
            _guard: guard,
        }
    }

    /// Await the next change event. Returns `None` once the watcher has shut down.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.receiver.recv().await
    }
}

/// Storage adapter collaborator.
///
/// Errors are typed (`StorageError::{NotFound, PermissionDenied, Io, ...}`),
/// matching the `{kind: not-found|permission-denied|io|…}` contract.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Read the full contents of `path`.
    async fn read(&self, path: &Path) -> StorageResult<Vec<u8>>;

    /// Overwrite `path` with `bytes` (atomic: readers never observe a partial write).
    async fn write(&self, path: &Path, bytes: &[u8]) -> StorageResult<()>;

    /// Append `bytes` to `path`, creating it if absent.
    async fn append(&self, path: &Path, bytes: &[u8]) -> StorageResult<()>;

    /// Ensure every directory component of `path` exists.
    async fn ensure_dir(&self, path: &Path) -> StorageResult<()>;

    /// Whether `path` currently exists.
    async fn exists(&self, path: &Path) -> StorageResult<bool>;

    /// Watch `path` for external changes. Watcher failures are non-fatal to
    /// the caller: a failed `watch` call is logged and the
    /// database runs without that collection's file watcher.
    fn watch(&self, path: &Path) -> StorageResult<WatchHandle>;
}
