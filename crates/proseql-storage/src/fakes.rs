//! In-memory `StorageAdapter` fake (testing only).
//!
//! Satisfies the trait contract without touching the filesystem.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{StorageError, StorageResult};
use crate::storage_traits::{StorageAdapter, WatchEvent, WatchHandle};

/// In-memory storage adapter backed by a `HashMap<PathBuf, Vec<u8>>`.
///
/// `watch` never observes real filesystem changes; tests that need to
/// exercise the file-watcher path should call [`MemoryStorageAdapter::notify_change`]
/// to push a synthetic event to any open watch on that path.
#[derive(Debug, Default)]
pub struct MemoryStorageAdapter {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    watchers: Mutex<HashMap<PathBuf, Vec<mpsc::Sender<WatchEvent>>>>,
}

impl MemoryStorageAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a synthetic change event to any watcher registered on `path`.
    pub fn notify_change(&self, path: &Path) {
        let watchers = self.watchers.lock().unwrap();
        if let Some(senders) = watchers.get(path) {
            for sender in senders {
                let _ = sender.try_send(WatchEvent::Changed(path.to_path_buf()));
            }
        }
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorageAdapter {
    async fn read(&self, path: &Path) -> StorageResult<Vec<u8>> {
        let files = self.files.lock().unwrap();
        files
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                path: path.to_path_buf(),
            })
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> StorageResult<()> {
        let mut files = self.files.lock().unwrap();
        files.insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    async fn append(&self, path: &Path, bytes: &[u8]) -> StorageResult<()> {
        let mut files = self.files.lock().unwrap();
        files.entry(path.to_path_buf()).or_default().extend_from_slice(bytes);
        Ok(())
    }

    async fn ensure_dir(&self, _path: &Path) -> StorageResult<()> {
        Ok(())
    }

    async fn exists(&self, path: &Path) -> StorageResult<bool> {
        let files = self.files.lock().unwrap();
        Ok(files.contains_key(path))
    }

    fn watch(&self, path: &Path) -> StorageResult<WatchHandle> {
        let (tx, rx) = mpsc::channel(32);
        self.watchers
            .lock()
            .unwrap()
            .entry(path.to_path_buf())
            .or_default()
            .push(tx);
        Ok(WatchHandle::new(rx, Box::new(())))
    }
}
