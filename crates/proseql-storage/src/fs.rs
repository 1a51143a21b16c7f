//! Filesystem-backed `StorageAdapter`.
//!
//! Writes are atomic: content is written to a temp file in the target's
//! directory, then renamed into place.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;

use crate::error::{StorageError, StorageResult};
use crate::storage_traits::{StorageAdapter, WatchEvent, WatchHandle};

/// Real-filesystem storage adapter.
#[derive(Debug, Default, Clone)]
pub struct FsStorageAdapter;

impl FsStorageAdapter {
    pub fn new() -> Self {
        Self
    }

    fn atomic_write(path: &Path, bytes: &[u8]) -> StorageResult<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StorageError::io(dir, e))?;
        tmp.write_all(bytes)
            .map_err(|e| StorageError::io(path, e))?;
        tmp.persist(path)
            .map_err(|e| StorageError::io(path, e.error))?;
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for FsStorageAdapter {
    async fn read(&self, path: &Path) -> StorageResult<Vec<u8>> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || fs::read(&path).map_err(|e| StorageError::io(&path, e)))
            .await
            .expect("blocking read task panicked")
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> StorageResult<()> {
        let path = path.to_path_buf();
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || Self::atomic_write(&path, &bytes))
            .await
            .expect("blocking write task panicked")
    }

    async fn append(&self, path: &Path, bytes: &[u8]) -> StorageResult<()> {
        use std::io::Write as _;
        let path = path.to_path_buf();
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
            }
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| StorageError::io(&path, e))?;
            file.write_all(&bytes)
                .map_err(|e| StorageError::io(&path, e))
        })
        .await
        .expect("blocking append task panicked")
    }

    async fn ensure_dir(&self, path: &Path) -> StorageResult<()> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            fs::create_dir_all(&path).map_err(|e| StorageError::io(&path, e))
        })
        .await
        .expect("blocking ensure_dir task panicked")
    }

    async fn exists(&self, path: &Path) -> StorageResult<bool> {
        Ok(path.exists())
    }

    fn watch(&self, path: &Path) -> StorageResult<WatchHandle> {
        use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};

        let (tx, rx) = mpsc::channel::<WatchEvent>(32);
        let watch_path = path.to_path_buf();

        let mut watcher: RecommendedWatcher = notify::recommended_watcher({
            let watch_path = watch_path.clone();
            move |res: notify::Result<Event>| {
                let Ok(event) = res else { return };
                let relevant = event.paths.iter().any(|p| p == &watch_path);
                if !relevant {
                    return;
                }
                let mapped = match event.kind {
                    notify::EventKind::Remove(_) => WatchEvent::Removed(watch_path.clone()),
                    _ => WatchEvent::Changed(watch_path.clone()),
                };
                let _ = tx.blocking_send(mapped);
            }
        })
        .map_err(|e| StorageError::Watch {
            path: watch_path.clone(),
            source: e,
        })?;

        let watch_dir = watch_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| StorageError::Watch {
                path: watch_path.clone(),
                source: e,
            })?;

        Ok(WatchHandle::new(rx, Box::new(watcher)))
    }
}
