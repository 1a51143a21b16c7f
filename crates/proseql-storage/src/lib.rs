//! proseql-storage: the storage adapter, codec registry, and file watcher
//! collaborators behind a ProseQL database.
//!
//! - [`storage_traits::StorageAdapter`]: `read`/`write`/`append`/`ensure_dir`/`watch`,
//!   implemented by [`fs::FsStorageAdapter`] (real filesystem) and
//!   [`fakes::MemoryStorageAdapter`] (in-memory test fake).
//! - [`codec::CodecRegistry`]: dispatches `serialize`/`deserialize` to the
//!   JSON, YAML, TOML, and prose codecs by file extension.

pub mod codec;
pub mod error;
pub mod fakes;
pub mod fs;
pub mod storage_traits;

pub use codec::{Codec, CodecRegistry};
pub use error::{StorageError, StorageResult};
pub use fakes::MemoryStorageAdapter;
pub use fs::FsStorageAdapter;
pub use storage_traits::{StorageAdapter, WatchEvent, WatchHandle};
