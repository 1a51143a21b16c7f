//! ProseQL core library.
//!
//! An embedded, schema-defined document database: in-memory collections
//! with ref/inverse relationships, unique constraints, equality and
//! inverted-search indexes, computed fields, lifecycle hooks, schema
//! migrations, cursor pagination, live queries, and a single-writer
//! transaction coordinator, with optional file-backed persistence through
//! a pluggable storage adapter.

pub mod aggregate;
pub mod collection;
pub mod computed;
pub mod config;
pub mod cursor;
pub mod database;
pub mod error;
pub mod filter;
pub mod indexes;
pub mod migration;
pub mod mutation;
pub mod observability;
pub mod persistence;
pub mod plugin;
pub mod populate;
pub mod query;
pub mod reactive;
pub mod relationship;
pub mod sort_paginate_select;
pub mod transaction;
pub mod value;
pub mod workspace;

pub use collection::{CollectionState, SharedState};
pub use config::{
    CollectionConfig, CollectionConfigBuilder, DatabaseConfig, DatabaseConfigBuilder, Hooks,
    MigrationStep, RelationshipConfig, RelationshipKind, UniqueConstraint, Validator,
};
pub use cursor::{CursorConfig, Page, PageInfo};
pub use database::{CollectionHandle, Database};
pub use error::{Error, Result};
pub use plugin::{Plugin, PluginRegistry};
pub use query::{CursorQuery, Query};
pub use reactive::{ChangeBus, ChangeEvent, ChangeKind, WatchHandle};
pub use relationship::DeletePolicy;
pub use value::Record;

/// ProseQL crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
