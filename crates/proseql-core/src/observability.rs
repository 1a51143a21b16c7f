//! Structured observability hooks for ProseQL's collection lifecycle.
//!
//! Events are emitted at `info!` level by default; warnings for swallowed
//! failures (persistence saves, file-watcher reloads) that must never
//! propagate into a caller's mutation or query.

use tracing::{info, warn};

/// RAII guard that enters a collection-scoped tracing span for the
/// duration of one mutation or query.
pub struct CollectionSpan {
    _span: tracing::span::EnteredSpan,
}

impl CollectionSpan {
    pub fn enter(collection: &str) -> Self {
        let span = tracing::info_span!("proseql.collection", collection = %collection);
        Self { _span: span.entered() }
    }
}

pub fn emit_mutation_committed(collection: &str, operation: &str, id: &str) {
    info!(event = "mutation.committed", collection = %collection, operation = %operation, id = %id);
}

pub fn emit_mutation_failed(collection: &str, operation: &str, error: &dyn std::fmt::Display) {
    warn!(event = "mutation.failed", collection = %collection, operation = %operation, error = %error);
}

pub fn emit_query_completed(collection: &str, matched: usize, returned: usize) {
    info!(event = "query.completed", collection = %collection, matched = matched, returned = returned);
}

pub fn emit_transaction_started() {
    info!(event = "transaction.started");
}

pub fn emit_transaction_committed(dirty_collections: usize) {
    info!(event = "transaction.committed", dirty_collections = dirty_collections);
}

pub fn emit_transaction_aborted(reason: &dyn std::fmt::Display) {
    warn!(event = "transaction.aborted", reason = %reason);
}

pub fn emit_persistence_scheduled(collection: &str) {
    info!(event = "persistence.scheduled", collection = %collection);
}

pub fn emit_persistence_flushed(collection: &str) {
    info!(event = "persistence.flushed", collection = %collection);
}

pub fn emit_watcher_reload(collection: &str) {
    info!(event = "watcher.reload", collection = %collection);
}

pub fn emit_watcher_error(collection: &str, error: &dyn std::fmt::Display) {
    warn!(event = "watcher.error", collection = %collection, error = %error);
}

pub fn emit_migration_applied(collection: &str, from_version: u32, to_version: u32) {
    info!(event = "migration.applied", collection = %collection, from_version = from_version, to_version = to_version);
}
