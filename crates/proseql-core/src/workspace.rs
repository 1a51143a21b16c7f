//! A `Workspace` is the staging area every mutation computes against: a
//! lazily-populated capture of the collections it touches, plus the
//! events it produces. The mutation kernel (`mutation.rs`), relationship
//! mutations (`relationship.rs`), and the transaction coordinator
//! (`transaction.rs`) are all built on top of it, so a single mutation and
//! a whole transaction body commit through the same code path: compute
//! against staged state, then swap every touched collection in one pass.
//!
//! This is a shadow snapshot: a shallow copy of the
//! mapping references a caller intends to touch, read and written without
//! reaching into `Database`'s live `SharedState` until commit.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::collection::CollectionState;
use crate::config::CollectionConfig;
use crate::error::{Error, Result};
use crate::plugin::PluginRegistry;
use crate::reactive::ChangeEvent;

/// A source of collection configs and current snapshots, implemented by
/// `Database`. The workspace calls back into it only to fetch a
/// collection's state the first time that collection is touched;
/// everything after that is served from the workspace's own staged copy.
pub trait CollectionSource {
    fn config(&self, collection: &str) -> Option<Arc<CollectionConfig>>;
    fn snapshot(&self, collection: &str) -> Option<Arc<CollectionState>>;

    /// The database's plugin registry, consulted for custom filter
    /// operators and named id generators. `None` for sources with no
    /// plugins (e.g. test fixtures).
    fn plugins(&self) -> Option<&PluginRegistry> {
        None
    }
}

pub struct Workspace<'a> {
    source: &'a dyn CollectionSource,
    staged: RefCell<HashMap<String, CollectionState>>,
    events: RefCell<Vec<ChangeEvent>>,
}

impl<'a> Workspace<'a> {
    pub fn new(source: &'a dyn CollectionSource) -> Self {
        Workspace { source, staged: RefCell::new(HashMap::new()), events: RefCell::new(Vec::new()) }
    }

    pub fn config(&self, collection: &str) -> Result<Arc<CollectionConfig>> {
        self.source
            .config(collection)
            .ok_or_else(|| Error::validation(format!("unknown collection '{collection}'")))
    }

    /// The collection's state as of the start of this workspace, or as of
    /// the last mutation staged against it within this workspace.
    pub fn state(&self, collection: &str) -> Result<CollectionState> {
        if let Some(staged) = self.staged.borrow().get(collection) {
            return Ok(staged.clone());
        }
        let snapshot = self
            .source
            .snapshot(collection)
            .ok_or_else(|| Error::validation(format!("unknown collection '{collection}'")))?;
        Ok((*snapshot).clone())
    }

    /// Stage a new state for `collection`, visible to any further reads
    /// or writes within this workspace, and record the event it produced.
    pub fn stage(&self, collection: &str, next: CollectionState, event: ChangeEvent) {
        self.staged.borrow_mut().insert(collection.to_string(), next);
        self.events.borrow_mut().push(event);
    }

    /// Consume the workspace, returning every collection touched (in
    /// first-touch order isn't required — commit order only matters
    /// within a collection, which the caller re-derives by iterating the
    /// map) and the events produced, in the order they occurred.
    pub fn into_parts(self) -> (HashMap<String, CollectionState>, Vec<ChangeEvent>) {
        (self.staged.into_inner(), self.events.into_inner())
    }

    pub fn dirty_collections(&self) -> Vec<String> {
        self.staged.borrow().keys().cloned().collect()
    }

    pub fn plugins(&self) -> Option<&PluginRegistry> {
        self.source.plugins()
    }
}
