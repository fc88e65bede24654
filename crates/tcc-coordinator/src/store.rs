//! Root transaction store
//!
//! The lookup tables Join and End address roots through. Each coordinator
//! owns its store instance, so several coordinators (or tests) can coexist in
//! one process without sharing state.

use crate::root::RootTransaction;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tcc_core::{Result, RootId, ScopeKey, TccError};

/// Lookup table of live roots
pub trait TransactionStore: Send + Sync {
    /// Insert a new root.
    ///
    /// Fails with `RootAlreadyActive` if a non-terminal root already holds
    /// the same scope. The check and insert are atomic.
    fn insert_root(&self, root: Arc<RootTransaction>) -> Result<()>;

    fn root(&self, root_id: RootId) -> Option<Arc<RootTransaction>>;

    /// Non-terminal root currently holding `scope`
    fn active_root(&self, scope: &ScopeKey) -> Option<Arc<RootTransaction>>;

    fn remove_root(&self, root_id: RootId) -> Option<Arc<RootTransaction>>;

    fn root_ids(&self) -> Vec<RootId>;
}

#[derive(Default)]
struct Tables {
    roots: HashMap<RootId, Arc<RootTransaction>>,
    scopes: HashMap<ScopeKey, RootId>,
}

/// In-process store backed by hash maps
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored roots
    pub fn len(&self) -> usize {
        self.tables.read().roots.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.tables.read().roots.is_empty()
    }
}

impl TransactionStore for InMemoryStore {
    fn insert_root(&self, root: Arc<RootTransaction>) -> Result<()> {
        let mut tables = self.tables.write();

        if let Some(existing) = tables
            .scopes
            .get(root.scope())
            .and_then(|id| tables.roots.get(id))
        {
            if !existing.state().is_terminal() {
                return Err(TccError::RootAlreadyActive {
                    scope: root.scope().clone(),
                    existing: existing.root_id(),
                });
            }
        }

        tables.scopes.insert(root.scope().clone(), root.root_id());
        tables.roots.insert(root.root_id(), root);
        Ok(())
    }

    fn root(&self, root_id: RootId) -> Option<Arc<RootTransaction>> {
        self.tables.read().roots.get(&root_id).cloned()
    }

    fn active_root(&self, scope: &ScopeKey) -> Option<Arc<RootTransaction>> {
        let tables = self.tables.read();
        tables
            .scopes
            .get(scope)
            .and_then(|id| tables.roots.get(id))
            .filter(|root| !root.state().is_terminal())
            .cloned()
    }

    fn remove_root(&self, root_id: RootId) -> Option<Arc<RootTransaction>> {
        let mut tables = self.tables.write();
        let root = tables.roots.remove(&root_id)?;
        if tables.scopes.get(root.scope()) == Some(&root_id) {
            tables.scopes.remove(root.scope());
        }
        Some(root)
    }

    fn root_ids(&self) -> Vec<RootId> {
        self.tables.read().roots.keys().copied().collect()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("roots", &self.len())
            .finish()
    }
}
