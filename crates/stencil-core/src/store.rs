//! In-memory descriptor store keyed by source URL.
//!
//! Thread-safe via `Arc<RwLock<..>>`: readers share the lock, a writer holds
//! it exclusively only for the duration of a map insert.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::tree::TypeTree;

/// Last accepted [`TypeTree`] per source. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct DescriptorStore {
    inner: Arc<RwLock<HashMap<String, Arc<TypeTree>>>>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tree stored for `source`.
    pub fn write(&self, source: &str, tree: Arc<TypeTree>) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(source.to_string(), tree);
    }

    /// Snapshot of the tree stored for `source`, if one was ever written.
    ///
    /// The returned `Arc` stays valid after later writes replace the entry.
    pub fn read(&self, source: &str) -> Option<Arc<TypeTree>> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(source).cloned()
    }

    pub fn contains(&self, source: &str) -> bool {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.contains_key(source)
    }

    /// Sources with a stored tree, sorted.
    pub fn sources(&self) -> Vec<String> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for DescriptorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorStore")
            .field("sources", &self.sources())
            .finish()
    }
}
