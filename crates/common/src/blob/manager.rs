use std::collections::BTreeMap;
use std::sync::Arc;

use super::BlobStore;

/// Blob stores known to the process, by configured name
#[derive(Debug, Clone, Default)]
pub struct BlobStoreManager {
    stores: BTreeMap<String, Arc<dyn BlobStore>>,
}

impl BlobStoreManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under its own name, replacing any
    ///  previous store of that name
    pub fn register(&mut self, store: Arc<dyn BlobStore>) {
        self.stores.insert(store.name().to_string(), store);
    }

    pub fn with_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.register(store);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BlobStore>> {
        self.stores.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    pub fn stores(&self) -> impl Iterator<Item = &Arc<dyn BlobStore>> {
        self.stores.values()
    }
}
