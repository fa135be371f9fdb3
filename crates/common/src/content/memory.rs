use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Asset, BlobRef, ContentError, Continuation, MetadataStore, Repository};

/// In-memory metadata store keyed by (repository, path)
#[derive(Debug, Clone, Default)]
pub struct MemoryMetadataStore {
    inner: Arc<RwLock<MemoryMetadataStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryMetadataStoreInner {
    repositories: BTreeMap<String, Repository>,
    assets: BTreeMap<String, BTreeMap<String, Asset>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asset_count(&self, repository: &str) -> usize {
        self.inner
            .read()
            .assets
            .get(repository)
            .map_or(0, BTreeMap::len)
    }

    pub fn remove_repository(&self, name: &str) {
        let mut inner = self.inner.write();
        inner.repositories.remove(name);
        inner.assets.remove(name);
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn repository(&self, name: &str) -> Result<Option<Repository>, ContentError> {
        Ok(self.inner.read().repositories.get(name).cloned())
    }

    async fn repositories(&self) -> Result<Vec<Repository>, ContentError> {
        Ok(self.inner.read().repositories.values().cloned().collect())
    }

    async fn save_repository(&self, repository: Repository) -> Result<(), ContentError> {
        self.inner
            .write()
            .repositories
            .insert(repository.name.clone(), repository);
        Ok(())
    }

    async fn browse_assets(
        &self,
        repository: &str,
        limit: usize,
        token: Option<&str>,
    ) -> Result<Continuation<Asset>, ContentError> {
        let inner = self.inner.read();
        let Some(assets) = inner.assets.get(repository) else {
            return Ok(Continuation {
                items: Vec::new(),
                next_token: None,
            });
        };
        let lower = match token {
            Some(token) => Bound::Excluded(token.to_string()),
            None => Bound::Unbounded,
        };
        let mut range = assets.range((lower, Bound::Unbounded));
        let items: Vec<Asset> = range.by_ref().take(limit).map(|(_, a)| a.clone()).collect();
        let next_token = match (range.next(), items.last()) {
            (Some(_), Some(last)) => Some(last.path.clone()),
            _ => None,
        };
        Ok(Continuation { items, next_token })
    }

    async fn find_asset(
        &self,
        repository: &str,
        path: &str,
    ) -> Result<Option<Asset>, ContentError> {
        Ok(self
            .inner
            .read()
            .assets
            .get(repository)
            .and_then(|assets| assets.get(path))
            .cloned())
    }

    async fn find_asset_by_blob_ref(
        &self,
        repository: &str,
        blob_ref: &BlobRef,
    ) -> Result<Option<Asset>, ContentError> {
        Ok(self.inner.read().assets.get(repository).and_then(|assets| {
            assets
                .values()
                .find(|asset| asset.blob_ref.as_ref() == Some(blob_ref))
                .cloned()
        }))
    }

    async fn save_asset(&self, asset: Asset) -> Result<(), ContentError> {
        self.inner
            .write()
            .assets
            .entry(asset.repository.clone())
            .or_default()
            .insert(asset.path.clone(), asset);
        Ok(())
    }

    async fn delete_asset(&self, repository: &str, path: &str) -> Result<bool, ContentError> {
        Ok(self
            .inner
            .write()
            .assets
            .get_mut(repository)
            .and_then(|assets| assets.remove(path))
            .is_some())
    }
}
