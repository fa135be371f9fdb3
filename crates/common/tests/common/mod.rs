//! Shared fixture: an in-memory blob store and metadata store
//!  with one hosted raw repository
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use common::blob::{
    Blob, BlobStore, BlobStoreManager, MemoryBlobStore, BLOB_NAME_HEADER, REPO_NAME_HEADER,
};
use common::content::{Asset, BlobRef, MemoryMetadataStore, MetadataStore, Repository};

pub const STORE: &str = "default";
pub const REPO: &str = "raw-hosted";

pub struct TestEnv {
    pub blobs: Arc<MemoryBlobStore>,
    pub metadata: Arc<MemoryMetadataStore>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let env = Self {
            blobs: Arc::new(MemoryBlobStore::new(STORE)),
            metadata: Arc::new(MemoryMetadataStore::new()),
        };
        env.add_repository(Repository::hosted(REPO, "raw", STORE))
            .await;
        env
    }

    pub fn manager(&self) -> BlobStoreManager {
        BlobStoreManager::new().with_store(self.blobs.clone())
    }

    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.metadata.clone()
    }

    pub async fn add_repository(&self, repository: Repository) {
        self.metadata.save_repository(repository).await.unwrap();
    }

    pub async fn repository(&self, name: &str) -> Repository {
        self.metadata.repository(name).await.unwrap().unwrap()
    }

    /// Write a blob whose headers name `repository` and `name`
    pub async fn write_blob(&self, repository: &str, name: &str, data: &[u8]) -> Blob {
        let mut headers = BTreeMap::new();
        headers.insert(BLOB_NAME_HEADER.to_string(), name.to_string());
        headers.insert(REPO_NAME_HEADER.to_string(), repository.to_string());
        self.blobs
            .create(Bytes::copy_from_slice(data), headers)
            .await
            .unwrap()
    }

    /// Write a blob and an asset pointing at it
    pub async fn add_asset(&self, repository: &str, name: &str, data: &[u8]) -> (Asset, Blob) {
        let blob = self.write_blob(repository, name, data).await;
        let asset = Asset::new(repository, name).with_blob(
            BlobRef::new(STORE, blob.id.clone()),
            blob.metrics.sha1.as_deref().unwrap(),
        );
        self.metadata.save_asset(asset.clone()).await.unwrap();
        (asset, blob)
    }
}
