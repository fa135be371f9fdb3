use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;

use super::{
    confirm_undelete, Blob, BlobAttributes, BlobId, BlobIdStream, BlobMetrics, BlobStore,
    BlobStoreError, BlobStoreUsageChecker, ByteStream,
};

/// In-memory blob store. Also lets tests break blobs in
///  the ways a real store breaks.
#[derive(Debug, Clone)]
pub struct MemoryBlobStore {
    name: String,
    inner: Arc<RwLock<MemoryBlobStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryBlobStoreInner {
    blobs: BTreeMap<BlobId, StoredBlob>,
}

#[derive(Debug)]
struct StoredBlob {
    id: BlobId,
    /// None once the content has been removed out from under the attributes
    content: Option<Bytes>,
    attributes: Option<BlobAttributes>,
    /// Reads fail with an io error
    unreadable: bool,
    updated: DateTime<Utc>,
}

impl MemoryBlobStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(RwLock::new(MemoryBlobStoreInner::default())),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &BlobId) -> bool {
        self.inner.read().blobs.contains_key(id)
    }

    /// Remove the content but keep the attributes
    pub fn drop_content(&self, id: &BlobId) {
        if let Some(blob) = self.inner.write().blobs.get_mut(id) {
            blob.content = None;
        }
    }

    /// Reads of the content fail
    pub fn make_unreadable(&self, id: &BlobId) {
        if let Some(blob) = self.inner.write().blobs.get_mut(id) {
            blob.unreadable = true;
        }
    }

    /// Remove the attributes but keep the content
    pub fn drop_attributes(&self, id: &BlobId) {
        if let Some(blob) = self.inner.write().blobs.get_mut(id) {
            blob.attributes = None;
        }
    }

    pub fn set_updated(&self, id: &BlobId, updated: DateTime<Utc>) {
        if let Some(blob) = self.inner.write().blobs.get_mut(id) {
            blob.updated = updated;
        }
    }

    /// Overwrite the recorded SHA1 metric
    pub fn set_sha1(&self, id: &BlobId, sha1: Option<String>) {
        if let Some(attributes) = self
            .inner
            .write()
            .blobs
            .get_mut(id)
            .and_then(|blob| blob.attributes.as_mut())
        {
            attributes.metrics.sha1 = sha1;
        }
    }

    fn snapshot_ids(&self, since: Option<DateTime<Utc>>) -> Vec<BlobId> {
        self.inner
            .read()
            .blobs
            .values()
            .filter(|blob| since.map_or(true, |since| blob.updated >= since))
            .map(|blob| blob.id.clone())
            .collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create(
        &self,
        data: Bytes,
        headers: BTreeMap<String, String>,
    ) -> Result<Blob, BlobStoreError> {
        let id = BlobId::generate();
        let metrics = BlobMetrics::for_content(&data);
        let attributes = BlobAttributes::new(headers.clone(), metrics.clone());
        self.inner.write().blobs.insert(
            id.clone(),
            StoredBlob {
                id: id.clone(),
                content: Some(data),
                attributes: Some(attributes),
                unreadable: false,
                updated: Utc::now(),
            },
        );
        tracing::debug!(blob_store = %self.name, blob_id = %id, "created blob");
        Ok(Blob {
            id,
            headers,
            metrics,
        })
    }

    async fn get_with_deleted(
        &self,
        id: &BlobId,
        include_deleted: bool,
    ) -> Result<Option<Blob>, BlobStoreError> {
        let inner = self.inner.read();
        let Some(blob) = inner.blobs.get(id) else {
            return Ok(None);
        };
        let Some(attributes) = &blob.attributes else {
            return Ok(None);
        };
        if attributes.deleted && !include_deleted {
            return Ok(None);
        }
        Ok(Some(Blob {
            id: blob.id.clone(),
            headers: attributes.headers.clone(),
            metrics: attributes.metrics.clone(),
        }))
    }

    async fn open(&self, id: &BlobId) -> Result<ByteStream, BlobStoreError> {
        let inner = self.inner.read();
        let blob = inner
            .blobs
            .get(id)
            .ok_or_else(|| BlobStoreError::NotFound(id.clone()))?;
        let content = blob
            .content
            .clone()
            .ok_or_else(|| BlobStoreError::Deleted(id.clone()))?;
        if blob.unreadable {
            let err = std::io::Error::new(std::io::ErrorKind::Other, "content unreadable");
            return Ok(stream::iter([Err(BlobStoreError::Io(err))]).boxed());
        }
        Ok(stream::iter([Ok(content)]).boxed())
    }

    async fn attributes(&self, id: &BlobId) -> Result<Option<BlobAttributes>, BlobStoreError> {
        Ok(self
            .inner
            .read()
            .blobs
            .get(id)
            .and_then(|blob| blob.attributes.clone()))
    }

    fn blob_ids(&self) -> BlobIdStream<'_> {
        stream::iter(self.snapshot_ids(None).into_iter().map(Ok)).boxed()
    }

    fn blob_ids_updated_since(&self, days: u32) -> BlobIdStream<'_> {
        stream::iter(self.snapshot_ids(super::days_ago(days)).into_iter().map(Ok)).boxed()
    }

    async fn delete(&self, id: &BlobId, reason: &str) -> Result<bool, BlobStoreError> {
        let mut inner = self.inner.write();
        let Some(blob) = inner.blobs.get_mut(id) else {
            return Ok(false);
        };
        let Some(attributes) = blob.attributes.as_mut() else {
            return Ok(false);
        };
        if attributes.deleted {
            return Ok(false);
        }
        attributes.mark_deleted(reason);
        blob.updated = Utc::now();
        tracing::debug!(blob_store = %self.name, blob_id = %id, reason, "soft deleted blob");
        Ok(true)
    }

    async fn delete_hard(&self, id: &BlobId) -> Result<bool, BlobStoreError> {
        let removed = self.inner.write().blobs.remove(id).is_some();
        if removed {
            tracing::debug!(blob_store = %self.name, blob_id = %id, "hard deleted blob");
        }
        Ok(removed)
    }

    async fn undelete(
        &self,
        checker: Option<&dyn BlobStoreUsageChecker>,
        id: &BlobId,
        attributes: &BlobAttributes,
        dry_run: bool,
    ) -> Result<bool, BlobStoreError> {
        if !confirm_undelete(&self.name, checker, id, attributes, dry_run).await {
            return Ok(false);
        }
        if dry_run {
            return Ok(true);
        }
        let mut inner = self.inner.write();
        let Some(blob) = inner.blobs.get_mut(id) else {
            return Ok(false);
        };
        if let Some(stored) = blob.attributes.as_mut() {
            stored.clear_deleted();
        }
        blob.updated = Utc::now();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BLOB_NAME_HEADER, REPO_NAME_HEADER};
    use chrono::Duration;
    use futures::TryStreamExt;

    fn headers(name: &str) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert(BLOB_NAME_HEADER.to_string(), name.to_string());
        headers.insert(REPO_NAME_HEADER.to_string(), "repo".to_string());
        headers
    }

    async fn read_all(store: &MemoryBlobStore, id: &BlobId) -> Result<Vec<u8>, BlobStoreError> {
        let chunks: Vec<Bytes> = store.open(id).await?.try_collect().await?;
        Ok(chunks.concat())
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let store = MemoryBlobStore::new("default");
        let blob = store
            .create(Bytes::from_static(b"hello"), headers("a.txt"))
            .await
            .unwrap();

        assert_eq!(read_all(&store, &blob.id).await.unwrap(), b"hello");
        assert_eq!(blob.metrics.content_size, 5);
        assert!(store.get(&blob.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_soft_delete_hides_blob() {
        let store = MemoryBlobStore::new("default");
        let blob = store
            .create(Bytes::from_static(b"x"), headers("a.txt"))
            .await
            .unwrap();

        assert!(store.delete(&blob.id, "test").await.unwrap());
        assert!(!store.delete(&blob.id, "again").await.unwrap());
        assert!(store.get(&blob.id).await.unwrap().is_none());
        assert!(store.get_with_deleted(&blob.id, true).await.unwrap().is_some());

        let attrs = store.attributes(&blob.id).await.unwrap().unwrap();
        assert!(attrs.deleted);
        assert_eq!(attrs.deleted_reason.as_deref(), Some("test"));
    }

    #[tokio::test]
    async fn test_dropped_content_reads_as_deleted() {
        let store = MemoryBlobStore::new("default");
        let blob = store
            .create(Bytes::from_static(b"x"), headers("a.txt"))
            .await
            .unwrap();
        store.drop_content(&blob.id);

        assert!(matches!(
            read_all(&store, &blob.id).await,
            Err(BlobStoreError::Deleted(_))
        ));
    }

    #[tokio::test]
    async fn test_undelete_without_checker() {
        let store = MemoryBlobStore::new("default");
        let blob = store
            .create(Bytes::from_static(b"x"), headers("a.txt"))
            .await
            .unwrap();
        store.delete(&blob.id, "test").await.unwrap();
        let attrs = store.attributes(&blob.id).await.unwrap().unwrap();

        // dry run reports success without touching the flag
        assert!(store.undelete(None, &blob.id, &attrs, true).await.unwrap());
        assert!(store.attributes(&blob.id).await.unwrap().unwrap().deleted);

        assert!(store.undelete(None, &blob.id, &attrs, false).await.unwrap());
        assert!(!store.attributes(&blob.id).await.unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn test_updated_since_filter() {
        let store = MemoryBlobStore::new("default");
        let old = store
            .create(Bytes::from_static(b"old"), headers("old.txt"))
            .await
            .unwrap();
        let new = store
            .create(Bytes::from_static(b"new"), headers("new.txt"))
            .await
            .unwrap();
        store.set_updated(&old.id, Utc::now() - Duration::days(10));

        let recent: Vec<BlobId> = store.blob_ids_updated_since(2).try_collect().await.unwrap();
        assert_eq!(recent, vec![new.id.clone()]);

        let all: Vec<BlobId> = store.blob_ids().try_collect().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
