//! ObjectBlobStore - `BlobStore` backed by SQLite attributes + object storage content.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{SubsecRound, Utc};
use common::blob::{
    confirm_undelete, days_ago, Blob, BlobAttributes, BlobId, BlobIdStream, BlobMetrics, BlobStore,
    BlobStoreError, BlobStoreUsageChecker, ByteStream,
};
use futures::{stream, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::{ObjectBlobStoreError, Result};
use crate::storage::{ObjectStoreConfig, Storage};

/// Rows fetched per id page
const ID_PAGE_SIZE: i64 = 500;

/// Statistics from a recovery operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    /// content objects found in storage
    pub found: usize,
    pub added: usize,
    pub existing: usize,
    pub errors: usize,
}

/// A named blob store keeping one attributes row per blob in SQLite
///  and the bytes in object storage at `content/<blob_id>.bytes`.
#[derive(Debug, Clone)]
pub struct ObjectBlobStore {
    name: String,
    db: Database,
    storage: Storage,
}

impl ObjectBlobStore {
    /// # Arguments
    /// * `name` - Name the store is registered under
    /// * `db_path` - Path to the SQLite attributes database
    /// * `config` - Object storage configuration (S3, MinIO, filesystem, or memory)
    pub async fn new(
        name: impl Into<String>,
        db_path: &Path,
        config: ObjectStoreConfig,
    ) -> Result<Self> {
        let db = Database::new(db_path).await?;
        let storage = Storage::new(config).await?;
        Ok(Self {
            name: name.into(),
            db,
            storage,
        })
    }

    /// Create a store with an in-memory SQLite database.
    pub async fn in_memory(name: impl Into<String>, config: ObjectStoreConfig) -> Result<Self> {
        let db = Database::in_memory().await?;
        let storage = Storage::new(config).await?;
        Ok(Self {
            name: name.into(),
            db,
            storage,
        })
    }

    /// Attributes at `data_dir/attributes.db`, objects under `data_dir/objects/`.
    pub async fn new_local(name: impl Into<String>, data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("attributes.db");
        let config = ObjectStoreConfig::Filesystem {
            path: data_dir.join("objects"),
        };
        Self::new(name, &db_path, config).await
    }

    /// Fully ephemeral store. Data is lost on drop.
    pub async fn new_ephemeral(name: impl Into<String>) -> Result<Self> {
        Self::in_memory(name, ObjectStoreConfig::Memory).await
    }

    /// Number of attribute rows, deleted or not
    pub async fn attribute_count(&self) -> Result<u64> {
        Ok(self.db.count().await?.max(0) as u64)
    }

    /// Release the attributes database. The store is unusable afterwards.
    pub async fn close(&self) {
        self.db.close().await;
    }

    /// Rebuild attribute rows for content objects that lost theirs.
    ///
    /// Headers come from the mirrored `.properties` object when it
    ///  survives; metrics are recomputed from the content.
    pub async fn recover_attributes(&self) -> Result<RecoveryStats> {
        let mut stats = RecoveryStats::default();
        let ids = self.storage.list_content_ids().await?;
        stats.found = ids.len();

        for blob_id in ids {
            if self.db.has_attributes(&blob_id).await? {
                stats.existing += 1;
                continue;
            }

            let data = match self.storage.get_content(&blob_id).await {
                Ok(Some(data)) => data,
                Ok(None) => {
                    warn!(blob_id = %blob_id, "blob listed but not found in storage");
                    stats.errors += 1;
                    continue;
                }
                Err(e) => {
                    warn!(blob_id = %blob_id, error = %e, "failed to read blob during recovery");
                    stats.errors += 1;
                    continue;
                }
            };

            let headers = match self.storage.get_headers(&blob_id).await {
                Ok(Some(headers)) => headers,
                Ok(None) => {
                    warn!(blob_id = %blob_id, "no mirrored headers, recovering without them");
                    BTreeMap::new()
                }
                Err(e) => {
                    warn!(blob_id = %blob_id, error = %e, "unreadable mirrored headers");
                    BTreeMap::new()
                }
            };

            let attributes = BlobAttributes::new(headers, BlobMetrics::for_content(&data));
            if let Err(e) = self.db.upsert_attributes(&blob_id, &attributes).await {
                warn!(blob_id = %blob_id, error = %e, "failed to insert recovered blob attributes");
                stats.errors += 1;
            } else {
                debug!(blob_id = %blob_id, size = data.len(), "recovered blob attributes");
                stats.added += 1;
            }
        }

        info!(
            blob_store = %self.name,
            found = stats.found,
            added = stats.added,
            existing = stats.existing,
            errors = stats.errors,
            "attribute recovery finished"
        );
        Ok(stats)
    }

    fn paged_ids(&self, updated_since: Option<i64>) -> BlobIdStream<'_> {
        let db = self.db.clone();
        stream::try_unfold(Some(0i64), move |cursor| {
            next_id_page(db.clone(), cursor, updated_since)
        })
        .try_flatten()
        .boxed()
    }
}

type IdPage = stream::Iter<std::vec::IntoIter<std::result::Result<BlobId, BlobStoreError>>>;

/// Fetch the page after `cursor`; a `None` cursor ends the listing.
async fn next_id_page(
    db: Database,
    cursor: Option<i64>,
    updated_since: Option<i64>,
) -> std::result::Result<Option<(IdPage, Option<i64>)>, BlobStoreError> {
    let Some(after) = cursor else {
        return Ok(None);
    };
    let page = db.page_blob_ids(after, updated_since, ID_PAGE_SIZE).await?;
    if page.is_empty() {
        return Ok(None);
    }
    let next = if (page.len() as i64) < ID_PAGE_SIZE {
        None
    } else {
        page.last().map(|row| row.rowid)
    };
    let ids: Vec<_> = page.iter().map(|row| Ok(row.id())).collect();
    Ok(Some((stream::iter(ids), next)))
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create(
        &self,
        data: Bytes,
        headers: BTreeMap<String, String>,
    ) -> std::result::Result<Blob, BlobStoreError> {
        // millisecond precision survives the round trip through SQLite
        let created = Utc::now().trunc_subsecs(3);
        let id = BlobId::with_created(BlobId::generate().as_str(), created);
        let mut metrics = BlobMetrics::for_content(&data);
        metrics.created = created;
        let attributes = BlobAttributes::new(headers.clone(), metrics);

        self.storage.put_content(id.as_str(), data).await?;
        self.storage.put_headers(id.as_str(), &headers).await?;
        self.db.upsert_attributes(id.as_str(), &attributes).await?;

        debug!(
            blob_store = %self.name,
            blob_id = %id,
            size = attributes.metrics.content_size,
            "created blob"
        );
        Ok(Blob {
            id,
            headers,
            metrics: attributes.metrics,
        })
    }

    async fn get_with_deleted(
        &self,
        id: &BlobId,
        include_deleted: bool,
    ) -> std::result::Result<Option<Blob>, BlobStoreError> {
        let Some(row) = self.db.get_attributes(id.as_str()).await? else {
            return Ok(None);
        };
        if row.attributes.deleted && !include_deleted {
            return Ok(None);
        }
        Ok(Some(Blob {
            id: row.id(),
            headers: row.attributes.headers,
            metrics: row.attributes.metrics,
        }))
    }

    async fn open(&self, id: &BlobId) -> std::result::Result<ByteStream, BlobStoreError> {
        if !self.db.has_attributes(id.as_str()).await? {
            return Err(BlobStoreError::NotFound(id.clone()));
        }
        let Some(content) = self.storage.open_content(id.as_str()).await? else {
            return Err(BlobStoreError::Deleted(id.clone()));
        };
        Ok(content
            .map_err(|e| BlobStoreError::from(ObjectBlobStoreError::from(e)))
            .boxed())
    }

    async fn attributes(
        &self,
        id: &BlobId,
    ) -> std::result::Result<Option<BlobAttributes>, BlobStoreError> {
        Ok(self
            .db
            .get_attributes(id.as_str())
            .await?
            .map(|row| row.attributes))
    }

    fn blob_ids(&self) -> BlobIdStream<'_> {
        self.paged_ids(None)
    }

    fn blob_ids_updated_since(&self, days: u32) -> BlobIdStream<'_> {
        self.paged_ids(days_ago(days).map(|since| since.timestamp_millis()))
    }

    async fn delete(&self, id: &BlobId, reason: &str) -> std::result::Result<bool, BlobStoreError> {
        let deleted = self.db.mark_deleted(id.as_str(), reason).await?;
        if deleted {
            debug!(blob_store = %self.name, blob_id = %id, reason, "soft deleted blob");
        }
        Ok(deleted)
    }

    async fn delete_hard(&self, id: &BlobId) -> std::result::Result<bool, BlobStoreError> {
        let had_content = self.storage.delete_content(id.as_str()).await?;
        let had_row = self.db.delete_attributes(id.as_str()).await?;
        let removed = had_content || had_row;
        if removed {
            info!(blob_store = %self.name, blob_id = %id, "hard deleted blob");
        }
        Ok(removed)
    }

    async fn undelete(
        &self,
        checker: Option<&dyn BlobStoreUsageChecker>,
        id: &BlobId,
        attributes: &BlobAttributes,
        dry_run: bool,
    ) -> std::result::Result<bool, BlobStoreError> {
        if !confirm_undelete(&self.name, checker, id, attributes, dry_run).await {
            return Ok(false);
        }
        if dry_run {
            return Ok(true);
        }
        Ok(self.db.clear_deleted(id.as_str()).await?)
    }
}

#[cfg(test)]
impl ObjectBlobStore {
    pub(crate) fn storage(&self) -> &Storage {
        &self.storage
    }

    pub(crate) fn database(&self) -> &Database {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::blob::{BLOB_NAME_HEADER, REPO_NAME_HEADER};

    fn headers(name: &str) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert(BLOB_NAME_HEADER.to_string(), name.to_string());
        headers.insert(REPO_NAME_HEADER.to_string(), "raw-hosted".to_string());
        headers
    }

    async fn read_all(store: &ObjectBlobStore, id: &BlobId) -> Vec<u8> {
        let chunks: Vec<Bytes> = store.open(id).await.unwrap().try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn test_create_get_open() {
        let store = ObjectBlobStore::new_ephemeral("default").await.unwrap();
        let blob = store
            .create(Bytes::from_static(b"hello"), headers("a.txt"))
            .await
            .unwrap();

        let fetched = store.get(&blob.id).await.unwrap().unwrap();
        assert_eq!(fetched, blob);
        assert_eq!(fetched.id.created(), Some(blob.metrics.created));
        assert_eq!(read_all(&store, &blob.id).await, b"hello");

        let attributes = store.attributes(&blob.id).await.unwrap().unwrap();
        assert_eq!(attributes.blob_name(), Some("a.txt"));
        assert_eq!(attributes.metrics.content_size, 5);
    }

    #[tokio::test]
    async fn test_soft_delete_hides_blob_but_keeps_attributes() {
        let store = ObjectBlobStore::new_ephemeral("default").await.unwrap();
        let blob = store
            .create(Bytes::from_static(b"x"), headers("a.txt"))
            .await
            .unwrap();

        assert!(store.delete(&blob.id, "cleanup").await.unwrap());
        assert!(!store.delete(&blob.id, "again").await.unwrap());
        assert!(store.get(&blob.id).await.unwrap().is_none());
        assert!(store.get_with_deleted(&blob.id, true).await.unwrap().is_some());
        let attributes = store.attributes(&blob.id).await.unwrap().unwrap();
        assert!(attributes.deleted);
        assert_eq!(attributes.deleted_reason.as_deref(), Some("cleanup"));
    }

    #[tokio::test]
    async fn test_open_distinguishes_deleted_from_missing() {
        let store = ObjectBlobStore::new_ephemeral("default").await.unwrap();
        let blob = store
            .create(Bytes::from_static(b"x"), headers("a.txt"))
            .await
            .unwrap();
        store
            .storage()
            .remove_content_object(blob.id.as_str())
            .await
            .unwrap();

        assert!(matches!(
            store.open(&blob.id).await,
            Err(BlobStoreError::Deleted(_))
        ));
        assert!(matches!(
            store.open(&BlobId::new("never")).await,
            Err(BlobStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_undelete_without_checker_restores() {
        let store = ObjectBlobStore::new_ephemeral("default").await.unwrap();
        let blob = store
            .create(Bytes::from_static(b"x"), headers("a.txt"))
            .await
            .unwrap();
        store.delete(&blob.id, "oops").await.unwrap();
        let attributes = store.attributes(&blob.id).await.unwrap().unwrap();

        assert!(store.undelete(None, &blob.id, &attributes, true).await.unwrap());
        assert!(store.get(&blob.id).await.unwrap().is_none());

        assert!(store.undelete(None, &blob.id, &attributes, false).await.unwrap());
        assert!(store.get(&blob.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_blob_ids_page_through_everything() {
        let store = ObjectBlobStore::new_ephemeral("default").await.unwrap();
        let mut created = Vec::new();
        for i in 0..(ID_PAGE_SIZE + 3) {
            let blob = store
                .create(Bytes::from(format!("blob {i}")), headers(&format!("{i}.txt")))
                .await
                .unwrap();
            created.push(blob.id);
        }

        let listed: Vec<BlobId> = store.blob_ids().try_collect().await.unwrap();
        assert_eq!(listed, created);
    }

    #[tokio::test]
    async fn test_blob_ids_updated_since() {
        let store = ObjectBlobStore::new_ephemeral("default").await.unwrap();
        let old = store
            .create(Bytes::from_static(b"old"), headers("old.txt"))
            .await
            .unwrap();
        let recent = store
            .create(Bytes::from_static(b"new"), headers("new.txt"))
            .await
            .unwrap();
        let long_ago = (Utc::now() - chrono::Duration::days(30)).timestamp_millis();
        store
            .database()
            .set_updated_at(old.id.as_str(), long_ago)
            .await
            .unwrap();

        let listed: Vec<BlobId> = store.blob_ids_updated_since(7).try_collect().await.unwrap();
        assert_eq!(listed, vec![recent.id]);
    }

    #[tokio::test]
    async fn test_hard_delete_removes_everything() {
        let store = ObjectBlobStore::new_ephemeral("default").await.unwrap();
        let blob = store
            .create(Bytes::from_static(b"x"), headers("a.txt"))
            .await
            .unwrap();

        assert!(store.delete_hard(&blob.id).await.unwrap());
        assert!(!store.delete_hard(&blob.id).await.unwrap());
        assert!(store.attributes(&blob.id).await.unwrap().is_none());
        assert!(store.storage().list_content_ids().await.unwrap().is_empty());
    }
}
