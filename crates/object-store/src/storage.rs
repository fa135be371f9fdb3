//! Object storage backend abstraction (S3/MinIO/local filesystem/memory).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};

use crate::error::{ObjectBlobStoreError, Result};

const CONTENT_PREFIX: &str = "content/";
const CONTENT_SUFFIX: &str = ".bytes";
const HEADERS_SUFFIX: &str = ".properties";

/// Configuration for the object storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    /// In-memory storage (for testing)
    #[default]
    Memory,

    /// Local filesystem storage
    Filesystem {
        /// Path to the storage directory
        path: PathBuf,
    },

    /// S3-compatible storage (AWS S3, MinIO, etc.)
    S3 {
        /// S3 endpoint URL (e.g., "http://localhost:9000" for MinIO)
        endpoint: String,
        access_key: String,
        secret_key: String,
        bucket: String,
        /// Optional region (defaults to "us-east-1")
        region: Option<String>,
    },
}

/// Wrapper around different object storage backends.
#[derive(Debug, Clone)]
pub(crate) struct Storage {
    inner: Arc<dyn ObjectStore>,
}

impl Storage {
    pub async fn new(config: ObjectStoreConfig) -> Result<Self> {
        let inner: Arc<dyn ObjectStore> = match &config {
            ObjectStoreConfig::Memory => Arc::new(InMemory::new()),

            ObjectStoreConfig::Filesystem { path } => {
                tokio::fs::create_dir_all(path).await?;
                Arc::new(
                    LocalFileSystem::new_with_prefix(path)
                        .map_err(|e| ObjectBlobStoreError::InvalidConfig(e.to_string()))?,
                )
            }

            ObjectStoreConfig::S3 {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region,
            } => {
                let builder = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key)
                    .with_bucket_name(bucket)
                    .with_region(region.as_deref().unwrap_or("us-east-1"))
                    .with_allow_http(endpoint.starts_with("http://"));

                let store: Arc<dyn ObjectStore> = Arc::new(
                    builder
                        .build()
                        .map_err(|e| ObjectBlobStoreError::InvalidConfig(e.to_string()))?,
                );

                // Fail fast when the bucket is missing
                let prefix = ObjectPath::from("");
                let mut stream = store.list(Some(&prefix));
                match stream.try_next().await {
                    Ok(_) => {}
                    Err(object_store::Error::NotFound { .. }) => {
                        return Err(ObjectBlobStoreError::BucketNotFound(bucket.clone()));
                    }
                    Err(e) => {
                        let msg = e.to_string();
                        if msg.contains("NoSuchBucket") {
                            return Err(ObjectBlobStoreError::BucketNotFound(bucket.clone()));
                        }
                        return Err(e.into());
                    }
                }
                drop(stream);

                store
            }
        };

        Ok(Self { inner })
    }

    fn content_path(blob_id: &str) -> ObjectPath {
        ObjectPath::from(format!("{CONTENT_PREFIX}{blob_id}{CONTENT_SUFFIX}"))
    }

    fn headers_path(blob_id: &str) -> ObjectPath {
        ObjectPath::from(format!("{CONTENT_PREFIX}{blob_id}{HEADERS_SUFFIX}"))
    }

    pub async fn put_content(&self, blob_id: &str, data: Bytes) -> Result<()> {
        self.inner
            .put(&Self::content_path(blob_id), data.into())
            .await?;
        Ok(())
    }

    /// Stream the content. `None` when the object is gone.
    pub async fn open_content(
        &self,
        blob_id: &str,
    ) -> Result<Option<BoxStream<'static, object_store::Result<Bytes>>>> {
        match self.inner.get(&Self::content_path(blob_id)).await {
            Ok(result) => Ok(Some(result.into_stream())),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_content(&self, blob_id: &str) -> Result<Option<Bytes>> {
        match self.inner.get(&Self::content_path(blob_id)).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Headers are mirrored next to the content so a lost
    ///  attributes row can be rebuilt.
    pub async fn put_headers(&self, blob_id: &str, headers: &BTreeMap<String, String>) -> Result<()> {
        let json = serde_json::to_vec(headers).map_err(|source| {
            ObjectBlobStoreError::CorruptAttributes {
                blob_id: blob_id.to_string(),
                source,
            }
        })?;
        self.inner
            .put(&Self::headers_path(blob_id), Bytes::from(json).into())
            .await?;
        Ok(())
    }

    pub async fn get_headers(&self, blob_id: &str) -> Result<Option<BTreeMap<String, String>>> {
        let bytes = match self.inner.get(&Self::headers_path(blob_id)).await {
            Ok(result) => result.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let headers = serde_json::from_slice(&bytes).map_err(|source| {
            ObjectBlobStoreError::CorruptAttributes {
                blob_id: blob_id.to_string(),
                source,
            }
        })?;
        Ok(Some(headers))
    }

    /// Remove content and mirrored headers. Returns whether
    ///  content was present.
    pub async fn delete_content(&self, blob_id: &str) -> Result<bool> {
        let path = Self::content_path(blob_id);
        let existed = match self.inner.head(&path).await {
            Ok(_) => true,
            Err(object_store::Error::NotFound { .. }) => false,
            Err(e) => return Err(e.into()),
        };
        for path in [path, Self::headers_path(blob_id)] {
            match self.inner.delete(&path).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(existed)
    }

    /// Every blob id that has a content object.
    pub async fn list_content_ids(&self) -> Result<Vec<String>> {
        let prefix = ObjectPath::from(CONTENT_PREFIX);
        let items: Vec<_> = self.inner.list(Some(&prefix)).try_collect().await?;

        Ok(items
            .into_iter()
            .filter_map(|meta| {
                meta.location
                    .as_ref()
                    .strip_prefix(CONTENT_PREFIX)
                    .and_then(|name| name.strip_suffix(CONTENT_SUFFIX))
                    .map(str::to_string)
            })
            .collect())
    }
}

#[cfg(test)]
impl Storage {
    pub fn memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
        }
    }

    /// Remove only the content object
    pub async fn remove_content_object(&self, blob_id: &str) -> Result<()> {
        self.inner.delete(&Self::content_path(blob_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = Storage::memory();
        let data = Bytes::from("hello world");

        storage.put_content("abc", data.clone()).await.unwrap();
        assert_eq!(storage.get_content("abc").await.unwrap().unwrap(), data);

        let mut headers = BTreeMap::new();
        headers.insert("k".to_string(), "v".to_string());
        storage.put_headers("abc", &headers).await.unwrap();
        assert_eq!(storage.get_headers("abc").await.unwrap(), Some(headers));

        // the headers object is not listed as content
        assert_eq!(storage.list_content_ids().await.unwrap(), vec!["abc"]);

        assert!(storage.delete_content("abc").await.unwrap());
        assert!(!storage.delete_content("abc").await.unwrap());
        assert!(storage.get_content("abc").await.unwrap().is_none());
        assert!(storage.get_headers("abc").await.unwrap().is_none());
        assert!(storage.open_content("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_filesystem_storage_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = ObjectStoreConfig::Filesystem {
            path: temp_dir.path().to_path_buf(),
        };
        let storage = Storage::new(config).await.unwrap();

        storage
            .put_content("def", Bytes::from("test data"))
            .await
            .unwrap();
        assert!(temp_dir.path().join("content").join("def.bytes").exists());

        let chunks: Vec<Bytes> = storage
            .open_content("def")
            .await
            .unwrap()
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), b"test data");
    }
}
