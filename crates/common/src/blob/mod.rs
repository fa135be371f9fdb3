use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

mod manager;
mod memory;

pub use manager::BlobStoreManager;
pub use memory::MemoryBlobStore;

use crate::task::DRY_RUN_PREFIX;

/// Prefix applied to header keys when exposed as properties
pub const HEADER_PREFIX: &str = "@";
/// Logical name (path) of the blob within its repository
pub const BLOB_NAME_HEADER: &str = "BlobStore.blob-name";
/// Name of the repository that wrote the blob
pub const REPO_NAME_HEADER: &str = "Bucket.repo-name";
pub const CREATED_BY_HEADER: &str = "BlobStore.created-by";
pub const CONTENT_TYPE_HEADER: &str = "BlobStore.content-type";

#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    /// The attributes survive but the content is gone
    #[error("blob has been deleted: {0}")]
    Deleted(BlobId),
    #[error("blob not found: {0}")]
    NotFound(BlobId),
    #[error("unsupported blob store operation: {0}")]
    Unsupported(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("blob store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Opaque identifier for a blob. Carries the creation time
///  when the store knows it; identity is the id string alone.
#[derive(Clone, Serialize, Deserialize)]
pub struct BlobId {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created: Option<DateTime<Utc>>,
}

impl BlobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created: None,
        }
    }

    pub fn with_created(id: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created: Some(created),
        }
    }

    /// Mint a fresh id stamped with the current time
    pub fn generate() -> Self {
        Self::with_created(uuid::Uuid::new_v4().to_string(), Utc::now())
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }
}

impl PartialEq for BlobId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BlobId {}

impl Hash for BlobId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for BlobId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BlobId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Debug for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlobId({})", self.id)
    }
}

impl Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

impl From<&str> for BlobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetrics {
    pub created: DateTime<Utc>,
    /// Hex encoded SHA1 of the content
    pub sha1: Option<String>,
    pub content_size: u64,
}

impl BlobMetrics {
    pub fn for_content(data: &[u8]) -> Self {
        Self {
            created: Utc::now(),
            sha1: Some(sha1_hex(data)),
            content_size: data.len() as u64,
        }
    }
}

/// Sidecar record kept next to every blob. Only the
///  owning store mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobAttributes {
    pub headers: BTreeMap<String, String>,
    pub metrics: BlobMetrics,
    pub deleted: bool,
    pub deleted_reason: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl BlobAttributes {
    pub fn new(headers: BTreeMap<String, String>, metrics: BlobMetrics) -> Self {
        Self {
            headers,
            metrics,
            deleted: false,
            deleted_reason: None,
            deleted_at: None,
        }
    }

    /// Flattened view: headers under their `@` prefixed keys,
    ///  followed by the metrics and the soft delete marker.
    pub fn properties(&self) -> BTreeMap<String, String> {
        let mut properties: BTreeMap<String, String> = self
            .headers
            .iter()
            .map(|(k, v)| (format!("{HEADER_PREFIX}{k}"), v.clone()))
            .collect();
        properties.insert(
            "creationTime".to_string(),
            self.metrics.created.timestamp_millis().to_string(),
        );
        if let Some(sha1) = &self.metrics.sha1 {
            properties.insert("sha1".to_string(), sha1.clone());
        }
        properties.insert("size".to_string(), self.metrics.content_size.to_string());
        if self.deleted {
            properties.insert("deleted".to_string(), "true".to_string());
            if let Some(reason) = &self.deleted_reason {
                properties.insert("deletedReason".to_string(), reason.clone());
            }
        }
        properties
    }

    pub fn blob_name(&self) -> Option<&str> {
        self.headers.get(BLOB_NAME_HEADER).map(String::as_str)
    }

    pub fn repository_name(&self) -> Option<&str> {
        self.headers.get(REPO_NAME_HEADER).map(String::as_str)
    }

    pub fn mark_deleted(&mut self, reason: &str) {
        self.deleted = true;
        self.deleted_reason = Some(reason.to_string());
        self.deleted_at = Some(Utc::now());
    }

    pub fn clear_deleted(&mut self) {
        self.deleted = false;
        self.deleted_reason = None;
        self.deleted_at = None;
    }
}

/// A handle on a stored blob. Content is read through
///  [`BlobStore::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub id: BlobId,
    pub headers: BTreeMap<String, String>,
    pub metrics: BlobMetrics,
}

pub type ByteStream = BoxStream<'static, Result<Bytes, BlobStoreError>>;
pub type BlobIdStream<'a> = BoxStream<'a, Result<BlobId, BlobStoreError>>;

#[async_trait]
pub trait BlobStore: Send + Sync + Debug {
    /// Configured name of the store
    fn name(&self) -> &str;

    async fn create(
        &self,
        data: Bytes,
        headers: BTreeMap<String, String>,
    ) -> Result<Blob, BlobStoreError>;

    /// Look up a live blob. Soft deleted blobs read as `None`.
    async fn get(&self, id: &BlobId) -> Result<Option<Blob>, BlobStoreError> {
        self.get_with_deleted(id, false).await
    }

    async fn get_with_deleted(
        &self,
        id: &BlobId,
        include_deleted: bool,
    ) -> Result<Option<Blob>, BlobStoreError>;

    /// Open the content of a blob.
    ///
    /// Should fail with `BlobStoreError::Deleted` when the attributes
    ///  exist but the content has been removed
    async fn open(&self, id: &BlobId) -> Result<ByteStream, BlobStoreError>;

    /// Attributes regardless of the soft delete flag
    async fn attributes(&self, id: &BlobId) -> Result<Option<BlobAttributes>, BlobStoreError>;

    /// Lazily enumerate every blob id in the store
    fn blob_ids(&self) -> BlobIdStream<'_>;

    /// Lazily enumerate blob ids whose attributes changed in the
    ///  last `days` days
    fn blob_ids_updated_since(&self, days: u32) -> BlobIdStream<'_>;

    /// Soft delete. Returns false when there was nothing to delete.
    async fn delete(&self, id: &BlobId, reason: &str) -> Result<bool, BlobStoreError>;

    async fn delete_hard(&self, id: &BlobId) -> Result<bool, BlobStoreError>;

    /// Reverse a soft delete, provided the checker still considers
    ///  the blob in use.
    async fn undelete(
        &self,
        checker: Option<&dyn BlobStoreUsageChecker>,
        id: &BlobId,
        attributes: &BlobAttributes,
        dry_run: bool,
    ) -> Result<bool, BlobStoreError>;
}

/// Answers whether a soft deleted blob is still referenced
///  by metadata and so should be brought back.
#[async_trait]
pub trait BlobStoreUsageChecker: Send + Sync {
    async fn in_use(&self, blob_store: &str, id: &BlobId, attributes: &BlobAttributes) -> bool;
}

/// Shared undelete decision used by store implementations:
///  the blob must be soft deleted, named, and still in use.
pub async fn confirm_undelete(
    blob_store: &str,
    checker: Option<&dyn BlobStoreUsageChecker>,
    id: &BlobId,
    attributes: &BlobAttributes,
    dry_run: bool,
) -> bool {
    let prefix = if dry_run { DRY_RUN_PREFIX } else { "" };
    let Some(blob_name) = attributes.blob_name() else {
        tracing::error!(blob_id = %id, "{prefix}property not present: {BLOB_NAME_HEADER}");
        return false;
    };
    if !attributes.deleted {
        return false;
    }
    if let Some(checker) = checker {
        if !checker.in_use(blob_store, id, attributes).await {
            tracing::debug!(
                blob_id = %id,
                blob_name,
                "{prefix}soft-deleted blob not in use, skipping undelete"
            );
            return false;
        }
    }
    tracing::warn!(
        blob_id = %id,
        blob_name,
        "{prefix}soft-deleted blob still in use, un-deleting"
    );
    true
}

/// The instant `days` days before now, or `None` when that lies
///  outside the representable range, meaning "no lower bound"
pub fn days_ago(days: u32) -> Option<DateTime<Utc>> {
    chrono::Duration::try_days(i64::from(days)).and_then(|age| Utc::now().checked_sub_signed(age))
}

pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_days_ago_out_of_range_is_unbounded() {
        assert!(days_ago(7).is_some_and(|t| t < Utc::now()));
        assert_eq!(days_ago(u32::MAX), None);
        assert_eq!(days_ago(100_000_000), None);
    }

    #[test]
    fn test_blob_id_identity_ignores_created() {
        let a = BlobId::new("abc");
        let b = BlobId::with_created("abc", Utc::now());
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "abc");
    }

    #[test]
    fn test_properties_prefix_headers() {
        let mut headers = BTreeMap::new();
        headers.insert(BLOB_NAME_HEADER.to_string(), "/a/b.txt".to_string());
        headers.insert(REPO_NAME_HEADER.to_string(), "raw-hosted".to_string());
        let attrs = BlobAttributes::new(headers, BlobMetrics::for_content(b"hello"));

        let props = attrs.properties();
        assert_eq!(props.get("@BlobStore.blob-name").unwrap(), "/a/b.txt");
        assert_eq!(props.get("@Bucket.repo-name").unwrap(), "raw-hosted");
        assert_eq!(props.get("size").unwrap(), "5");
        assert!(!props.contains_key("deleted"));
        assert_eq!(attrs.repository_name(), Some("raw-hosted"));
    }

    #[test]
    fn test_sha1_hex() {
        assert_eq!(
            sha1_hex(b"hello"),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }
}
