use std::collections::BTreeMap;
use std::fmt::{Debug, Display};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blob::BlobId;

mod maintenance;
mod memory;
mod usage;

pub use maintenance::{ContentMaintenance, MaintenanceError, MaintenanceService};
pub use memory::MemoryMetadataStore;
pub use usage::MetadataUsageChecker;

pub const SHA1: &str = "sha1";

#[derive(thiserror::Error, Debug)]
pub enum ContentError {
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),
    #[error("invalid continuation token: {0}")]
    InvalidToken(String),
    #[error("metadata store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Pointer from an asset to the blob holding its content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef {
    pub store: String,
    pub blob_id: BlobId,
}

impl BlobRef {
    pub fn new(store: impl Into<String>, blob_id: BlobId) -> Self {
        Self {
            store: store.into(),
            blob_id,
        }
    }
}

impl Display for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.store, self.blob_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryKind {
    Hosted,
    Proxy,
    Group,
}

impl Display for RepositoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RepositoryKind::Hosted => "hosted",
            RepositoryKind::Proxy => "proxy",
            RepositoryKind::Group => "group",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RepositoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hosted" => Ok(RepositoryKind::Hosted),
            "proxy" => Ok(RepositoryKind::Proxy),
            "group" => Ok(RepositoryKind::Group),
            other => Err(format!("unknown repository kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    /// Format name used to pick restore and integrity strategies
    pub format: String,
    pub kind: RepositoryKind,
    /// Storage attribute naming the backing blob store. Groups
    ///  have none.
    pub blob_store_name: Option<String>,
    pub started: bool,
}

impl Repository {
    pub fn hosted(name: &str, format: &str, blob_store: &str) -> Self {
        Self {
            name: name.to_string(),
            format: format.to_string(),
            kind: RepositoryKind::Hosted,
            blob_store_name: Some(blob_store.to_string()),
            started: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub repository: String,
    pub path: String,
    pub blob_ref: Option<BlobRef>,
    /// Algorithm -> hex digest
    pub checksums: BTreeMap<String, String>,
    pub blob_created: Option<DateTime<Utc>>,
}

impl Asset {
    pub fn new(repository: &str, path: &str) -> Self {
        Self {
            repository: repository.to_string(),
            path: path.to_string(),
            blob_ref: None,
            checksums: BTreeMap::new(),
            blob_created: None,
        }
    }

    pub fn with_blob(mut self, blob_ref: BlobRef, sha1: &str) -> Self {
        self.blob_created = blob_ref.blob_id.created();
        self.blob_ref = Some(blob_ref);
        self.checksums.insert(SHA1.to_string(), sha1.to_string());
        self
    }

    pub fn sha1(&self) -> Option<&str> {
        self.checksums.get(SHA1).map(String::as_str)
    }
}

/// One page of a browse plus the token for the next one
#[derive(Debug, Clone)]
pub struct Continuation<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

impl<T> Continuation<T> {
    pub fn is_last(&self) -> bool {
        self.next_token.is_none()
    }
}

#[async_trait]
pub trait MetadataStore: Send + Sync + Debug {
    async fn repository(&self, name: &str) -> Result<Option<Repository>, ContentError>;

    async fn repositories(&self) -> Result<Vec<Repository>, ContentError>;

    async fn repositories_for_blob_store(
        &self,
        blob_store: &str,
    ) -> Result<Vec<Repository>, ContentError> {
        Ok(self
            .repositories()
            .await?
            .into_iter()
            .filter(|repo| repo.blob_store_name.as_deref() == Some(blob_store))
            .collect())
    }

    async fn save_repository(&self, repository: Repository) -> Result<(), ContentError>;

    /// Page through the assets of a repository in path order.
    ///
    /// # Arguments
    /// * `limit` - Maximum number of assets in the page
    /// * `token` - Continuation token returned by the previous page
    async fn browse_assets(
        &self,
        repository: &str,
        limit: usize,
        token: Option<&str>,
    ) -> Result<Continuation<Asset>, ContentError>;

    async fn find_asset(&self, repository: &str, path: &str)
        -> Result<Option<Asset>, ContentError>;

    async fn find_asset_by_blob_ref(
        &self,
        repository: &str,
        blob_ref: &BlobRef,
    ) -> Result<Option<Asset>, ContentError>;

    /// Insert or replace by (repository, path)
    async fn save_asset(&self, asset: Asset) -> Result<(), ContentError>;

    async fn delete_asset(&self, repository: &str, path: &str) -> Result<bool, ContentError>;
}

/// Names compare equal with or without a single leading slash
pub fn normalize_name(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}

pub fn names_match(a: &str, b: &str) -> bool {
    normalize_name(a) == normalize_name(b)
}

/// Find an asset by a blob header name, trying the name as
///  given and then its slash variant
pub async fn find_asset_by_name(
    metadata: &dyn MetadataStore,
    repository: &str,
    name: &str,
) -> Result<Option<Asset>, ContentError> {
    if let Some(asset) = metadata.find_asset(repository, name).await? {
        return Ok(Some(asset));
    }
    let alternate = match name.strip_prefix('/') {
        Some(stripped) => stripped.to_string(),
        None => format!("/{name}"),
    };
    metadata.find_asset(repository, &alternate).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_single_leading_slash() {
        assert_eq!(normalize_name("/aa"), "aa");
        assert_eq!(normalize_name("aa"), "aa");
        assert_eq!(normalize_name("//aa"), "/aa");
        assert!(names_match("/aa", "aa"));
        assert!(!names_match("aa", "bb"));
    }

    #[test]
    fn test_repository_kind_parse() {
        assert_eq!("group".parse::<RepositoryKind>(), Ok(RepositoryKind::Group));
        assert!("nope".parse::<RepositoryKind>().is_err());
    }

    #[tokio::test]
    async fn test_find_asset_by_name_slash_variants() {
        let store = MemoryMetadataStore::new();
        store.save_asset(Asset::new("r", "a/b.txt")).await.unwrap();
        store.save_asset(Asset::new("r", "/c.txt")).await.unwrap();

        assert!(find_asset_by_name(&store, "r", "/a/b.txt").await.unwrap().is_some());
        assert!(find_asset_by_name(&store, "r", "c.txt").await.unwrap().is_some());
        assert!(find_asset_by_name(&store, "r", "d.txt").await.unwrap().is_none());
    }
}
