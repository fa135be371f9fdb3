//! Filesystem-backed blob store driven through the consistency tools

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use common::blob::{BlobStore, BlobStoreManager, BLOB_NAME_HEADER, REPO_NAME_HEADER};
use common::content::{Asset, BlobRef, MemoryMetadataStore, MetadataStore, Repository};
use common::dead_blobs::{DeadBlobFinder, ResultState};
use common::orphans::OrphanedBlobFinder;
use depot_object_store::ObjectBlobStore;
use futures::TryStreamExt;

const STORE: &str = "default";
const REPO: &str = "raw-hosted";

fn headers(name: &str) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert(BLOB_NAME_HEADER.to_string(), name.to_string());
    headers.insert(REPO_NAME_HEADER.to_string(), REPO.to_string());
    headers
}

#[tokio::test]
async fn test_recover_attributes_after_database_loss() {
    let temp_dir = tempfile::tempdir().unwrap();

    let (first, second) = {
        let store = ObjectBlobStore::new_local(STORE, temp_dir.path()).await.unwrap();
        let first = store
            .create(Bytes::from_static(b"blob one"), headers("one.txt"))
            .await
            .unwrap();
        let second = store
            .create(Bytes::from_static(b"blob two"), headers("two.txt"))
            .await
            .unwrap();
        store.close().await;
        (first, second)
    };

    assert!(temp_dir
        .path()
        .join("objects")
        .join("content")
        .join(format!("{}.bytes", first.id))
        .exists());

    for file in ["attributes.db", "attributes.db-wal", "attributes.db-shm"] {
        let _ = tokio::fs::remove_file(temp_dir.path().join(file)).await;
    }
    assert!(!temp_dir.path().join("attributes.db").exists());

    let store = ObjectBlobStore::new_local(STORE, temp_dir.path()).await.unwrap();
    assert_eq!(store.attribute_count().await.unwrap(), 0);

    let stats = store.recover_attributes().await.unwrap();
    assert_eq!(stats.found, 2);
    assert_eq!(stats.added, 2);
    assert_eq!(stats.existing, 0);
    assert_eq!(stats.errors, 0);

    let recovered = store.attributes(&second.id).await.unwrap().unwrap();
    assert_eq!(recovered.blob_name(), Some("two.txt"));
    assert_eq!(recovered.repository_name(), Some(REPO));
    assert_eq!(recovered.metrics.sha1, second.metrics.sha1);

    let ids: Vec<_> = store.blob_ids().try_collect().await.unwrap();
    assert_eq!(ids.len(), 2);

    let again = store.recover_attributes().await.unwrap();
    assert_eq!(again.found, 2);
    assert_eq!(again.added, 0);
    assert_eq!(again.existing, 2);
}

#[tokio::test]
async fn test_finders_run_against_object_store() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ObjectBlobStore::new_local(STORE, temp_dir.path()).await.unwrap());
    let metadata = Arc::new(MemoryMetadataStore::new());
    metadata
        .save_repository(Repository::hosted(REPO, "raw", STORE))
        .await
        .unwrap();

    let referenced = store
        .create(Bytes::from_static(b"alpha"), headers("a.txt"))
        .await
        .unwrap();
    metadata
        .save_asset(Asset::new(REPO, "a.txt").with_blob(
            BlobRef::new(STORE, referenced.id.clone()),
            referenced.metrics.sha1.as_deref().unwrap(),
        ))
        .await
        .unwrap();
    let stray = store
        .create(Bytes::from_static(b"stray"), headers("stray.txt"))
        .await
        .unwrap();

    let manager = BlobStoreManager::new().with_store(store.clone());
    let repository = metadata.repository(REPO).await.unwrap().unwrap();

    let dead = DeadBlobFinder::new(manager.clone(), metadata.clone());
    assert!(dead.find(&repository, false).await.unwrap().is_empty());

    let orphans = OrphanedBlobFinder::new(manager.clone(), metadata.clone());
    let stats = orphans.delete(&repository).await.unwrap();
    assert_eq!(stats.orphans, 1);
    assert!(store.attributes(&stray.id).await.unwrap().is_none());

    // content vanishing underneath an asset shows up as a dead blob
    tokio::fs::remove_file(
        temp_dir
            .path()
            .join("objects")
            .join("content")
            .join(format!("{}.bytes", referenced.id)),
    )
    .await
    .unwrap();
    let results = dead.find(&repository, false).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].state, ResultState::Deleted);
}
