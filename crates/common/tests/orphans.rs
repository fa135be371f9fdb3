//! Integration tests for the orphaned blob finder

mod common;

use std::sync::Arc;

use ::common::blob::{BlobStore, MemoryBlobStore};
use ::common::content::{MetadataStore, Repository, RepositoryKind};
use ::common::orphans::{OrphanCollector, OrphanError, OrphanReason, OrphanedBlobFinder};

use crate::common::{TestEnv, REPO, STORE};

#[tokio::test]
async fn test_detect_reports_only_unreferenced_blob() {
    let env = TestEnv::new().await;
    let (_, referenced) = env.add_asset(REPO, "a.txt", b"alpha").await;
    let orphan = env.write_blob(REPO, "lost.txt", b"lost").await;

    let finder = OrphanedBlobFinder::new(env.manager(), env.metadata());
    let collector = OrphanCollector::new();
    let stats = finder
        .detect(&env.repository(REPO).await, &collector)
        .await
        .unwrap();
    assert_eq!(stats.scanned, 2);

    let orphans = collector.into_inner();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].blob_id, orphan.id);
    assert_eq!(orphans[0].reason, OrphanReason::AssetMissing);
    assert_ne!(orphans[0].blob_id, referenced.id);
}

#[tokio::test]
async fn test_delete_removes_only_unreferenced_blob() {
    let env = TestEnv::new().await;
    let (_, referenced) = env.add_asset(REPO, "a.txt", b"alpha").await;
    let orphan = env.write_blob(REPO, "lost.txt", b"lost").await;

    let finder = OrphanedBlobFinder::new(env.manager(), env.metadata());
    let stats = finder.delete(&env.repository(REPO).await).await.unwrap();
    assert_eq!(stats.orphans, 1);

    assert!(!env.blobs.contains(&orphan.id));
    assert!(env.blobs.contains(&referenced.id));
    assert!(env.blobs.get(&referenced.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_replaced_blob_is_orphaned() {
    let env = TestEnv::new().await;
    let (_, old) = env.add_asset(REPO, "a.txt", b"v1").await;
    let (_, new) = env.add_asset(REPO, "a.txt", b"v2").await;

    let finder = OrphanedBlobFinder::new(env.manager(), env.metadata());
    let collector = OrphanCollector::new();
    finder
        .detect(&env.repository(REPO).await, &collector)
        .await
        .unwrap();

    let orphans = collector.into_inner();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].blob_id, old.id);
    assert_eq!(orphans[0].reason, OrphanReason::BlobRefChanged);
    assert_ne!(orphans[0].blob_id, new.id);
}

#[tokio::test]
async fn test_leading_slash_header_still_matches_asset() {
    let env = TestEnv::new().await;
    let blob = env.write_blob(REPO, "/a.txt", b"alpha").await;
    let asset = ::common::content::Asset::new(REPO, "a.txt").with_blob(
        ::common::content::BlobRef::new(STORE, blob.id.clone()),
        blob.metrics.sha1.as_deref().unwrap(),
    );
    env.metadata.save_asset(asset).await.unwrap();

    let finder = OrphanedBlobFinder::new(env.manager(), env.metadata());
    let collector = OrphanCollector::new();
    finder
        .detect(&env.repository(REPO).await, &collector)
        .await
        .unwrap();
    assert!(collector.into_inner().is_empty());
}

#[tokio::test]
async fn test_soft_deleted_orphan_is_left_alone() {
    let env = TestEnv::new().await;
    let orphan = env.write_blob(REPO, "lost.txt", b"lost").await;
    env.blobs.delete(&orphan.id, "cleanup").await.unwrap();

    let finder = OrphanedBlobFinder::new(env.manager(), env.metadata());
    let stats = finder.delete(&env.repository(REPO).await).await.unwrap();
    assert_eq!(stats.orphans, 0);
    assert!(env.blobs.contains(&orphan.id));
}

#[tokio::test]
async fn test_other_repository_blobs_are_out_of_scope() {
    let env = TestEnv::new().await;
    env.add_repository(Repository::hosted("other", "raw", STORE))
        .await;
    let theirs = env.write_blob("other", "x.txt", b"x").await;

    let finder = OrphanedBlobFinder::new(env.manager(), env.metadata());
    let stats = finder.delete(&env.repository(REPO).await).await.unwrap();
    assert_eq!(stats.orphans, 0);
    assert!(env.blobs.contains(&theirs.id));
}

#[tokio::test]
async fn test_missing_blob_store_name_is_fatal() {
    let env = TestEnv::new().await;
    let finder = OrphanedBlobFinder::new(env.manager(), env.metadata());
    let mut repository = Repository::hosted("blank", "raw", "  ");
    let collector = OrphanCollector::new();

    let err = finder.detect(&repository, &collector).await.unwrap_err();
    assert!(matches!(err, OrphanError::MissingBlobStoreName(name) if name == "blank"));

    repository.blob_store_name = None;
    repository.kind = RepositoryKind::Group;
    assert!(matches!(
        finder.delete(&repository).await,
        Err(OrphanError::MissingBlobStoreName(_))
    ));
}

#[tokio::test]
async fn test_delete_all_covers_every_store_and_removed_repositories() {
    let env = TestEnv::new().await;
    let (_, kept) = env.add_asset(REPO, "a.txt", b"alpha").await;
    let stray = env.write_blob(REPO, "stray.txt", b"stray").await;
    let abandoned = env.write_blob("deleted-repo", "x.txt", b"x").await;

    let second = Arc::new(MemoryBlobStore::new("second"));
    let mut headers = std::collections::BTreeMap::new();
    headers.insert(
        ::common::blob::BLOB_NAME_HEADER.to_string(),
        "y.txt".to_string(),
    );
    headers.insert(
        ::common::blob::REPO_NAME_HEADER.to_string(),
        "gone".to_string(),
    );
    let elsewhere = second
        .create(bytes::Bytes::from_static(b"y"), headers)
        .await
        .unwrap();

    let manager = env.manager().with_store(second.clone());
    let finder = OrphanedBlobFinder::new(manager, env.metadata());
    let results = finder.delete_all().await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[STORE].orphans, 2);
    assert_eq!(results["second"].orphans, 1);
    assert!(env.blobs.contains(&kept.id));
    assert!(!env.blobs.contains(&stray.id));
    assert!(!env.blobs.contains(&abandoned.id));
    assert!(!second.contains(&elsewhere.id));
    assert!(env.metadata.repository(REPO).await.unwrap().is_some());
}
