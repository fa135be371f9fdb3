//! Integration tests for the default integrity check strategy

mod common;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use ::common::blob::BlobStore;
use ::common::content::{Asset, BlobRef, MetadataStore, Repository};
use ::common::restore::{
    DefaultIntegrityCheckStrategy, IntegrityCheckStrategy, IntegrityError,
    IntegrityFailureHandler,
};
use ::common::task::CancellationToken;

use crate::common::{TestEnv, REPO};

#[derive(Default)]
struct Recorder {
    failures: Mutex<Vec<(String, IntegrityError)>>,
}

impl Recorder {
    fn failures(&self) -> Vec<(String, IntegrityError)> {
        self.failures.lock().clone()
    }
}

#[async_trait]
impl IntegrityFailureHandler for Recorder {
    async fn on_failure(&self, _repository: &Repository, asset: &Asset, reason: &IntegrityError) {
        self.failures
            .lock()
            .push((asset.path.clone(), reason.clone()));
    }
}

async fn run(env: &TestEnv, cancel: &CancellationToken, since_days: Option<u32>) -> Recorder {
    let recorder = Recorder::default();
    let strategy = DefaultIntegrityCheckStrategy::new(env.metadata()).with_page_size(2);
    strategy
        .check(
            &env.repository(REPO).await,
            env.blobs.as_ref(),
            cancel,
            since_days,
            &recorder,
        )
        .await
        .unwrap();
    recorder
}

#[tokio::test]
async fn test_consistent_assets_pass() {
    let env = TestEnv::new().await;
    env.add_asset(REPO, "a.txt", b"a").await;
    env.add_asset(REPO, "/b.txt", b"b").await;
    env.add_asset(REPO, "c.txt", b"c").await;

    let recorder = run(&env, &CancellationToken::new(), None).await;
    assert!(recorder.failures().is_empty());
}

#[tokio::test]
async fn test_each_failure_reason_reaches_handler() {
    let env = TestEnv::new().await;
    let (_, no_attrs) = env.add_asset(REPO, "1-no-attrs.txt", b"1").await;
    env.blobs.drop_attributes(&no_attrs.id);
    let (_, deleted) = env.add_asset(REPO, "2-deleted.txt", b"2").await;
    env.blobs.delete(&deleted.id, "test").await.unwrap();
    let (_, missing) = env.add_asset(REPO, "3-data-missing.txt", b"3").await;
    env.blobs.drop_content(&missing.id);

    // asset name disagrees with the blob header
    let renamed = env.write_blob(REPO, "original.txt", b"4").await;
    env.metadata
        .save_asset(Asset::new(REPO, "4-renamed.txt").with_blob(
            BlobRef::new(crate::common::STORE, renamed.id.clone()),
            renamed.metrics.sha1.as_deref().unwrap(),
        ))
        .await
        .unwrap();

    let recorder = run(&env, &CancellationToken::new(), None).await;
    let failures = recorder.failures();
    assert_eq!(failures.len(), 4);
    assert_eq!(failures[0], ("1-no-attrs.txt".to_string(), IntegrityError::PropertiesMissing));
    assert_eq!(failures[1], ("2-deleted.txt".to_string(), IntegrityError::MarkedDeleted));
    assert_eq!(failures[2], ("3-data-missing.txt".to_string(), IntegrityError::DataMissing));
    assert!(matches!(failures[3].1, IntegrityError::NameMismatch { .. }));
}

#[tokio::test]
async fn test_missing_blob_ref_is_a_failure() {
    let env = TestEnv::new().await;
    env.metadata
        .save_asset(Asset::new(REPO, "orphan-asset.txt"))
        .await
        .unwrap();

    let recorder = run(&env, &CancellationToken::new(), None).await;
    let failures = recorder.failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].1, IntegrityError::ErrorAccessingBlob(_)));
}

#[tokio::test]
async fn test_cancelled_check_calls_no_handler() {
    let env = TestEnv::new().await;
    let (_, broken) = env.add_asset(REPO, "a.txt", b"a").await;
    env.blobs.drop_content(&broken.id);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let recorder = Recorder::default();
    let report = DefaultIntegrityCheckStrategy::new(env.metadata())
        .check(
            &env.repository(REPO).await,
            env.blobs.as_ref(),
            &cancel,
            None,
            &recorder,
        )
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.checked, 0);
    assert!(recorder.failures().is_empty());
}

#[tokio::test]
async fn test_since_days_skips_older_blobs() {
    let env = TestEnv::new().await;
    let (mut old, old_blob) = env.add_asset(REPO, "old.txt", b"old").await;
    env.blobs.drop_content(&old_blob.id);
    old.blob_created = Some(Utc::now() - Duration::days(30));
    env.metadata.save_asset(old).await.unwrap();
    let (_, recent) = env.add_asset(REPO, "recent.txt", b"recent").await;
    env.blobs.drop_content(&recent.id);

    let recorder = run(&env, &CancellationToken::new(), Some(7)).await;
    let failures = recorder.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "recent.txt");

    let recorder = run(&env, &CancellationToken::new(), None).await;
    assert_eq!(recorder.failures().len(), 2);
}
