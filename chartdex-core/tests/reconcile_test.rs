//! Publish and delete cycles against an in-memory store

mod common;

use anyhow::Result;
use chartdex_core::repo::{
    ChartMetadata, ChartUpload, ErrorKind, InitOptions, PublishOptions, PublishOutcome, RepoError,
    RepoUrl, Repository,
};
use common::{chart_archive, init_test_logging, RecordingStore};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const REPO: &str = "s3://bucket/charts";

async fn initialized_repo() -> Result<(Repository, Arc<RecordingStore>)> {
    init_test_logging();
    let store = Arc::new(RecordingStore::new());
    let repo = Repository::new(RepoUrl::parse(REPO)?, store.clone());
    repo.init(&InitOptions::default()).await?;
    Ok((repo, store))
}

fn foo_upload(digest: &str) -> ChartUpload {
    ChartUpload {
        metadata: ChartMetadata::new("foo", "1.2.3"),
        file_name: "foo-1.2.3.tgz".to_string(),
        digest: digest.to_string(),
        bytes: chart_archive("foo", "1.2.3"),
    }
}

#[tokio::test]
async fn test_publish_then_delete_end_to_end() -> Result<()> {
    let (repo, store) = initialized_repo().await?;

    let outcome = repo
        .publish(foo_upload("sha256:abc"), &PublishOptions::default())
        .await?;
    assert!(matches!(outcome, PublishOutcome::Published(_)));

    let index = repo.fetch_index().await?;
    let versions = index.get_versions("foo").expect("foo should be listed");
    assert_eq!(versions.len(), 1);

    let entry = &versions[0];
    assert_eq!(entry.name(), "foo");
    assert_eq!(entry.version(), "1.2.3");
    assert_eq!(entry.digest, "sha256:abc");
    assert_eq!(entry.urls, vec![format!("{REPO}/foo-1.2.3.tgz")]);
    assert!(store.inner.get("charts/foo-1.2.3.tgz").await.is_some());

    let location = repo.delete("foo", "1.2.3", None).await?;
    assert_eq!(location, format!("{REPO}/foo-1.2.3.tgz"));

    let index = repo.fetch_index().await?;
    assert!(!index.entries.contains_key("foo"));
    assert!(store.inner.get("charts/foo-1.2.3.tgz").await.is_none());

    Ok(())
}

#[tokio::test]
async fn test_publish_twice_without_override_conflicts() -> Result<()> {
    let (repo, store) = initialized_repo().await?;

    repo.publish(foo_upload("sha256:abc"), &PublishOptions::default())
        .await?;
    let index_before = store.inner.get("charts/index.yaml").await;
    let puts_before = store.puts();

    let err = repo
        .publish(foo_upload("sha256:def"), &PublishOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, RepoError::Conflict { .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(!err.is_retryable());
    assert_eq!(store.puts(), puts_before);
    assert_eq!(store.inner.get("charts/index.yaml").await, index_before);
    assert_eq!(
        repo.fetch_index().await?.get_version("foo", "1.2.3").unwrap().digest,
        "sha256:abc"
    );

    Ok(())
}

#[tokio::test]
async fn test_force_and_ignore_together_is_usage_error_before_io() -> Result<()> {
    init_test_logging();
    let store = Arc::new(RecordingStore::new());
    let repo = Repository::new(RepoUrl::parse(REPO)?, store.clone());

    let options = PublishOptions {
        force: true,
        ignore_if_exists: true,
        ..Default::default()
    };
    let err = repo
        .publish(foo_upload("sha256:abc"), &options)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Usage);
    assert_eq!(store.total_calls(), 0);

    Ok(())
}

#[tokio::test]
async fn test_ignore_if_exists_skips_upload() -> Result<()> {
    let (repo, store) = initialized_repo().await?;

    repo.publish(foo_upload("sha256:abc"), &PublishOptions::default())
        .await?;
    let puts_before = store.puts();

    let options = PublishOptions {
        ignore_if_exists: true,
        ..Default::default()
    };
    let outcome = repo.publish(foo_upload("sha256:def"), &options).await?;

    assert_eq!(outcome, PublishOutcome::AlreadyExists);
    assert_eq!(store.puts(), puts_before);

    Ok(())
}

#[tokio::test]
async fn test_publish_to_uninitialized_repository_fails() -> Result<()> {
    init_test_logging();
    let store = Arc::new(RecordingStore::new());
    let repo = Repository::new(RepoUrl::parse(REPO)?, store.clone());

    let err = repo
        .publish(foo_upload("sha256:abc"), &PublishOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, RepoError::IndexNotFound { .. }));
    assert_eq!(store.puts(), 0);
    assert!(store.inner.keys().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_delete_unknown_version_leaves_repository_alone() -> Result<()> {
    let (repo, store) = initialized_repo().await?;
    repo.publish(foo_upload("sha256:abc"), &PublishOptions::default())
        .await?;
    let puts_before = store.puts();

    let err = repo.delete("foo", "9.9.9", None).await.unwrap_err();

    assert!(matches!(err, RepoError::ChartNotFound { .. }));
    assert_eq!(store.deletes(), 0);
    assert_eq!(store.puts(), puts_before);
    assert!(repo.fetch_index().await?.contains("foo", "1.2.3"));

    Ok(())
}
