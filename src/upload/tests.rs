use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use blob_store::{BlobStorage, BlobStorageConfig, Bucket, PutResult, TenantBucket};
use bytes::Bytes;
use futures::{stream, stream::BoxStream, StreamExt};
use ulid::Ulid;

use super::{BlockUploadSession, UploadState};
use crate::{
    block::{
        meta::UPLOAD_SOURCE,
        sanitize::{COMPACTOR_SHARD_ID_LABEL, TENANT_ID_LABEL},
        BlockFilePath,
        BlockMeta,
        META_FILENAME,
        META_TEMP_FILENAME,
    },
    error::BlockUploadError,
    tenant::TenantId,
};

const BLOCK_ID: &str = "01FSJSQDEVB5F9TRW0GYQ4NCZA";
const TENANT: &str = "team-1";

/// Wraps a real bucket and fails selected operations on demand.
struct FaultyBucket {
    inner: TenantBucket,
    fail_exists: AtomicBool,
    fail_get: AtomicBool,
    fail_upload: AtomicBool,
    fail_upload_stream: AtomicBool,
    fail_delete: AtomicBool,
    writes: AtomicUsize,
}

impl FaultyBucket {
    fn new(inner: TenantBucket) -> Self {
        Self {
            inner,
            fail_exists: AtomicBool::new(false),
            fail_get: AtomicBool::new(false),
            fail_upload: AtomicBool::new(false),
            fail_upload_stream: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Bucket for FaultyBucket {
    async fn exists(&self, key: &str) -> Result<bool> {
        if self.fail_exists.load(Ordering::SeqCst) {
            return Err(anyhow!("exists failed"));
        }
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(anyhow!("get failed"));
        }
        self.inner.get(key).await
    }

    async fn upload(&self, key: &str, data: Bytes) -> Result<()> {
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(anyhow!("upload failed"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.upload(key, data).await
    }

    async fn upload_stream(
        &self,
        key: &str,
        data: BoxStream<'static, Result<Bytes>>,
        size: u64,
    ) -> Result<PutResult> {
        if self.fail_upload_stream.load(Ordering::SeqCst) {
            return Err(anyhow!("upstream store unavailable"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.upload_stream(key, data, size).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(anyhow!("delete failed"));
        }
        self.inner.delete(key).await
    }
}

struct TestSession {
    bucket: Arc<FaultyBucket>,
    session: BlockUploadSession,
}

impl TestSession {
    fn new() -> Result<Self> {
        let storage = BlobStorage::new(BlobStorageConfig::in_memory())?;
        let bucket = Arc::new(FaultyBucket::new(storage.tenant_bucket(TENANT)));
        let session = BlockUploadSession::new(
            bucket.clone(),
            TenantId::parse(TENANT)?,
            Ulid::from_string(BLOCK_ID)?,
        );
        Ok(Self { bucket, session })
    }

    async fn stored_meta(&self, name: &str) -> Result<Option<BlockMeta>> {
        let data = self.bucket.get(&format!("{}/{}", BLOCK_ID, name)).await?;
        Ok(data.map(|d| BlockMeta::from_json(&d)).transpose()?)
    }
}

fn body(data: &'static [u8]) -> BoxStream<'static, Result<Bytes>> {
    stream::once(async move { Ok(Bytes::from_static(data)) }).boxed()
}

fn path(raw: &str) -> BlockFilePath {
    BlockFilePath::parse(Some(raw)).unwrap()
}

#[tokio::test]
async fn test_create_stages_sanitized_meta() -> Result<()> {
    let t = TestSession::new()?;
    assert_eq!(UploadState::NotStarted, t.session.state().await?);

    t.session
        .create(br#"{"ulid": "00000000000000000000000000", "thanos": {"labels": {"__org_id__": "other"}, "source": "receive"}}"#)
        .await?;

    assert_eq!(UploadState::InProgress, t.session.state().await?);
    assert!(t.stored_meta(META_FILENAME).await?.is_none());
    let staged = t.stored_meta(META_TEMP_FILENAME).await?.unwrap();
    assert_eq!(BLOCK_ID, staged.ulid.to_string());
    assert_eq!(TENANT, staged.labels().unwrap()[TENANT_ID_LABEL]);
    assert_eq!(UPLOAD_SOURCE, staged.thanos.source);
    Ok(())
}

#[tokio::test]
async fn test_create_rejects_complete_block_without_writing() -> Result<()> {
    let t = TestSession::new()?;
    t.bucket
        .inner
        .upload(&format!("{}/{}", BLOCK_ID, META_FILENAME), Bytes::from_static(b"{}"))
        .await?;

    let res = t.session.create(b"{}").await;

    assert!(matches!(res, Err(BlockUploadError::AlreadyComplete)));
    assert_eq!(0, t.bucket.writes.load(Ordering::SeqCst));
    assert!(t.stored_meta(META_TEMP_FILENAME).await?.is_none());
    assert_eq!(UploadState::Complete, t.session.state().await?);
    Ok(())
}

#[tokio::test]
async fn test_create_rejects_bad_descriptors_without_writing() -> Result<()> {
    let t = TestSession::new()?;

    for doc in [&b"{not json"[..], &b"[]"[..], &b"null"[..], &b"42"[..]] {
        let res = t.session.create(doc).await;
        assert!(matches!(res, Err(BlockUploadError::MalformedBody(_))));
    }

    let res = t
        .session
        .create(br#"{"thanos": {"labels": {"__org_id__": "x", "__compactor_shard_id__": "1", "__ingester_id__": "i1", "foo": "bar"}}}"#)
        .await;
    match res {
        Err(BlockUploadError::UnsupportedLabels(labels)) => assert_eq!(vec!["foo"], labels),
        other => panic!("expected unsupported labels, got {other:?}"),
    }

    assert_eq!(0, t.bucket.writes.load(Ordering::SeqCst));
    assert_eq!(UploadState::NotStarted, t.session.state().await?);
    Ok(())
}

#[tokio::test]
async fn test_create_again_replaces_staged_meta() -> Result<()> {
    let t = TestSession::new()?;
    t.session
        .create(br#"{"minTime": 1, "thanos": {"labels": {"__compactor_shard_id__": "1_of_2"}}}"#)
        .await?;
    t.session.create(br#"{"minTime": 2}"#).await?;

    let published = t.session.complete().await?;

    assert_eq!(2, published.min_time);
    let labels = published.labels().unwrap();
    assert!(!labels.contains_key(COMPACTOR_SHARD_ID_LABEL));
    assert_eq!(Some(published), t.stored_meta(META_FILENAME).await?);
    Ok(())
}

#[tokio::test]
async fn test_upload_file_requires_started_session() -> Result<()> {
    let t = TestSession::new()?;

    let res = t.session.upload_file(&path("index"), body(b"data"), 4).await;

    assert!(matches!(res, Err(BlockUploadError::NotStarted(_))));
    assert_eq!(0, t.bucket.writes.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn test_upload_file_writes_to_final_location() -> Result<()> {
    let t = TestSession::new()?;
    t.session.create(b"{}").await?;

    let res = t
        .session
        .upload_file(&path("chunks/000001"), body(b"chunkdata"), 9)
        .await?;
    assert_eq!(9, res.size_bytes);

    // Re-uploading the same path overwrites it.
    t.session
        .upload_file(&path("chunks/000001"), body(b"newdata"), 7)
        .await?;

    let stored = t
        .bucket
        .get(&format!("{}/chunks/000001", BLOCK_ID))
        .await?
        .unwrap();
    assert_eq!(Bytes::from_static(b"newdata"), stored);
    assert_eq!(UploadState::InProgress, t.session.state().await?);
    Ok(())
}

#[tokio::test]
async fn test_upload_file_with_corrupt_staged_meta() -> Result<()> {
    let t = TestSession::new()?;
    t.bucket
        .inner
        .upload(
            &format!("{}/{}", BLOCK_ID, META_TEMP_FILENAME),
            Bytes::from_static(b"garbage"),
        )
        .await?;

    let res = t.session.upload_file(&path("index"), body(b"data"), 4).await;

    assert!(matches!(res, Err(BlockUploadError::StorageUnavailable(_))));
    Ok(())
}

#[tokio::test]
async fn test_upload_file_store_failure_is_gateway_error() -> Result<()> {
    let t = TestSession::new()?;
    t.session.create(b"{}").await?;
    t.bucket.fail_upload_stream.store(true, Ordering::SeqCst);

    let res = t.session.upload_file(&path("index"), body(b"data"), 4).await;

    assert!(matches!(res, Err(BlockUploadError::UploadFailed(_))));
    Ok(())
}

#[tokio::test]
async fn test_upload_file_body_failure_is_gateway_error() -> Result<()> {
    let t = TestSession::new()?;
    t.session.create(b"{}").await?;
    let broken = stream::iter(vec![
        Ok(Bytes::from_static(b"da")),
        Err(anyhow!("client went away")),
    ])
    .boxed();

    let res = t.session.upload_file(&path("index"), broken, 4).await;

    assert!(matches!(res, Err(BlockUploadError::UploadFailed(_))));
    assert!(t.bucket.get(&format!("{}/index", BLOCK_ID)).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_complete_publishes_and_removes_staged_meta() -> Result<()> {
    let t = TestSession::new()?;
    t.session
        .create(br#"{"thanos": {"files": [{"rel_path": "index", "size_bytes": 4}]}}"#)
        .await?;
    t.session.upload_file(&path("index"), body(b"data"), 4).await?;

    let published = t.session.complete().await?;

    assert_eq!(1, published.thanos.files.len());
    assert_eq!(UploadState::Complete, t.session.state().await?);
    assert!(t.stored_meta(META_TEMP_FILENAME).await?.is_none());
    assert_eq!(Some(published), t.stored_meta(META_FILENAME).await?);

    // A second completion finds nothing staged.
    let res = t.session.complete().await;
    assert!(matches!(res, Err(BlockUploadError::NotStarted(_))));
    Ok(())
}

#[tokio::test]
async fn test_complete_without_create() -> Result<()> {
    let t = TestSession::new()?;

    let res = t.session.complete().await;

    assert!(matches!(res, Err(BlockUploadError::NotStarted(_))));
    assert!(t.stored_meta(META_FILENAME).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_complete_keeps_published_meta_when_cleanup_fails() -> Result<()> {
    let t = TestSession::new()?;
    t.session.create(b"{}").await?;
    t.bucket.fail_delete.store(true, Ordering::SeqCst);

    let res = t.session.complete().await;

    assert!(matches!(res, Err(BlockUploadError::StorageUnavailable(_))));
    assert_eq!(UploadState::Complete, t.session.state().await?);
    assert!(t.stored_meta(META_TEMP_FILENAME).await?.is_some());

    // The leftover staged descriptor still admits file uploads.
    t.session.upload_file(&path("index"), body(b"data"), 4).await?;
    Ok(())
}

#[tokio::test]
async fn test_storage_errors_are_internal() -> Result<()> {
    let t = TestSession::new()?;
    t.bucket.fail_exists.store(true, Ordering::SeqCst);

    assert!(matches!(
        t.session.create(b"{}").await,
        Err(BlockUploadError::StorageUnavailable(_))
    ));
    assert!(matches!(
        t.session.upload_file(&path("index"), body(b"data"), 4).await,
        Err(BlockUploadError::StorageUnavailable(_))
    ));
    assert!(matches!(
        t.session.state().await,
        Err(BlockUploadError::StorageUnavailable(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_create_staging_failure_is_internal() -> Result<()> {
    let t = TestSession::new()?;
    t.bucket.fail_upload.store(true, Ordering::SeqCst);

    let res = t.session.create(b"{}").await;

    assert!(matches!(res, Err(BlockUploadError::StorageUnavailable(_))));
    assert_eq!(UploadState::NotStarted, t.session.state().await?);
    Ok(())
}

#[tokio::test]
async fn test_complete_publish_failure_keeps_staged_meta() -> Result<()> {
    let t = TestSession::new()?;
    t.session.create(b"{}").await?;
    t.bucket.fail_upload.store(true, Ordering::SeqCst);

    let res = t.session.complete().await;

    assert!(matches!(res, Err(BlockUploadError::StorageUnavailable(_))));
    assert_eq!(UploadState::InProgress, t.session.state().await?);
    assert!(t.stored_meta(META_TEMP_FILENAME).await?.is_some());

    t.bucket.fail_upload.store(false, Ordering::SeqCst);
    t.session.complete().await?;
    assert_eq!(UploadState::Complete, t.session.state().await?);
    Ok(())
}

#[tokio::test]
async fn test_complete_with_corrupt_staged_meta() -> Result<()> {
    let t = TestSession::new()?;
    t.bucket
        .inner
        .upload(
            &format!("{}/{}", BLOCK_ID, META_TEMP_FILENAME),
            Bytes::from_static(b"garbage"),
        )
        .await?;

    let res = t.session.complete().await;

    assert!(matches!(res, Err(BlockUploadError::StorageUnavailable(_))));
    assert!(t.stored_meta(META_FILENAME).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_read_failure_is_not_reported_as_not_started() -> Result<()> {
    let t = TestSession::new()?;
    t.session.create(b"{}").await?;
    t.bucket.fail_get.store(true, Ordering::SeqCst);

    assert!(matches!(
        t.session.complete().await,
        Err(BlockUploadError::StorageUnavailable(_))
    ));
    assert!(matches!(
        t.session.upload_file(&path("index"), body(b"data"), 4).await,
        Err(BlockUploadError::StorageUnavailable(_))
    ));
    Ok(())
}
