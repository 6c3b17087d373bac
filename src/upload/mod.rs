//! Block upload sessions.
//!
//! There is no session table: the state of an upload is derived from which
//! descriptor objects exist in the tenant's bucket.
//!
//! | state      | `<block>/meta.json.temp` | `<block>/meta.json` |
//! |------------|--------------------------|---------------------|
//! | NotStarted | absent                   | absent              |
//! | InProgress | present                  | absent              |
//! | Complete   | any                      | present             |
//!
//! The uploaded files are not cross-checked against the staged descriptor's
//! file list, so a block can be completed while files it lists are missing
//! or still being written.

use std::sync::Arc;

use anyhow::anyhow;
use blob_store::{Bucket, PutResult};
use bytes::Bytes;
use futures::stream::BoxStream;
use tracing::{debug, error};
use ulid::Ulid;

use crate::{
    block::{sanitize_meta, BlockFilePath, BlockMeta, META_FILENAME, META_TEMP_FILENAME},
    error::BlockUploadError,
    tenant::TenantId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    NotStarted,
    InProgress,
    Complete,
}

pub struct BlockUploadSession {
    bucket: Arc<dyn Bucket>,
    tenant: TenantId,
    block_id: Ulid,
}

impl BlockUploadSession {
    pub fn new(bucket: Arc<dyn Bucket>, tenant: TenantId, block_id: Ulid) -> Self {
        Self {
            bucket,
            tenant,
            block_id,
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.block_id, name)
    }

    async fn exists(&self, name: &str) -> Result<bool, BlockUploadError> {
        self.bucket.exists(&self.key(name)).await.map_err(|e| {
            error!("failed to check existence of {} in object storage: {:#}", name, e);
            BlockUploadError::StorageUnavailable(e)
        })
    }

    #[tracing::instrument(skip_all, fields(tenant = %self.tenant, block = %self.block_id))]
    pub async fn state(&self) -> Result<UploadState, BlockUploadError> {
        if self.exists(META_FILENAME).await? {
            return Ok(UploadState::Complete);
        }
        if self.exists(META_TEMP_FILENAME).await? {
            return Ok(UploadState::InProgress);
        }
        Ok(UploadState::NotStarted)
    }

    /// Starts (or restarts) the upload by staging a sanitized copy of the
    /// descriptor in `body`. A staged descriptor from an earlier call is
    /// overwritten.
    #[tracing::instrument(skip_all, fields(tenant = %self.tenant, block = %self.block_id))]
    pub async fn create(&self, body: &[u8]) -> Result<(), BlockUploadError> {
        debug!("starting block upload");

        if self.exists(META_FILENAME).await? {
            debug!("complete block already exists in object storage");
            return Err(BlockUploadError::AlreadyComplete);
        }

        let meta = BlockMeta::from_json(body).map_err(BlockUploadError::MalformedBody)?;
        let meta = sanitize_meta(meta, self.block_id, &self.tenant)?;

        self.upload_meta(&meta, META_TEMP_FILENAME).await
    }

    /// Writes one block file straight to its final location. Only accepted
    /// while a staged descriptor exists.
    #[tracing::instrument(skip_all, fields(tenant = %self.tenant, block = %self.block_id, path = %path))]
    pub async fn upload_file(
        &self,
        path: &BlockFilePath,
        body: BoxStream<'static, anyhow::Result<Bytes>>,
        content_length: u64,
    ) -> Result<PutResult, BlockUploadError> {
        if !self.exists(META_TEMP_FILENAME).await? {
            return Err(BlockUploadError::NotStarted(self.block_id));
        }
        // The staged descriptor only proves the session is live; its file
        // list is not compared with `path` or `content_length`.
        self.download_meta(META_TEMP_FILENAME).await?;

        let dst = path.object_key(self.block_id);
        debug!(destination = %dst, size = content_length, "uploading block file to bucket");
        let res = self
            .bucket
            .upload_stream(&dst, body, content_length)
            .await
            .map_err(|e| {
                error!(destination = %dst, "failed uploading block file to bucket: {:#}", e);
                BlockUploadError::UploadFailed(e)
            })?;

        debug!(
            size = res.size_bytes,
            sha256 = %res.sha256_hash,
            "finished uploading block file to bucket"
        );
        Ok(res)
    }

    /// Publishes the staged descriptor as `meta.json` and removes the staged
    /// copy. The block is complete as soon as `meta.json` is written; a failed
    /// cleanup is reported but not rolled back.
    #[tracing::instrument(skip_all, fields(tenant = %self.tenant, block = %self.block_id))]
    pub async fn complete(&self) -> Result<BlockMeta, BlockUploadError> {
        debug!("received request to complete block upload");

        let meta = self.download_meta(META_TEMP_FILENAME).await?;
        debug!(files = meta.thanos.files.len(), "completing block upload");

        self.upload_meta(&meta, META_FILENAME).await?;

        self.bucket
            .delete(&self.key(META_TEMP_FILENAME))
            .await
            .map_err(|e| {
                error!(
                    "failed to delete {} from block in object storage: {:#}",
                    META_TEMP_FILENAME, e
                );
                BlockUploadError::StorageUnavailable(e)
            })?;

        debug!("successfully completed block upload");
        Ok(meta)
    }

    async fn download_meta(&self, name: &str) -> Result<BlockMeta, BlockUploadError> {
        let data = self
            .bucket
            .get(&self.key(name))
            .await
            .map_err(|e| {
                error!("failed to download {} from object storage: {:#}", name, e);
                BlockUploadError::StorageUnavailable(e)
            })?
            .ok_or(BlockUploadError::NotStarted(self.block_id))?;

        BlockMeta::from_json(&data).map_err(|e| {
            error!("failed to decode {}: {}", name, e);
            BlockUploadError::StorageUnavailable(anyhow!("failed to decode {}: {}", name, e))
        })
    }

    async fn upload_meta(&self, meta: &BlockMeta, name: &str) -> Result<(), BlockUploadError> {
        let dst = self.key(name);
        debug!(dst = %dst, "uploading {} to bucket", name);
        let data = meta.to_json().map_err(|e| {
            error!("failed to encode block metadata: {}", e);
            BlockUploadError::StorageUnavailable(anyhow!("failed to encode block metadata: {}", e))
        })?;
        self.bucket.upload(&dst, data).await.map_err(|e| {
            error!("failed uploading {} to bucket: {:#}", name, e);
            BlockUploadError::StorageUnavailable(e)
        })
    }
}

#[cfg(test)]
mod tests;
