use std::{env, sync::Arc};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{stream::BoxStream, StreamExt};
use object_store::{
    aws::{AmazonS3Builder, AmazonS3ConfigKey},
    parse_url,
    parse_url_opts,
    path::{Path, DELIMITER},
    ObjectStore,
    ObjectStoreScheme,
    PutPayload,
    WriteMultipart,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

/// Bodies up to this size are written with a single put.
pub const DEFAULT_MULTIPART_THRESHOLD_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStorageConfig {
    pub path: Option<String>,
    #[serde(default = "default_multipart_threshold_bytes")]
    pub multipart_threshold_bytes: u64,
}

fn default_multipart_threshold_bytes() -> u64 {
    DEFAULT_MULTIPART_THRESHOLD_BYTES
}

impl BlobStorageConfig {
    pub fn new(path: &str) -> Self {
        BlobStorageConfig {
            path: Some(format!("file://{}", path)),
            multipart_threshold_bytes: DEFAULT_MULTIPART_THRESHOLD_BYTES,
        }
    }

    pub fn in_memory() -> Self {
        BlobStorageConfig {
            path: Some("memory:///".to_string()),
            multipart_threshold_bytes: DEFAULT_MULTIPART_THRESHOLD_BYTES,
        }
    }
}

impl Default for BlobStorageConfig {
    fn default() -> Self {
        let blob_store_path = env::current_dir()
            .ok()
            .and_then(|dir| {
                dir.join("block_upload_storage/blobs")
                    .to_str()
                    .map(|p| format!("file://{}", p))
            });
        info!("using blob store path: {:?}", blob_store_path);
        BlobStorageConfig {
            path: blob_store_path,
            multipart_threshold_bytes: DEFAULT_MULTIPART_THRESHOLD_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PutResult {
    pub url: String,
    pub size_bytes: u64,
    pub sha256_hash: String,
}

/// Object operations scoped to a single tenant.
///
/// Keys are relative to the tenant prefix and may contain `/` to address
/// nested objects, e.g. `<block>/chunks/000001`.
#[async_trait]
pub trait Bucket: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Returns `None` when the object does not exist.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    async fn upload(&self, key: &str, data: Bytes) -> Result<()>;

    /// Streams `data` to `key`. `size` is the length declared by the producer
    /// and selects between a single put and a multipart upload.
    async fn upload_stream(
        &self,
        key: &str,
        data: BoxStream<'static, Result<Bytes>>,
        size: u64,
    ) -> Result<PutResult>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct BlobStorage {
    object_store: Arc<dyn ObjectStore>,
    path: Path,
    multipart_threshold_bytes: u64,
}

impl BlobStorage {
    pub fn new(config: BlobStorageConfig) -> Result<Self> {
        let url = config
            .path
            .as_deref()
            .ok_or_else(|| anyhow!("blob storage path is not configured"))?;
        let (object_store, path) = Self::build_object_store(url)?;
        Ok(Self {
            object_store: Arc::from(object_store),
            path,
            multipart_threshold_bytes: config.multipart_threshold_bytes,
        })
    }

    pub fn build_object_store(url_str: &str) -> Result<(Box<dyn ObjectStore>, Path)> {
        let url = &url_str
            .parse::<Url>()
            .with_context(|| format!("invalid blob storage url: {}", url_str))?;
        let (scheme, _) = ObjectStoreScheme::parse(url)?;
        match scheme {
            ObjectStoreScheme::AmazonS3 => {
                // inject AWS environment variables to prioritize keys over instance metadata
                // credentials.
                let opts: Vec<(AmazonS3ConfigKey, String)> = std::env::vars_os()
                    .filter_map(|(os_key, os_value)| {
                        if let (Some(key), Some(value)) = (os_key.to_str(), os_value.to_str()) {
                            if key.starts_with("AWS_") {
                                if let Ok(config_key) = key.to_ascii_lowercase().parse() {
                                    return Some((config_key, String::from(value)));
                                }
                            }
                        }
                        None
                    })
                    .collect();

                let mut s3_builder = AmazonS3Builder::new().with_url(url_str);
                for (key, value) in opts.iter() {
                    s3_builder = s3_builder.with_config(*key, value.clone());
                }
                let s3 = s3_builder
                    .build()
                    .context("failed to create s3 object store")?;
                let (_, path) = parse_url_opts(url, opts)?;
                Ok((Box::new(s3), path))
            }
            _ => Ok(parse_url(url)?),
        }
    }

    /// Returns a bucket whose keys live under `<root>/<tenant>/`.
    pub fn tenant_bucket(&self, tenant: &str) -> TenantBucket {
        TenantBucket {
            object_store: self.object_store.clone(),
            prefix: self.path.child(tenant),
            multipart_threshold_bytes: self.multipart_threshold_bytes,
        }
    }
}

#[derive(Clone)]
pub struct TenantBucket {
    object_store: Arc<dyn ObjectStore>,
    prefix: Path,
    multipart_threshold_bytes: u64,
}

impl TenantBucket {
    fn object_path(&self, key: &str) -> Path {
        key.split(DELIMITER)
            .filter(|part| !part.is_empty())
            .fold(self.prefix.clone(), |path, part| path.child(part))
    }

    async fn write_multipart(
        &self,
        path: &Path,
        mut data: BoxStream<'static, Result<Bytes>>,
        hasher: &mut Sha256,
    ) -> Result<u64> {
        let upload = self
            .object_store
            .put_multipart(path)
            .await
            .with_context(|| format!("failed to start multipart upload of {}", path))?;
        let mut w = WriteMultipart::new(upload);
        let mut size_bytes = 0;
        let written: Result<()> = async {
            while let Some(chunk) = data.next().await {
                let chunk = chunk?;
                w.wait_for_capacity(1).await?;
                hasher.update(&chunk);
                size_bytes += chunk.len() as u64;
                w.write(&chunk);
            }
            Ok(())
        }
        .await;

        if let Err(err) = written {
            if let Err(abort_err) = w.abort().await {
                warn!(path = %path, "failed to abort multipart upload: {:?}", abort_err);
            }
            return Err(err.context(format!("failed writing {}", path)));
        }
        w.finish()
            .await
            .with_context(|| format!("failed to finish multipart upload of {}", path))?;
        Ok(size_bytes)
    }
}

#[async_trait]
impl Bucket for TenantBucket {
    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key);
        match self.object_store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("failed to check existence of {}", path))),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.object_path(key);
        let get_result = match self.object_store.get(&path).await {
            Ok(get_result) => get_result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e).context(format!("can't get object {}", path)))
            }
        };
        let bytes = get_result
            .bytes()
            .await
            .with_context(|| format!("error reading object {}", path))?;
        Ok(Some(bytes))
    }

    async fn upload(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.object_path(key);
        self.object_store
            .put(&path, PutPayload::from(data))
            .await
            .with_context(|| format!("failed to put object {}", path))?;
        Ok(())
    }

    async fn upload_stream(
        &self,
        key: &str,
        mut data: BoxStream<'static, Result<Bytes>>,
        size: u64,
    ) -> Result<PutResult> {
        let path = self.object_path(key);
        let mut hasher = Sha256::new();

        let size_bytes = if size <= self.multipart_threshold_bytes {
            let mut buf = BytesMut::with_capacity(size as usize);
            while let Some(chunk) = data.next().await {
                let chunk = chunk.with_context(|| format!("failed reading data for {}", path))?;
                hasher.update(&chunk);
                buf.extend_from_slice(&chunk);
            }
            let size_bytes = buf.len() as u64;
            self.object_store
                .put(&path, PutPayload::from(buf.freeze()))
                .await
                .with_context(|| format!("failed to put object {}", path))?;
            size_bytes
        } else {
            debug!(path = %path, size, "using multipart upload");
            self.write_multipart(&path, data, &mut hasher).await?
        };

        let hash = format!("{:x}", hasher.finalize());
        Ok(PutResult {
            url: path.to_string(),
            size_bytes,
            sha256_hash: hash,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key);
        self.object_store
            .delete(&path)
            .await
            .with_context(|| format!("failed to delete object {}", path))?;
        Ok(())
    }
}
