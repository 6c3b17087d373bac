use anyhow::{anyhow, Result};
use axum::Router;
use blob_store::BlobStorageConfig;
use tempfile::TempDir;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{config::ServerConfig, routes::create_routes, service::Service};

pub struct TestService {
    pub service: Service,
    pub router: Router,
    pub temp_dir: Option<TempDir>,
}

impl TestService {
    /// Service backed by in-memory storage.
    pub fn new() -> Result<Self> {
        Self::with_storage(BlobStorageConfig::in_memory(), None)
    }

    /// Service backed by a local filesystem store in a temporary directory.
    pub fn new_on_disk() -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let blob_path = temp_dir.path().join("blob_store");
        let config = BlobStorageConfig::new(
            blob_path
                .to_str()
                .ok_or_else(|| anyhow!("non utf-8 temp path"))?,
        );
        Self::with_storage(config, Some(temp_dir))
    }

    fn with_storage(blob_storage: BlobStorageConfig, temp_dir: Option<TempDir>) -> Result<Self> {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trace"));
        let _ = subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let cfg = ServerConfig {
            blob_storage,
            ..Default::default()
        };
        cfg.validate()?;
        let service = Service::new(cfg)?;
        let router = create_routes(service.route_state());

        Ok(Self {
            service,
            router,
            temp_dir,
        })
    }
}
