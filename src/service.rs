use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum_server::Handle;
use blob_store::BlobStorage;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::ServerConfig,
    middleware::InstanceRequestSpan,
    routes::{create_routes, routes_state::RouteState},
};

#[derive(Clone)]
pub struct Service {
    pub config: ServerConfig,
    pub blob_storage: Arc<BlobStorage>,
}

impl Service {
    pub fn new(mut config: ServerConfig) -> Result<Self> {
        config.resolve_instance_id();
        let blob_storage = Arc::new(
            BlobStorage::new(config.blob_storage.clone())
                .context("error initializing BlobStorage")?,
        );
        Ok(Self {
            config,
            blob_storage,
        })
    }

    pub fn route_state(&self) -> RouteState {
        RouteState {
            blob_storage: self.blob_storage.clone(),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let handle = Handle::new();
        let handle_sh = handle.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh).await;
            info!("graceful shutdown signal received, shutting down server gracefully");
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("server api listening on {}", self.config.listen_addr);
        let routes = create_routes(self.route_state()).layer(
            TraceLayer::new_for_http().make_span_with(InstanceRequestSpan::new(
                &self.config.env,
                self.config.instance_id.as_deref().unwrap_or_default(),
            )),
        );
        axum_server::bind(addr)
            .handle(handle)
            .serve(routes.into_make_service())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {:?}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install signal handler: {:?}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.graceful_shutdown(None);
    info!("signal received, shutting down server gracefully");
}
