use std::path::PathBuf;

use ::tracing::{error, info_span};
use anyhow::anyhow;
use clap::Parser;
use service::Service;

mod block;
mod config;
mod error;
mod http_objects;
mod middleware;
mod routes;
mod service;
mod tenant;
mod tracing;
mod upload;
use crate::tracing::setup_tracing;

#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = match cli.config {
        Some(path) => config::ServerConfig::from_path(
            path.to_str()
                .ok_or_else(|| anyhow!("config path is not valid utf-8: {:?}", path))?,
        )?,
        None => config::ServerConfig::default(),
    };

    let instance_id = config.resolve_instance_id().to_string();
    setup_tracing(&config);

    let root_span = info_span!(
        "block-upload",
        env = config.env,
        "instance" = instance_id
    );
    let _guard = root_span.enter();

    let service = Service::new(config).inspect_err(|err| {
        error!("Error creating service: {:?}", err);
    })?;
    if let Err(err) = service.start().await {
        error!("Error starting service: {:?}", err);
        return Err(err);
    }
    Ok(())
}
