use std::net::SocketAddr;

use anyhow::Result;
use blob_store::BlobStorageConfig;
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const LOCAL_ENV: &str = "local";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Tags logs and request spans. Random when unset.
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub blob_storage: BlobStorageConfig,
}

fn default_env() -> String {
    LOCAL_ENV.to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            env: default_env(),
            listen_addr: default_listen_addr(),
            instance_id: None,
            blob_storage: Default::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_path(path: &str) -> Result<ServerConfig> {
        let config_str = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&config_str)
    }

    fn from_yaml_str(config_str: &str) -> Result<ServerConfig> {
        let config: ServerConfig = Figment::new().merge(Yaml::string(config_str)).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "invalid listen address: {}",
                self.listen_addr
            ));
        }
        if self.blob_storage.path.is_none() {
            return Err(anyhow::anyhow!("blob_storage.path must be set"));
        }
        if self.blob_storage.multipart_threshold_bytes == 0 {
            return Err(anyhow::anyhow!(
                "blob_storage.multipart_threshold_bytes must be greater than zero"
            ));
        }
        Ok(())
    }

    pub fn structured_logging(&self) -> bool {
        self.env != LOCAL_ENV
    }

    /// Fixes a random `<env>-<uuid>` instance ID when none is configured.
    pub fn resolve_instance_id(&mut self) -> &str {
        let env = &self.env;
        self.instance_id
            .get_or_insert_with(|| format!("{}-{}", env, Uuid::new_v4()))
    }
}
