//! Gateway configuration

use serde::{Deserialize, Serialize};
use sluice_core::{DEFAULT_CHUNK_SIZE, DEFAULT_PIPE_CAPACITY};
use std::path::Path;
use std::time::Duration;

/// Gateway server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Size of each chunk written to a download response (bytes)
    pub chunk_size: usize,
    /// Chunks an upload pipe holds before the request body stops being read
    pub pipe_capacity: usize,
    /// Seconds an upload may sit without receiving data before it is aborted
    pub upload_idle_timeout_secs: u64,
    /// Webhook receiving create/update/delete events; events are only logged when unset
    pub hook_url: Option<String>,
    /// Pending events held before new ones are dropped
    pub hook_queue_capacity: usize,
    /// Mount an in-memory provider named `memory`
    pub use_memory_store: bool,
    /// Enable CORS
    pub cors_enabled: bool,
    /// Mounted storage providers
    pub providers: Vec<ProviderConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7777,
            chunk_size: DEFAULT_CHUNK_SIZE,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            upload_idle_timeout_secs: 60,
            hook_url: None,
            hook_queue_capacity: 1024,
            use_memory_store: false,
            cors_enabled: true,
            providers: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from an optional TOML file, then `SLUICE_*`
    /// environment variables (`__` separates nested keys).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("SLUICE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: GatewayConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upload_idle_timeout(&self) -> Option<Duration> {
        (self.upload_idle_timeout_secs > 0).then(|| Duration::from_secs(self.upload_idle_timeout_secs))
    }
}

/// One mounted provider, reachable under `/{name}/`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub backend: BackendConfig,
}

/// Backend selection and credentials
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    CloudFiles {
        username: String,
        api_key: String,
        region: String,
        container: String,
        #[serde(default)]
        auth_url: Option<String>,
        #[serde(default)]
        temp_url_ttl_secs: Option<u64>,
    },
    Dataverse {
        host: String,
        api_token: String,
        doi: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        version: Option<String>,
    },
    Memory,
}
