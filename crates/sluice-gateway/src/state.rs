//! Application state

use crate::config::{BackendConfig, GatewayConfig, ProviderConfig};
use crate::error::{ApiError, ErrorCode};
use crate::hooks::{spawn_hook_worker, HookDelivery, HookSender, HttpHookDelivery, LogHookDelivery};
use sluice_providers::{
    CloudFilesConfig, CloudFilesCredentials, CloudFilesProvider, DataverseConfig,
    DataverseProvider, MemoryProvider, Provider, SessionCache,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Application state shared across handlers
pub struct AppState {
    /// Gateway configuration
    pub config: GatewayConfig,
    /// Mounted providers by mount name
    providers: HashMap<String, Arc<dyn Provider>>,
    /// Hook event queue
    pub hooks: HookSender,
}

impl AppState {
    /// Build providers from configuration and start the hook worker
    pub async fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let sessions = Arc::new(SessionCache::new());

        let mut providers = HashMap::new();
        for mount in &config.providers {
            let provider = build_provider(mount, Arc::clone(&sessions))?;
            info!(mount = %mount.name, backend = provider.name(), "Mounted provider");
            providers.insert(mount.name.clone(), provider);
        }
        if config.use_memory_store && !providers.contains_key("memory") {
            warn!("⚠ Mounting in-memory provider at /memory/ (NOT persistent - for development only)");
            providers.insert("memory".to_string(), Arc::new(MemoryProvider::new()) as Arc<dyn Provider>);
        }
        if providers.is_empty() {
            warn!("No providers mounted; every request will return 404");
        }

        let delivery: Arc<dyn HookDelivery> = match &config.hook_url {
            Some(url) => {
                info!(url = %url, "Delivering hook events over HTTP");
                Arc::new(HttpHookDelivery::new(url.clone())?)
            }
            None => Arc::new(LogHookDelivery),
        };
        let (hooks, _worker) = spawn_hook_worker(delivery, config.hook_queue_capacity);

        Ok(Self {
            config,
            providers,
            hooks,
        })
    }

    /// State over an explicit provider set
    pub fn with_providers(
        config: GatewayConfig,
        providers: impl IntoIterator<Item = (String, Arc<dyn Provider>)>,
        hooks: HookSender,
    ) -> Self {
        Self {
            config,
            providers: providers.into_iter().collect(),
            hooks,
        }
    }

    /// Look up a mounted provider
    pub fn provider(&self, name: &str) -> Result<&Arc<dyn Provider>, ApiError> {
        self.providers.get(name).ok_or_else(|| {
            ApiError::with_resource(
                ErrorCode::NoSuchProvider,
                format!("no provider mounted at /{name}/"),
                name,
            )
        })
    }

    /// Mount names, sorted
    pub fn provider_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn build_provider(mount: &ProviderConfig, sessions: Arc<SessionCache>) -> anyhow::Result<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match &mount.backend {
        BackendConfig::CloudFiles {
            username,
            api_key,
            region,
            container,
            auth_url,
            temp_url_ttl_secs,
        } => {
            let mut config = CloudFilesConfig::new(container.clone());
            if let Some(url) = auth_url {
                config = config.with_auth_url(url.clone());
            }
            if let Some(ttl) = temp_url_ttl_secs {
                config = config.with_temp_url_ttl(Duration::from_secs(*ttl));
            }
            let credentials = CloudFilesCredentials {
                username: username.clone(),
                api_key: api_key.clone(),
                region: region.clone(),
            };
            Arc::new(CloudFilesProvider::new(credentials, config, sessions)?)
        }
        BackendConfig::Dataverse {
            host,
            api_token,
            doi,
            name,
            version,
        } => {
            let mut config = DataverseConfig::new(host.clone(), doi.clone()).with_name(name.clone());
            if let Some(version) = version {
                config = config.with_version(version.clone());
            }
            Arc::new(DataverseProvider::new(api_token.clone(), config, sessions)?)
        }
        BackendConfig::Memory => Arc::new(MemoryProvider::new()),
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_mounts_configured_providers() {
        let config = GatewayConfig {
            use_memory_store: true,
            providers: vec![ProviderConfig {
                name: "scratch".into(),
                backend: BackendConfig::Memory,
            }],
            ..Default::default()
        };

        let state = AppState::new(config).await.unwrap();
        assert_eq!(state.provider_names(), vec!["memory", "scratch"]);
        assert_eq!(state.provider("scratch").unwrap().name(), "memory");
    }

    #[tokio::test]
    async fn test_unknown_provider_is_not_found() {
        let state = AppState::new(GatewayConfig::default()).await.unwrap();
        let err = state.provider("nope").err().unwrap();
        assert_eq!(err.error_code(), ErrorCode::NoSuchProvider);
    }
}
