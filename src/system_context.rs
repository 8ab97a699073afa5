use crate::config::{ConfigLoader, ResilienceConfig};
use crate::protected::{
    AiBackend, CacheStoreBackend, ResilientAiClient, ResilientCacheStore, ResilientDatabase,
};
use crate::resilience::{RegistrySnapshot, ServiceRegistry};
use crate::Result;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Default location of the configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/resilience.toml";

/// Shared resilience dependencies and configuration
///
/// Dependency injection container for the layer:
/// - Validated configuration
/// - The service registry every wrapper routes through
/// - Factories for the database, cache-store and AI wrappers
pub struct ResilienceContext {
    /// Instance ID, useful for correlating logs across restarts
    pub context_id: Uuid,

    pub config: Arc<ResilienceConfig>,

    pub registry: Arc<ServiceRegistry>,
}

impl std::fmt::Debug for ResilienceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceContext")
            .field("context_id", &self.context_id)
            .field("config", &"Arc<ResilienceConfig>")
            .field("services", &self.registry.list_services())
            .finish()
    }
}

impl ResilienceContext {
    /// Build from an explicit configuration, with a fresh registry
    pub fn new(config: ResilienceConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(ServiceRegistry::from_config(&config));
        Ok(Self::with_registry(config, registry))
    }

    /// Build around an existing registry (for sharing breakers between contexts)
    pub fn with_registry(config: ResilienceConfig, registry: Arc<ServiceRegistry>) -> Self {
        let context_id = Uuid::new_v4();
        info!(
            context_id = %context_id,
            components = config.circuit_breakers.component_configs.len(),
            "Initializing ResilienceContext"
        );

        Self {
            context_id,
            config: Arc::new(config),
            registry,
        }
    }

    /// Load `config/resilience.toml` (if present) plus environment overrides
    pub fn load() -> Result<Self> {
        Self::from_loader(&ConfigLoader::new().with_file(DEFAULT_CONFIG_PATH))
    }

    pub fn from_loader(loader: &ConfigLoader) -> Result<Self> {
        Self::new(loader.load()?)
    }

    pub fn database(&self) -> ResilientDatabase {
        ResilientDatabase::new(Arc::clone(&self.registry), self.config.database.clone())
    }

    pub fn cache_store(&self, backend: Arc<dyn CacheStoreBackend>) -> ResilientCacheStore {
        ResilientCacheStore::new(
            backend,
            Arc::clone(&self.registry),
            self.config.cache_store.clone(),
            &self.config.cache,
        )
    }

    pub fn ai_client(&self, backend: Arc<dyn AiBackend>) -> ResilientAiClient {
        ResilientAiClient::new(
            backend,
            Arc::clone(&self.registry),
            self.config.ai.clone(),
            &self.config.cache,
        )
    }

    pub fn health_report(&self) -> RegistrySnapshot {
        self.registry.health_report()
    }
}
