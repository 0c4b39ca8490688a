use std::sync::Arc;
use tracing::warn;

use crate::config::AppConfig;
use crate::services::capture::CaptureBackend;
use crate::services::landmark_provider::{LandmarkProvider, NoDetectionProvider, ProviderFactory};
use crate::services::rule_catalog::RuleCatalog;
use crate::services::session_registry::SessionRegistry;

/// Shared state for the exercise API handlers
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<RuleCatalog>,
    pub registry: Arc<SessionRegistry>,
    pub backend: Arc<dyn CaptureBackend>,
    pub provider_factory: ProviderFactory,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        catalog: RuleCatalog,
        backend: Arc<dyn CaptureBackend>,
        provider_factory: ProviderFactory,
        config: AppConfig,
    ) -> Self {
        let registry = SessionRegistry::new(&catalog);
        Self {
            catalog: Arc::new(catalog),
            registry: Arc::new(registry),
            backend,
            provider_factory,
            config: Arc::new(config),
        }
    }

    /// Landmark provider for a new stream
    ///
    /// A provider that fails to load is replaced by one that never detects,
    /// so the stream still runs and reports WAIT.
    pub fn create_provider(&self) -> Box<dyn LandmarkProvider> {
        match (self.provider_factory)() {
            Ok(provider) => provider,
            Err(e) => {
                warn!("Landmark provider unavailable: {:#}", e);
                Box::new(NoDetectionProvider)
            }
        }
    }
}
