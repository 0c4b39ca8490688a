use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fitjourney::api::{create_routes, AppState};
use fitjourney::config::AppConfig;
use fitjourney::services::capture::CaptureBackend;
use fitjourney::services::landmark_provider::ProviderFactory;
use fitjourney::services::rule_catalog::RuleCatalog;

fn capture_backend() -> Arc<dyn CaptureBackend> {
    #[cfg(feature = "camera")]
    {
        Arc::new(fitjourney::services::capture::OpenCvBackend)
    }
    #[cfg(not(feature = "camera"))]
    {
        warn!("Built without the `camera` feature; every stream will report the camera as unavailable");
        Arc::new(fitjourney::services::capture::UnavailableBackend)
    }
}

fn provider_factory(config: &AppConfig) -> ProviderFactory {
    #[cfg(feature = "onnx")]
    {
        info!("Pose landmark model: {}", config.pose_model_path.display());
        fitjourney::services::landmark_provider::onnx_factory(config.pose_model_path.clone())
    }
    #[cfg(not(feature = "onnx"))]
    {
        let _ = config;
        warn!("Built without the `onnx` feature; no poses will be detected");
        fitjourney::services::landmark_provider::no_detection_factory()
    }
}

fn load_catalog(config: &AppConfig) -> Result<RuleCatalog> {
    let Some(path) = &config.rule_overrides_path else {
        return Ok(RuleCatalog::builtin());
    };

    let overrides = RuleCatalog::load_overrides(path)?;
    let catalog = RuleCatalog::with_overrides(&overrides)
        .with_context(|| format!("Invalid rule overrides in {}", path.display()))?;
    info!("Applied rule overrides from {}", path.display());
    Ok(catalog)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let catalog = load_catalog(&config)?;
    let backend = capture_backend();
    let factory = provider_factory(&config);
    let address = config.server_address();

    info!(
        "Camera fallback chain: {}",
        config
            .camera_fallbacks
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let state = AppState::new(catalog, backend, factory, config);
    let app = create_routes(state);

    // Start the server
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("FitJourney server starting on http://{}", address);
    info!("Health check available at http://{}/health", address);

    axum::serve(listener, app).await?;

    Ok(())
}
