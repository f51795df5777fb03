use erosion_insight::api::{create_router, AppState};
use erosion_insight::utils::{logger, validation::Validate};
use erosion_insight::{http_sources, InsightConfig, Orchestrator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::var("EROSION_INSIGHT_CONFIG") {
        Ok(path) => InsightConfig::from_file(path)?,
        Err(_) => InsightConfig::default(),
    };

    logger::init_server_logger(config.log_level());

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        return Err(e.into());
    }

    let bind_address = config.service.bind_address.clone();
    let monitor_enabled = config.monitoring_enabled();
    let sources = http_sources(&config)?;
    let state = AppState::new(Orchestrator::new_with_monitoring(
        config,
        sources,
        monitor_enabled,
    ));

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("🚀 erosion-insight listening on {}", bind_address);
    axum::serve(listener, create_router(state)).await?;

    Ok(())
}
