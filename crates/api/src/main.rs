use std::sync::Arc;

use anyhow::Context;
use vigil_infra::config::PipelineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();
    vigil_observability::init();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    tracing::info!(?config, "starting vigil-api");

    let services = vigil_api::app::services::build_services(&config).await?;
    let app = vigil_api::app::build_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
