use std::sync::Arc;

use anyhow::Context;

use geoip_infra::GeoConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    geoip_observability::init();

    let config = GeoConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(
        geoip_api::app::build_services(&config)
            .await
            .context("failed to build services")?,
    );
    let executor = services.start_executor();

    let app = geoip_api::app::build_app(services);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    executor.shutdown().await;
    tracing::info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
