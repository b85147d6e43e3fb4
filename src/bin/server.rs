use anyhow::Result;
use clap::Parser;
use geostage::config::AppConfig;
use geostage::http::AppServer;
use geostage::GeoStageEngine;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "geostage-server", about = "GeoStage HTTP Server")]
struct Cli {
    /// Path to config file
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let now = Instant::now();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    tracing::info!("Starting GeoStage HTTP Server");

    let config = AppConfig::load(&cli.config)?;
    config.validate()?;

    tracing::info!("Configuration '{}' loaded successfully", &cli.config);

    let engine = GeoStageEngine::from_config(&config).await?;

    tracing::info!("Engine initialized");

    let app = AppServer::new(engine);

    // Resume any ingestion runs left incomplete by a previous process.
    let supervisor = app.engine.spawn_supervisor();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server started in {}ms", now.elapsed().as_millis());
    tracing::info!("Server listening on {}", addr);

    let server = axum::serve(listener, app.router).with_graceful_shutdown(shutdown());
    server.await?;

    supervisor.abort();
    tracing::info!("Server shutdown complete");

    Ok(())
}

async fn shutdown() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping server...");
}
