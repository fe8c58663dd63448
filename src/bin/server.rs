use anyhow::Result;
use clap::Parser;
use std::time::Instant;
use widedb::config::AppConfig;
use widedb::http::app_server::AppServer;
use widedb::telemetry::{init_telemetry, shutdown_telemetry};
use widedb::WideDbEngine;

#[derive(Parser)]
#[command(name = "widedb-server", about = "WideDB HTTP Server")]
struct Cli {
    /// Path to config file; environment variables alone are used when omitted
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let now = Instant::now();
    init_telemetry().map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let cli = Cli::parse();

    tracing::info!("Starting WideDB HTTP Server");

    // Load configuration
    let config = AppConfig::load(cli.config.as_deref())?;
    config.validate()?;

    match &cli.config {
        Some(path) => tracing::info!("Configuration '{}' loaded successfully", path),
        None => tracing::info!("Configuration loaded from environment"),
    }

    // Initialize engine from config
    let engine = WideDbEngine::from_config(&config).await?;

    tracing::info!("Engine initialized");

    // Create router
    let app = AppServer::new(engine);
    let engine = app.engine.clone();

    // Create server address
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server started in {}ms", now.elapsed().as_millis());
    tracing::info!("Server listening on {}", addr);

    // Start server
    let server = axum::serve(listener, app.router).with_graceful_shutdown(shutdown());

    server.await?;

    // Let in-flight uploads finish and close the catalog
    if let Err(e) = engine.shutdown().await {
        tracing::error!("Error during engine shutdown: {}", e);
    }

    tracing::info!("Server shutdown complete");
    shutdown_telemetry();

    Ok(())
}

async fn shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping server...");
}
