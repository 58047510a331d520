// Feuerwehr Records - Web Server
// REST API with Axum

use anyhow::{Context, Result};
use tracing::info;

use feuerwehr_records::api::{router, AppState};
use feuerwehr_records::{logging, Config, Database};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    logging::init_logging(&config.logging);

    let db = Database::open(&config.database.path)
        .with_context(|| format!("Failed to open database {:?}", config.database.path))?;
    info!(path = ?config.database.path, "database opened");

    let state = AppState {
        db,
        page_size: config.api.page_size,
    };
    let app = router(state);

    let addr = config.server_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(%addr, "🚀 server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
