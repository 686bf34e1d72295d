use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use studyhub_server::config::ServerConfig;
use studyhub_server::db::directory::Directory;
use studyhub_server::db::pool::{create_pool, run_migrations};
use studyhub_server::engine::hub::Hub;
use studyhub_server::web::app_state::AppState;
use studyhub_server::web::router::build_router;

#[derive(Parser)]
#[command(name = "studyhub-server", about = "Real-time study group relay")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "studyhub.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)?;

    let pool = create_pool(&config.database.url)
        .await
        .context("failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    let hub = Arc::new(Hub::new(Directory::Sqlite(pool)));

    let app_state = Arc::new(AppState {
        hub: hub.clone(),
        auth_config: config.to_auth_config(),
        frontend_url: config.server.frontend_url.clone(),
    });
    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server.web_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.web_address))?;

    info!("StudyHub relay listening on {}", config.server.web_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await
        .context("server error")?;

    info!("StudyHub relay stopped");
    Ok(())
}

/// Wait for Ctrl-C, then stop the hub so open connections wind down.
async fn shutdown_signal(hub: Arc<Hub>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    hub.stop();
}
