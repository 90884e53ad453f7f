mod application;
mod domain;
mod infrastructure;
mod presentation;
#[cfg(test)]
mod testing;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use infrastructure::{AppConfig, AppContainer, create_connection_pool, run_migrations};
use presentation::http::HttpServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;

    let db_pool = create_connection_pool(&config.database_url, config.database_pool_size)?;
    run_migrations(&db_pool)?;

    let container = AppContainer::new(&config, db_pool)?;
    let shutdown = CancellationToken::new();

    let background_processor = container.background_processor.clone();
    let workers = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { background_processor.start(shutdown).await }
    });

    match container.resume_jobs_use_case.execute().await {
        Ok(0) => {}
        Ok(resumed) => info!("Re-queued {} unfinished analysis jobs", resumed),
        Err(e) => error!("Failed to re-queue unfinished analysis jobs: {}", e),
    }

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    let server = HttpServer::new(
        container.analysis_handler.clone(),
        container.sse_handler.clone(),
        Some(config.port),
    );
    let result = server.run(shutdown.clone()).await;

    // Jobs interrupted here are resumed on the next start.
    shutdown.cancel();
    if let Err(e) = workers.await {
        error!("Background processor task failed: {}", e);
    }

    result
}
