use anyhow::Context;
use livewatch::config::WorkerConfig;
use livewatch::services::ServiceContainer;
use livewatch::services::container::DEFAULT_SHUTDOWN_TIMEOUT;
use livewatch::{database, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env()?;
    logging::init_logging(config.log_format)?;

    config.validate()?;
    config.log_summary();

    // Initialize database
    let pool = database::init_pool(&config.database_url)
        .await
        .context("failed to open database")?;
    database::ping(&pool)
        .await
        .context("database did not answer")?;
    database::run_migrations(&pool).await?;

    let container = ServiceContainer::new(config, pool)?;
    container.start_scheduler().await;

    let server = container.api_server();
    let cancel = container.cancellation_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        cancel.cancel();
    });

    if let Err(e) = server.run().await {
        tracing::error!(error = %e, "API server failed");
        container.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await?;
        return Err(e.into());
    }

    container.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await?;
    tracing::info!("livewatch stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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
}
