//! Service container for dependency injection.
//!
//! The ServiceContainer wires the poll loop and the health server from the
//! worker configuration and manages their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::api::{ApiServer, AppState};
use crate::config::WorkerConfig;
use crate::credentials::TwitchTokenProvider;
use crate::database::repositories::SqlxBroadcasterRepository;
use crate::metrics::{LivenessMarker, LivenessReporter};
use crate::monitor::{BatchDetector, PollScheduler, SqlxSessionReconciler};
use crate::utils::http_client::build_api_client;

/// Default shutdown timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: SqlitePool,
    /// Worker configuration.
    pub config: WorkerConfig,
    /// The poll loop.
    pub scheduler: Arc<PollScheduler>,
    /// Shared between the poll loop and the health endpoint.
    pub liveness: Arc<LivenessMarker>,
    pub reporter: Arc<LivenessReporter>,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
    scheduler_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceContainer {
    /// Build all services from the configuration and an initialized pool.
    pub fn new(config: WorkerConfig, pool: SqlitePool) -> Result<Self> {
        let client = build_api_client(config.poll.http_timeout)?;

        let credentials = Arc::new(TwitchTokenProvider::new(client.clone(), &config.twitch));
        let fetcher = Arc::new(
            BatchDetector::new(client, &config.twitch)?.with_max_batch_size(config.poll.batch_size),
        );
        let roster = Arc::new(SqlxBroadcasterRepository::new(pool.clone()));
        let reconciler = Arc::new(SqlxSessionReconciler::new(pool.clone()));

        let liveness = Arc::new(LivenessMarker::new());
        let reporter = Arc::new(LivenessReporter::new(liveness.clone(), config.health));

        let scheduler = Arc::new(PollScheduler::new(
            config.poll.clone(),
            credentials,
            fetcher,
            roster,
            reconciler,
            liveness.clone(),
        ));

        info!("Services initialized");

        Ok(Self {
            pool,
            config,
            scheduler,
            liveness,
            reporter,
            cancellation_token: CancellationToken::new(),
            scheduler_handle: Mutex::new(None),
        })
    }

    /// Spawn the poll loop. Calling this twice has no effect.
    pub async fn start_scheduler(&self) {
        let mut handle = self.scheduler_handle.lock().await;
        if handle.is_some() {
            warn!("Poll scheduler already started");
            return;
        }
        *handle = Some(
            self.scheduler
                .clone()
                .start(self.cancellation_token.child_token()),
        );
    }

    /// Health server bound to this container's liveness and shutdown signal.
    pub fn api_server(&self) -> ApiServer {
        ApiServer::new(
            self.config.api.clone(),
            AppState::new(self.reporter.clone()),
            self.cancellation_token.child_token(),
        )
    }

    /// Shutdown all services gracefully with a custom timeout.
    ///
    /// The poll loop finishes its current iteration first; if that takes
    /// longer than `timeout` the task is aborted.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);

        self.cancellation_token.cancel();

        if let Some(mut handle) = self.scheduler_handle.lock().await.take() {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => info!("Poll scheduler stopped"),
                Ok(Err(e)) => warn!(error = %e, "Poll scheduler task failed"),
                Err(_) => {
                    warn!("Shutdown timeout reached, aborting poll scheduler");
                    handle.abort();
                }
            }
        }

        info!("Closing database pool...");
        self.pool.close().await;

        info!("Services shut down");
        Ok(())
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }
}
