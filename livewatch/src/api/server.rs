//! API server setup.

use axum::Router;
use axum::extract::Request;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::config::ApiServerConfig;
use crate::error::{Error, Result};
use crate::metrics::LivenessReporter;

/// Paths hit by the platform's prober every few seconds; not traced.
const PROBE_PATHS: &[&str] = &["/healthz"];

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Liveness of the poll loop.
    pub liveness: Arc<LivenessReporter>,
}

impl AppState {
    pub fn new(liveness: Arc<LivenessReporter>) -> Self {
        Self { liveness }
    }
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    /// Create a server that shuts down when `cancel_token` fires.
    pub fn new(config: ApiServerConfig, state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    /// Build the router with all middleware and routes.
    fn build_router(&self) -> Router {
        routes::create_router(self.state.clone()).layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    if PROBE_PATHS.contains(&req.uri().path()) {
                        Span::none()
                    } else {
                        let mut make_span =
                            tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO);
                        use tower_http::trace::MakeSpan;
                        make_span.make_span(req)
                    }
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        let on_response =
                            tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO);
                        use tower_http::trace::OnResponse;
                        on_response.on_response(res, latency, span);
                    },
                ),
        )
    }

    /// Bind the configured address and serve until cancelled.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid API bind address: {}", e)))?;

        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("API server listening on http://{}", addr);
        }

        let cancel_token = self.cancel_token.clone();

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthConfig;
    use crate::metrics::LivenessMarker;

    fn state() -> AppState {
        let reporter = LivenessReporter::new(Arc::new(LivenessMarker::new()), HealthConfig::default());
        AppState::new(Arc::new(reporter))
    }

    #[tokio::test]
    async fn test_invalid_bind_address_is_config_error() {
        let config = ApiServerConfig {
            bind_address: "not an address".to_string(),
            port: 8080,
        };
        let server = ApiServer::new(config, state(), CancellationToken::new());

        let err = server.run().await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let server = ApiServer::new(ApiServerConfig::default(), state(), cancel.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let handle = tokio::spawn(async move { server.serve(listener).await });
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server should stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
