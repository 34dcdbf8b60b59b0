//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Host a [`Mux`] on an axum listener (HTTP/1.1 with upgrades, HTTP/2)
//! - Wire up transport middleware (timeout, tracing)
//! - Stop accepting and drain on shutdown

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::lifecycle::Shutdown;
use crate::routing::Mux;

/// HTTP server hosting one routing tree.
pub struct HttpServer {
    router: Router,
    request_timeout: Duration,
}

impl HttpServer {
    /// Create a server for `mux` with the timeouts from `config`.
    pub fn new(mux: Mux, config: &ServerConfig) -> Self {
        let request_timeout = Duration::from_secs(config.timeouts.request_secs);
        Self {
            router: Self::build_router(mux, request_timeout),
            request_timeout,
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// The timeout bounds the time to the response head, so a websocket
    /// session outlives it once `101` is sent.
    #[allow(deprecated)]
    fn build_router(mux: Mux, request_timeout: Duration) -> Router {
        Router::new()
            .fallback_service(mux)
            .layer(TimeoutLayer::new(request_timeout))
            .layer(TraceLayer::new_for_http())
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            request_timeout_secs = self.request_timeout.as_secs(),
            "HTTP server starting"
        );

        let mut signal = shutdown.subscribe();
        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = signal.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
