//! HTTP surface of dvarapala
//!
//! [`build_router`] wires the handlers, the authorization gate and the
//! per-request middleware; [`Server`] adds the transport layers (tracing,
//! compression, CORS, timeouts) and owns the listener.

pub mod middleware;
pub mod ratelimit;
pub mod response;
pub mod router;

pub use middleware::{auth_middleware, AuthGate};
pub use ratelimit::{RateLimitConfig, RateLimiter};
pub use response::{ApiError, ApiResponse};
pub use router::{build_router, AppState, HealthResponse};

use std::future::Future;
use std::net::SocketAddr;

use axum::http::HeaderValue;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::{CorsConfig, ServerConfig};
use crate::database::{CredentialStore, Database};

/// The dvarapala HTTP server
///
/// Peer addresses are recorded for every connection so the gate can log them
/// and the rate limiter can key on them.
pub struct Server<D: Database + CredentialStore + 'static> {
    config: ServerConfig,
    cors: CorsConfig,
    state: AppState<D>,
}

impl<D: Database + CredentialStore + 'static> Server<D> {
    /// Create a new server instance
    pub fn new(config: ServerConfig, state: AppState<D>) -> Self {
        Self {
            config,
            cors: CorsConfig::default(),
            state,
        }
    }

    /// Use `cors` instead of the permissive default
    pub fn with_cors(mut self, cors: CorsConfig) -> Self {
        self.cors = cors;
        self
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(
            self.config.host.parse().unwrap_or([0, 0, 0, 0].into()),
            self.config.port,
        )
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.bind_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("{}: {}", addr, e)))?;

        self.run_with_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let cors = cors_layer(&self.cors)?;
        let timeout = self.config.request_timeout();

        let app = build_router(self.state)
            .layer(tower_http::timeout::TimeoutLayer::new(timeout))
            .layer(cors)
            .layer(tower_http::compression::CompressionLayer::new())
            .layer(tower_http::trace::TraceLayer::new_for_http());

        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(e.to_string()))?;
        tracing::info!(address = %addr, "Server listening");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Build the CORS layer; `"*"` among the origins allows any
pub fn cors_layer(config: &CorsConfig) -> Result<CorsLayer, ServerError> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.allowed_origins.iter().any(|o| o == "*") {
        return Ok(layer.allow_origin(Any));
    }

    let origins = config
        .allowed_origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|_| ServerError::Config(format!("invalid CORS origin: {}", o)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address
    #[error("Failed to bind to address: {0}")]
    Bind(String),

    /// Failed to serve requests
    #[error("Server error: {0}")]
    Serve(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
