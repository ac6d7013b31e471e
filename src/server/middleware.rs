//! HTTP middleware for dvarapala
//!
//! This module provides middleware for:
//! - The bearer-token authorization gate
//! - Request/response logging and metrics

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use super::response::ApiError;
use crate::auth::{authorize, TokenManager, VerifiedIdentity};
use crate::error::{AuthError, RejectReason};
use crate::otel::Metrics;

/// State for the authorization gate
#[derive(Clone)]
pub struct AuthGate {
    tokens: Arc<TokenManager>,
    metrics: Option<Arc<Metrics>>,
}

impl AuthGate {
    /// Create a new gate verifying tokens with `tokens`
    pub fn new(tokens: Arc<TokenManager>) -> Self {
        Self {
            tokens,
            metrics: None,
        }
    }

    /// Count rejections on `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Count a rejection and turn it into the boundary error
    pub fn reject(&self, reason: RejectReason) -> AuthError {
        if let Some(metrics) = &self.metrics {
            metrics.record_auth_rejection(reason.as_label());
        }
        AuthError::from(reason)
    }
}

/// Authorization middleware function
///
/// This middleware:
/// 1. Extracts the Authorization header
/// 2. Verifies the bearer token
/// 3. Adds the [`VerifiedIdentity`] to the request extensions
///
/// Rejections are logged with their reason and answered with a uniform 401.
pub async fn auth_middleware(
    State(gate): State<AuthGate>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let verdict = authorize(request.headers().get(header::AUTHORIZATION), &gate.tokens);

    match verdict {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        Err(reason) => {
            let remote = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.to_string())
                .unwrap_or_else(|| "unknown".to_string());

            tracing::warn!(
                path = %request.uri().path(),
                remote = %remote,
                reason = reason.as_label(),
                "Request rejected by authorization gate"
            );

            Err(gate.reject(reason).into())
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for VerifiedIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<VerifiedIdentity>()
            .cloned()
            .ok_or(ApiError::Unauthorized)
    }
}

/// Logging middleware function
///
/// Logs method, path, status and response time, and records request metrics.
pub async fn logging_middleware(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status();

    metrics.record_request(method.as_str(), status.as_u16());
    metrics.record_request_duration(method.as_str(), elapsed.as_secs_f64());

    tracing::info!(
        method = %method,
        path = %uri.path(),
        status = %status.as_u16(),
        duration_ms = %elapsed.as_millis(),
        "Request completed"
    );

    response
}
