// SPDX-License-Identifier: GPL-3.0-or-later

//! HTTP Server
//!
//! REST surface of the signaling server: nonce issuance for the wallet auth
//! handshake, liveness, and Prometheus metrics.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::debug;

use crate::challenge::{ChallengeStore, IssueError};
use crate::identity::Address;
use crate::metrics::SignalMetrics;
use crate::presence::SessionRegistry;
use crate::rate_limit::RateLimiter;
use crate::typed_data::AuthMessage;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub challenges: Arc<ChallengeStore>,
    pub sessions: Arc<SessionRegistry>,
    pub nonce_rate_limiter: Arc<RateLimiter>,
    pub metrics: SignalMetrics,
    pub metrics_token: Option<String>,
    pub start_time: Instant,
}

/// Body of a nonce request.
#[derive(Debug, Deserialize)]
pub struct NonceRequest {
    pub address: String,
    pub chain_id: u64,
    pub domain: String,
    pub uri: String,
}

/// Middleware to check bearer token for the metrics endpoint.
async fn metrics_auth_middleware(
    State(state): State<HttpState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/metrics" {
        if let Some(ref expected_token) = state.metrics_token {
            let auth_header = request.headers().get(header::AUTHORIZATION);
            let is_authorized = auth_header.is_some_and(|h| {
                h.to_str()
                    .map(|s| {
                        s.strip_prefix("Bearer ")
                            .is_some_and(|token| token == expected_token)
                    })
                    .unwrap_or(false)
            });

            if !is_authorized {
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    "Unauthorized",
                )
                    .into_response();
            }
        }
    }

    next.run(request).await
}

/// Creates the HTTP router.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/auth/nonce", post(nonce_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_auth_middleware,
        ))
        .with_state(state)
}

/// Issues a nonce challenge and returns the full typed data the client's
/// wallet needs to produce a signature with no further server interaction.
async fn nonce_handler(
    State(state): State<HttpState>,
    Json(req): Json<NonceRequest>,
) -> impl IntoResponse {
    let address: Address = match req.address.parse() {
        Ok(addr) => addr,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": e.to_string()})),
            );
        }
    };
    if req.domain.is_empty() || req.uri.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "domain and uri are required"})),
        );
    }

    // Keyed by canonical address so casing games don't widen the budget.
    if !state.nonce_rate_limiter.consume(&address.to_checksum()) {
        state.metrics.rate_limited.inc();
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({"error": "too many nonce requests"})),
        );
    }

    match state
        .challenges
        .issue(address, req.chain_id, req.domain, req.uri)
    {
        Ok(challenge) => {
            state.metrics.nonces_issued.inc();
            debug!("Issued nonce challenge for chain {}", challenge.chain_id);
            let message = AuthMessage::from_challenge(&challenge);
            (StatusCode::OK, Json(message.typed_data()))
        }
        Err(IssueError::CapacityExhausted) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "challenge store at capacity"})),
        ),
    }
}

/// Liveness endpoint.
async fn health_handler(State(state): State<HttpState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "identities_online": state.sessions.online_count(),
        "pending_challenges": state.challenges.pending_count(),
    }))
}

/// Prometheus metrics in text format.
async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}
