// SPDX-License-Identifier: GPL-3.0-or-later

//! Wallet Signal Server
//!
//! A real-time signaling and presence server for peer-to-peer chat where
//! identity is a wallet address. Provides:
//! - HTTP endpoint issuing one-time typed-data auth challenges
//! - WebSocket endpoint with signature-verified handshake
//! - Presence registry (multi-device online/offline broadcasts)
//! - Direct-message relay and room membership tracking
//! - Health check and Prometheus metrics

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tracing::{error, info, warn};

use wallet_signal::challenge::ChallengeStore;
use wallet_signal::config::SignalConfig;
use wallet_signal::connection_limit::ConnectionLimiter;
use wallet_signal::handler::{self, ConnectionDeps};
use wallet_signal::http::{create_router, HttpState};
use wallet_signal::metrics::SignalMetrics;
use wallet_signal::presence::SessionRegistry;
use wallet_signal::rate_limit::RateLimiter;
use wallet_signal::rooms::RoomRegistry;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wallet_signal=info".parse().unwrap()),
        )
        .init();

    let config = SignalConfig::from_env();

    // Refuse non-localhost deployment unless TLS termination is confirmed:
    // signatures and presence data must not cross the wire in cleartext.
    let is_localhost = config.listen_addr.ip().is_loopback();
    let tls_verified = std::env::var("SIGNAL_TLS_VERIFIED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    if !is_localhost && !tls_verified {
        error!(
            "Refusing to listen on {} without TLS: run behind a TLS-terminating \
             proxy and set SIGNAL_TLS_VERIFIED=true, or bind to 127.0.0.1",
            config.listen_addr
        );
        std::process::exit(1);
    }

    info!("Starting Wallet Signal Server v{}", env!("CARGO_PKG_VERSION"));
    info!("WebSocket: {}", config.listen_addr);
    info!("HTTP (nonce/health/metrics): {}", config.http_addr);
    info!("Nonce TTL: {}s", config.nonce_ttl_secs);
    info!("Idle timeout: {}s", config.idle_timeout_secs);

    let metrics = SignalMetrics::new();
    let challenges = Arc::new(ChallengeStore::new(
        config.nonce_ttl(),
        config.max_pending_challenges,
    ));
    let sessions = Arc::new(SessionRegistry::new());
    let rooms = Arc::new(RoomRegistry::new());
    let event_rate_limiter = Arc::new(RateLimiter::new(config.event_rate_limit_per_min));
    let nonce_rate_limiter = Arc::new(RateLimiter::new(config.nonce_rate_limit_per_min));
    let connection_limiter = ConnectionLimiter::new(config.max_connections);

    let metrics_token = std::env::var("SIGNAL_METRICS_TOKEN").ok();
    if metrics_token.is_some() {
        info!("Metrics endpoint protected with bearer token");
    }

    // HTTP server: nonce issuance, health, metrics.
    let http_state = HttpState {
        challenges: challenges.clone(),
        sessions: sessions.clone(),
        nonce_rate_limiter: nonce_rate_limiter.clone(),
        metrics: metrics.clone(),
        metrics_token,
        start_time: Instant::now(),
    };
    let http_router = create_router(http_state);
    let http_addr = config.http_addr;
    let http_listener = TcpListener::bind(&http_addr)
        .await
        .expect("Failed to bind HTTP listener");
    tokio::spawn(async move {
        info!("HTTP server listening on {}", http_addr);
        axum::serve(http_listener, http_router).await.unwrap();
    });

    // Sweep expired and consumed challenges so nonce-request flooding cannot
    // grow memory without bound.
    let sweep_challenges = challenges.clone();
    let sweep_metrics = metrics.clone();
    let sweep_interval = config.sweep_interval();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(sweep_interval).await;
            let removed = sweep_challenges.sweep_expired();
            if removed > 0 {
                info!("Swept {} stale nonce challenges", removed);
                sweep_metrics.nonces_swept.inc_by(removed as u64);
            }
        }
    });

    // Drop idle rate-limiter buckets.
    let cleanup_event_limiter = event_rate_limiter.clone();
    let cleanup_nonce_limiter = nonce_rate_limiter.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(600)).await;
            let removed = cleanup_event_limiter.cleanup_inactive(Duration::from_secs(1800))
                + cleanup_nonce_limiter.cleanup_inactive(Duration::from_secs(1800));
            if removed > 0 {
                info!("Cleaned up {} stale rate limiter entries", removed);
            }
        }
    });

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .expect("Failed to bind WebSocket listener");
    info!("WebSocket server listening on {}", config.listen_addr);

    while let Ok((stream, _addr)) = listener.accept().await {
        let connection_guard = match connection_limiter.try_acquire() {
            Some(guard) => guard,
            None => {
                warn!(
                    "Connection rejected: at max capacity ({}/{})",
                    connection_limiter.active_count(),
                    config.max_connections
                );
                metrics.connection_errors.inc();
                drop(stream);
                continue;
            }
        };

        let deps = ConnectionDeps {
            challenges: challenges.clone(),
            sessions: sessions.clone(),
            rooms: rooms.clone(),
            event_rate_limiter: event_rate_limiter.clone(),
            metrics: metrics.clone(),
            max_message_size: config.max_message_size,
            idle_timeout: config.idle_timeout(),
        };
        let metrics = metrics.clone();
        let idle_timeout = config.idle_timeout();

        tokio::spawn(async move {
            // Holds the connection slot until the handler returns.
            let _guard = connection_guard;

            // Bound the WebSocket upgrade itself (slowloris protection).
            match tokio::time::timeout(idle_timeout, accept_async(stream)).await {
                Ok(Ok(ws_stream)) => {
                    metrics.connections_total.inc();
                    metrics.connections_active.inc();
                    handler::handle_connection(ws_stream, deps).await;
                    metrics.connections_active.dec();
                }
                Ok(Err(e)) => {
                    warn!("WebSocket handshake failed: {}", e);
                    metrics.connection_errors.inc();
                }
                Err(_) => {
                    warn!("WebSocket handshake timeout (slowloris protection)");
                    metrics.connection_errors.inc();
                }
            }
        });
    }
}
