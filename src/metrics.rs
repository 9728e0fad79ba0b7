//! Prometheus Metrics
//!
//! Observability for the signaling server: connection churn, authentication
//! outcomes, nonce lifecycle, relay and presence traffic.

use prometheus::{IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Signaling server metrics.
#[derive(Clone)]
pub struct SignalMetrics {
    /// Registry for all metrics.
    pub registry: Arc<Registry>,

    /// Total WebSocket connections accepted.
    pub connections_total: IntCounter,
    /// Current active WebSocket connections.
    pub connections_active: IntGauge,
    /// Connection errors (handshake failures, capacity rejections).
    pub connection_errors: IntCounter,

    /// Successful wallet authentications.
    pub auth_success: IntCounter,
    /// Failed authentication attempts (any reason; the reason is only logged).
    pub auth_failures: IntCounter,

    /// Nonce challenges issued.
    pub nonces_issued: IntCounter,
    /// Expired or consumed challenges removed by the sweep task.
    pub nonces_swept: IntCounter,

    /// Direct messages relayed (counted once per send, not per fan-out copy).
    pub dms_relayed: IntCounter,
    /// Identities currently online.
    pub identities_online: IntGauge,
    /// Rooms currently active.
    pub rooms_active: IntGauge,
    /// Events rejected by rate limiting.
    pub rate_limited: IntCounter,
}

impl SignalMetrics {
    /// Creates a new metrics instance with all collectors registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_total = IntCounter::with_opts(Opts::new(
            "signal_connections_total",
            "Total WebSocket connections accepted",
        ))
        .unwrap();

        let connections_active = IntGauge::with_opts(Opts::new(
            "signal_connections_active",
            "Current active WebSocket connections",
        ))
        .unwrap();

        let connection_errors = IntCounter::with_opts(Opts::new(
            "signal_connection_errors_total",
            "Total connection errors",
        ))
        .unwrap();

        let auth_success = IntCounter::with_opts(Opts::new(
            "signal_auth_success_total",
            "Successful wallet authentications",
        ))
        .unwrap();

        let auth_failures = IntCounter::with_opts(Opts::new(
            "signal_auth_failures_total",
            "Failed authentication attempts",
        ))
        .unwrap();

        let nonces_issued = IntCounter::with_opts(Opts::new(
            "signal_nonces_issued_total",
            "Nonce challenges issued",
        ))
        .unwrap();

        let nonces_swept = IntCounter::with_opts(Opts::new(
            "signal_nonces_swept_total",
            "Challenges removed by the sweep task",
        ))
        .unwrap();

        let dms_relayed = IntCounter::with_opts(Opts::new(
            "signal_dms_relayed_total",
            "Direct messages relayed",
        ))
        .unwrap();

        let identities_online = IntGauge::with_opts(Opts::new(
            "signal_identities_online",
            "Identities currently online",
        ))
        .unwrap();

        let rooms_active = IntGauge::with_opts(Opts::new(
            "signal_rooms_active",
            "Rooms currently active",
        ))
        .unwrap();

        let rate_limited = IntCounter::with_opts(Opts::new(
            "signal_rate_limited_total",
            "Events rejected by rate limiting",
        ))
        .unwrap();

        registry
            .register(Box::new(connections_total.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_active.clone()))
            .unwrap();
        registry
            .register(Box::new(connection_errors.clone()))
            .unwrap();
        registry.register(Box::new(auth_success.clone())).unwrap();
        registry.register(Box::new(auth_failures.clone())).unwrap();
        registry.register(Box::new(nonces_issued.clone())).unwrap();
        registry.register(Box::new(nonces_swept.clone())).unwrap();
        registry.register(Box::new(dms_relayed.clone())).unwrap();
        registry
            .register(Box::new(identities_online.clone()))
            .unwrap();
        registry.register(Box::new(rooms_active.clone())).unwrap();
        registry.register(Box::new(rate_limited.clone())).unwrap();

        SignalMetrics {
            registry: Arc::new(registry),
            connections_total,
            connections_active,
            connection_errors,
            auth_success,
            auth_failures,
            nonces_issued,
            nonces_swept,
            dms_relayed,
            identities_online,
            rooms_active,
            rate_limited,
        }
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for SignalMetrics {
    fn default() -> Self {
        Self::new()
    }
}
