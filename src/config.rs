//! Server Configuration
//!
//! Configuration loaded from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

/// Signaling server configuration.
#[derive(Debug, Clone)]
pub struct SignalConfig {
    /// Address the WebSocket listener binds to.
    pub listen_addr: SocketAddr,
    /// Address the HTTP server (nonce endpoint, health, metrics) binds to.
    pub http_addr: SocketAddr,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Maximum WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Nonce challenge time-to-live in seconds.
    pub nonce_ttl_secs: u64,
    /// Maximum pending (unredeemed) challenges held in memory.
    pub max_pending_challenges: usize,
    /// Interval between expired-challenge sweeps, in seconds.
    pub sweep_interval_secs: u64,
    /// Rate limit for chat events (per minute per identity).
    pub event_rate_limit_per_min: u32,
    /// Rate limit for nonce requests (per minute per address).
    pub nonce_rate_limit_per_min: u32,
    /// Idle timeout in seconds (handshake and event loop, slowloris protection).
    pub idle_timeout_secs: u64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            listen_addr: "0.0.0.0:9080".parse().unwrap(),
            http_addr: "127.0.0.1:9081".parse().unwrap(),
            max_connections: 1000,
            max_message_size: 65_536, // 64 KiB, chat events are small
            nonce_ttl_secs: 300,      // 5 minutes
            max_pending_challenges: 10_000,
            sweep_interval_secs: 60,
            event_rate_limit_per_min: 120,
            nonce_rate_limit_per_min: 10,
            idle_timeout_secs: 300,
        }
    }
}

impl SignalConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("SIGNAL_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }

        if let Ok(addr) = std::env::var("SIGNAL_HTTP_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.http_addr = parsed;
            }
        }

        if let Ok(val) = std::env::var("SIGNAL_MAX_CONNECTIONS") {
            if let Ok(parsed) = val.parse() {
                config.max_connections = parsed;
            }
        }

        if let Ok(val) = std::env::var("SIGNAL_MAX_MESSAGE_SIZE") {
            if let Ok(parsed) = val.parse() {
                config.max_message_size = parsed;
            }
        }

        if let Ok(val) = std::env::var("SIGNAL_NONCE_TTL_SECS") {
            if let Ok(parsed) = val.parse() {
                config.nonce_ttl_secs = parsed;
            }
        }

        if let Ok(val) = std::env::var("SIGNAL_MAX_PENDING_CHALLENGES") {
            if let Ok(parsed) = val.parse() {
                config.max_pending_challenges = parsed;
            }
        }

        if let Ok(val) = std::env::var("SIGNAL_SWEEP_INTERVAL") {
            if let Ok(parsed) = val.parse() {
                config.sweep_interval_secs = parsed;
            }
        }

        if let Ok(val) = std::env::var("SIGNAL_EVENT_RATE_LIMIT") {
            if let Ok(parsed) = val.parse() {
                config.event_rate_limit_per_min = parsed;
            }
        }

        if let Ok(val) = std::env::var("SIGNAL_NONCE_RATE_LIMIT") {
            if let Ok(parsed) = val.parse() {
                config.nonce_rate_limit_per_min = parsed;
            }
        }

        if let Ok(val) = std::env::var("SIGNAL_IDLE_TIMEOUT") {
            if let Ok(parsed) = val.parse() {
                config.idle_timeout_secs = parsed;
            }
        }

        config
    }

    /// Returns the nonce TTL as a Duration.
    pub fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.nonce_ttl_secs)
    }

    /// Returns the sweep interval as a Duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Returns the idle timeout as a Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SignalConfig::default();

        assert_eq!(config.listen_addr.port(), 9080);
        assert_eq!(config.http_addr.port(), 9081);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.nonce_ttl_secs, 300);
        assert_eq!(config.max_pending_challenges, 10_000);
        assert_eq!(config.event_rate_limit_per_min, 120);
    }

    #[test]
    fn test_nonce_ttl_duration() {
        let config = SignalConfig::default();
        assert_eq!(config.nonce_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_idle_timeout_duration() {
        let config = SignalConfig::default();
        assert_eq!(config.idle_timeout(), Duration::from_secs(300));
    }
}
