// SPDX-License-Identifier: GPL-3.0-or-later

//! Session Registry (Presence)
//!
//! Maps each authenticated identity to the set of live connections currently
//! acting as that identity (multi-device). The registry is the source of
//! truth for online/offline: an identity is online iff its connection set is
//! non-empty, and empty sets are never retained.
//!
//! Each connection is an async channel sender carrying pre-encoded event
//! payloads; the connection handler forwards received payloads to its
//! WebSocket. All mutations go through one lock, so for a given identity the
//! offline transition can never be observed before the online transition that
//! preceded it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tokio::sync::mpsc;

use crate::identity::Address;

/// Process-unique connection identifier.
pub type ConnId = u64;

/// A pre-encoded event payload deliverable to a connection.
#[derive(Debug, Clone)]
pub struct SessionMessage {
    /// JSON text to send over the WebSocket.
    pub data: String,
}

/// Thread-safe registry of authenticated connections, keyed by identity.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Address, HashMap<ConnId, mpsc::Sender<SessionMessage>>>>,
    next_conn_id: AtomicU64,
}

impl SessionRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        SessionRegistry {
            sessions: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Registers a new connection for `address`.
    ///
    /// Returns the connection id, the receiving end of its delivery channel,
    /// and whether this was the offline-to-online transition for the
    /// identity.
    pub fn register(
        &self,
        address: Address,
    ) -> (ConnId, mpsc::Receiver<SessionMessage>, bool) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(64);

        let mut sessions = self.sessions.write().unwrap();
        let connections = sessions.entry(address).or_default();
        let came_online = connections.is_empty();
        connections.insert(conn_id, tx);
        (conn_id, rx, came_online)
    }

    /// Removes a connection. Returns true if the identity went offline
    /// (its last connection was removed); the empty entry is deleted.
    pub fn deregister(&self, address: Address, conn_id: ConnId) -> bool {
        let mut sessions = self.sessions.write().unwrap();
        let Some(connections) = sessions.get_mut(&address) else {
            return false;
        };
        connections.remove(&conn_id);
        if connections.is_empty() {
            sessions.remove(&address);
            true
        } else {
            false
        }
    }

    /// All currently online identities.
    pub fn snapshot(&self) -> Vec<Address> {
        let sessions = self.sessions.read().unwrap();
        sessions.keys().copied().collect()
    }

    /// Delivers a payload to every connection of `address`. Returns the
    /// number of connections the payload was queued to; 0 when the identity
    /// is offline (not an error).
    pub fn send_to(&self, address: Address, data: &str) -> usize {
        let sessions = self.sessions.read().unwrap();
        let Some(connections) = sessions.get(&address) else {
            return 0;
        };
        connections
            .values()
            .filter(|tx| {
                tx.try_send(SessionMessage {
                    data: data.to_string(),
                })
                .is_ok()
            })
            .count()
    }

    /// Delivers a payload to every registered connection, optionally
    /// skipping one (the originator). Slow consumers with full channels are
    /// dropped silently — delivery is best-effort.
    pub fn broadcast(&self, data: &str, except: Option<ConnId>) {
        let sessions = self.sessions.read().unwrap();
        for connections in sessions.values() {
            for (conn_id, tx) in connections {
                if Some(*conn_id) == except {
                    continue;
                }
                let _ = tx.try_send(SessionMessage {
                    data: data.to_string(),
                });
            }
        }
    }

    /// Returns the number of online identities.
    pub fn online_count(&self) -> usize {
        let sessions = self.sessions.read().unwrap();
        sessions.len()
    }

    /// Returns the total number of registered connections.
    pub fn connection_count(&self) -> usize {
        let sessions = self.sessions.read().unwrap();
        sessions.values().map(HashMap::len).sum()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(seed: u8) -> Address {
        Address::from_bytes([seed; 20])
    }

    #[tokio::test]
    async fn test_first_register_comes_online() {
        let registry = SessionRegistry::new();
        let (_, _rx, came_online) = registry.register(addr(1));
        assert!(came_online);
        assert_eq!(registry.online_count(), 1);
    }

    #[tokio::test]
    async fn test_second_connection_not_online_transition() {
        let registry = SessionRegistry::new();
        let (_, _rx1, first) = registry.register(addr(1));
        let (_, _rx2, second) = registry.register(addr(1));
        assert!(first);
        assert!(!second);
        assert_eq!(registry.online_count(), 1);
        assert_eq!(registry.connection_count(), 2);
    }

    #[tokio::test]
    async fn test_offline_only_after_last_deregister() {
        let registry = SessionRegistry::new();
        let (c1, _rx1, _) = registry.register(addr(1));
        let (c2, _rx2, _) = registry.register(addr(1));

        assert!(!registry.deregister(addr(1), c1));
        assert_eq!(registry.online_count(), 1);
        assert!(registry.deregister(addr(1), c2));
        assert_eq!(registry.online_count(), 0);
        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_send_to_fans_out_to_all_connections() {
        let registry = SessionRegistry::new();
        let (_, mut rx1, _) = registry.register(addr(1));
        let (_, mut rx2, _) = registry.register(addr(1));
        let (_, mut rx3, _) = registry.register(addr(1));

        assert_eq!(registry.send_to(addr(1), "hello"), 3);
        assert_eq!(rx1.recv().await.unwrap().data, "hello");
        assert_eq!(rx2.recv().await.unwrap().data, "hello");
        assert_eq!(rx3.recv().await.unwrap().data, "hello");
    }

    #[tokio::test]
    async fn test_send_to_offline_is_noop() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.send_to(addr(9), "hello"), 0);
    }

    #[tokio::test]
    async fn test_broadcast_skips_excluded_connection() {
        let registry = SessionRegistry::new();
        let (c1, mut rx1, _) = registry.register(addr(1));
        let (_, mut rx2, _) = registry.register(addr(2));

        registry.broadcast("ping", Some(c1));
        assert_eq!(rx2.recv().await.unwrap().data, "ping");
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let registry = SessionRegistry::new();
        let (c1, _rx1, _) = registry.register(addr(1));
        let (_, _rx2, came_online) = registry.register(addr(2));
        assert!(came_online);

        assert!(registry.deregister(addr(1), c1));
        assert_eq!(registry.online_count(), 1);
        assert_eq!(registry.snapshot(), vec![addr(2)]);
    }
}
