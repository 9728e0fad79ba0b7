// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Connection Handler
//!
//! Orchestrates the lifecycle of one client connection: authentication,
//! registration into the session registry, event dispatch (direct-message
//! relay, room membership), and teardown.
//!
//! Per-connection state machine: Connecting → Authenticating → Authenticated
//! → Closed, with a direct edge to Closed on any authentication failure. All
//! auth failures look identical to the client — an abrupt close with no error
//! payload — so a probing client cannot distinguish an unknown nonce from a
//! bad signature. The reason is logged server-side.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::challenge::ChallengeStore;
use crate::identity::Address;
use crate::metrics::SignalMetrics;
use crate::presence::SessionRegistry;
use crate::protocol::{
    self, AuthRequest, ClientEvent, DirectMessage, PresenceEntry, ServerEvent,
};
use crate::rate_limit::RateLimiter;
use crate::rooms::RoomRegistry;
use crate::typed_data::{self, AuthMessage};

/// Shared dependencies for handling a WebSocket connection.
pub struct ConnectionDeps {
    pub challenges: Arc<ChallengeStore>,
    pub sessions: Arc<SessionRegistry>,
    pub rooms: Arc<RoomRegistry>,
    pub event_rate_limiter: Arc<RateLimiter>,
    pub metrics: SignalMetrics,
    pub max_message_size: usize,
    pub idle_timeout: Duration,
}

/// Current unix time in seconds.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Validates an auth request against the challenge store and recovers the
/// signing address.
///
/// On success the nonce is consumed and the verified identity returned. Every
/// failure collapses to a static reason string for the server log; the client
/// only ever observes the connection closing.
pub fn authenticate(
    auth: &AuthRequest,
    challenges: &ChallengeStore,
) -> Result<Address, &'static str> {
    if auth.address.is_empty() || auth.signature.is_empty() || auth.nonce.is_empty() {
        return Err("missing auth fields");
    }

    let claimed: Address = auth.address.parse().map_err(|_| "malformed address")?;

    let challenge = challenges.redeem(&auth.nonce).map_err(|e| match e {
        crate::challenge::ChallengeError::NotFound => "unknown nonce",
        crate::challenge::ChallengeError::AlreadyConsumed => "nonce already consumed",
        crate::challenge::ChallengeError::Expired => "nonce expired",
    })?;

    if challenge.address != claimed {
        return Err("nonce bound to different identity");
    }

    // Rebuilt from stored challenge data only; the client cannot substitute
    // any field of what it signed.
    let message = AuthMessage::from_challenge(&challenge);
    let recovered = typed_data::verify(&message, &auth.signature).map_err(|e| match e {
        typed_data::VerifyError::MalformedSignature => "malformed signature",
        typed_data::VerifyError::InvalidSignature => "signature verification failed",
    })?;

    if recovered != claimed {
        return Err("recovered identity mismatch");
    }

    // Burned only now, after verification, so a transport failure on an
    // earlier attempt never costs the client its nonce.
    challenges.consume(&auth.nonce);
    Ok(claimed)
}

/// Handles a WebSocket connection from accept to teardown.
pub async fn handle_connection(ws_stream: WebSocketStream<TcpStream>, deps: ConnectionDeps) {
    let ConnectionDeps {
        challenges,
        sessions,
        rooms,
        event_rate_limiter,
        metrics,
        max_message_size,
        idle_timeout,
    } = deps;
    // Random session label for correlating log lines of one connection.
    let session = &uuid::Uuid::new_v4().to_string()[..8];

    let (mut write, mut read) = ws_stream.split();

    // The first frame must be the auth handshake, within the idle timeout.
    let auth_frame = match timeout(idle_timeout, read.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(_))) => {
            warn!("[{}] Expected text frame for auth", session);
            metrics.auth_failures.inc();
            return;
        }
        Ok(Some(Err(e))) => {
            warn!("[{}] Error reading auth frame: {}", session, e);
            return;
        }
        Ok(None) => {
            debug!("[{}] Connection closed before auth", session);
            return;
        }
        Err(_) => {
            warn!("[{}] Auth timeout (slowloris protection)", session);
            return;
        }
    };

    let auth = match protocol::decode_client_event(&auth_frame) {
        Ok(ClientEvent::Auth(auth)) => auth,
        Ok(other) => {
            warn!("[{}] Expected auth, got {:?}", session, other);
            metrics.auth_failures.inc();
            return;
        }
        Err(e) => {
            warn!("[{}] Failed to decode auth frame: {}", session, e);
            metrics.auth_failures.inc();
            return;
        }
    };

    let address = match authenticate(&auth, &challenges) {
        Ok(address) => address,
        Err(reason) => {
            warn!("[{}] Auth failed: {}", session, reason);
            metrics.auth_failures.inc();
            return;
        }
    };
    metrics.auth_success.inc();
    debug!("[{}] Authenticated {}", session, address);

    let (conn_id, mut session_rx, came_online) = sessions.register(address);
    metrics.identities_online.set(sessions.online_count() as i64);

    // Exactly one online broadcast per offline-to-online transition, to every
    // connection except the new one.
    if came_online {
        if let Ok(data) = protocol::encode_server_event(&ServerEvent::PresenceOnline { address }) {
            sessions.broadcast(&data, Some(conn_id));
        }
        info!("[{}] {} online", session, address);
    }

    // Full presence snapshot to the newly authenticated connection only.
    let snapshot = ServerEvent::PresenceSnapshot {
        users: sessions
            .snapshot()
            .into_iter()
            .map(|address| PresenceEntry {
                address,
                online: true,
            })
            .collect(),
    };
    if let Ok(data) = protocol::encode_server_event(&snapshot) {
        if write.send(Message::Text(data)).await.is_err() {
            warn!("[{}] Failed to send presence snapshot", session);
            finish_connection(&sessions, &rooms, &metrics, address, conn_id, session);
            return;
        }
    }

    // Event loop: multiplex client frames with deliveries from other
    // handlers via the session channel.
    loop {
        let msg = tokio::select! {
            ws_msg = timeout(idle_timeout, read.next()) => {
                match ws_msg {
                    Ok(Some(msg)) => msg,
                    Ok(None) => {
                        debug!("[{}] Disconnected", session);
                        break;
                    }
                    Err(_) => {
                        warn!("[{}] Idle timeout (slowloris protection)", session);
                        break;
                    }
                }
            }
            Some(session_msg) = session_rx.recv() => {
                let _ = write.send(Message::Text(session_msg.data)).await;
                continue;
            }
        };

        match msg {
            Ok(Message::Text(text)) => {
                if text.len() > max_message_size {
                    warn!("[{}] Frame too large: {} bytes", session, text.len());
                    continue;
                }

                let event = match protocol::decode_client_event(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        debug!("[{}] Failed to decode event: {}", session, e);
                        continue;
                    }
                };

                match event {
                    ClientEvent::DmSend { to, body } => {
                        // Malformed sends are dropped silently.
                        if to.is_empty() || body.is_empty() {
                            debug!("[{}] Ignoring dm:send with empty field", session);
                            continue;
                        }
                        let Ok(recipient) = to.parse::<Address>() else {
                            debug!("[{}] Ignoring dm:send to malformed address", session);
                            continue;
                        };
                        if !event_rate_limiter.consume(&address.to_checksum()) {
                            metrics.rate_limited.inc();
                            warn!("[{}] Rate limited", session);
                            continue;
                        }

                        let dm = DirectMessage {
                            from: address,
                            to: recipient,
                            body,
                            ts: unix_now(),
                        };

                        // Best-effort fan-out to every connection of the
                        // recipient; offline recipients are a silent no-op.
                        if let Ok(data) =
                            protocol::encode_server_event(&ServerEvent::DmReceive(dm.clone()))
                        {
                            let delivered = sessions.send_to(recipient, &data);
                            debug!("[{}] Relayed dm to {} connections", session, delivered);
                        }
                        // Echo to the sender's own socket so its UI reflects
                        // the sent message.
                        if let Ok(data) =
                            protocol::encode_server_event(&ServerEvent::DmSent(dm))
                        {
                            let _ = write.send(Message::Text(data)).await;
                        }
                        metrics.dms_relayed.inc();
                    }
                    ClientEvent::JoinChat { chat_id } => {
                        if chat_id.is_empty() {
                            continue;
                        }
                        if rooms.join(&chat_id, address) {
                            info!("[{}] Room {} active", session, chat_id);
                        }
                        metrics.rooms_active.set(rooms.room_count() as i64);
                    }
                    ClientEvent::LeaveChat { chat_id } => {
                        if rooms.leave(&chat_id, address) {
                            info!("[{}] Room {} inactive", session, chat_id);
                        }
                        metrics.rooms_active.set(rooms.room_count() as i64);
                    }
                    ClientEvent::Auth(_) => {
                        // Already authenticated; ignore duplicates.
                        debug!("[{}] Ignoring duplicate auth", session);
                    }
                    ClientEvent::Unknown => {
                        debug!("[{}] Unknown event type", session);
                    }
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => {
                debug!("[{}] Client sent close", session);
                break;
            }
            Ok(_) => {
                // Binary, pong, etc. — not part of the protocol.
            }
            Err(e) => {
                warn!("[{}] Connection error: {}", session, e);
                break;
            }
        }
    }

    finish_connection(&sessions, &rooms, &metrics, address, conn_id, session);
}

/// Teardown: deregister, and on the identity's last connection broadcast
/// offline and drop its room memberships. Runs on every exit path once the
/// connection is authenticated.
fn finish_connection(
    sessions: &SessionRegistry,
    rooms: &RoomRegistry,
    metrics: &SignalMetrics,
    address: Address,
    conn_id: u64,
    session: &str,
) {
    let went_offline = sessions.deregister(address, conn_id);
    metrics.identities_online.set(sessions.online_count() as i64);

    if went_offline {
        if let Ok(data) = protocol::encode_server_event(&ServerEvent::PresenceOffline { address })
        {
            sessions.broadcast(&data, None);
        }
        // Membership is per-identity: rooms are only vacated when the last
        // connection goes away.
        for room in rooms.leave_all(address) {
            info!("[{}] Room {} inactive", session, room);
        }
        metrics.rooms_active.set(rooms.room_count() as i64);
        info!("[{}] {} offline", session, address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    fn test_key(seed: u8) -> SigningKey {
        let mut bytes = [0u8; 32];
        bytes[31] = seed;
        bytes[15] = seed.wrapping_mul(3);
        SigningKey::from_slice(&bytes).unwrap()
    }

    fn test_store() -> ChallengeStore {
        ChallengeStore::new(Duration::from_secs(300), 100)
    }

    fn issue_and_sign(store: &ChallengeStore, key: &SigningKey) -> AuthRequest {
        let address = typed_data::key_address(key.verifying_key());
        let challenge = store
            .issue(address, 1, "chat.example".into(), "https://chat.example".into())
            .unwrap();
        let message = AuthMessage::from_challenge(&challenge);
        let (sig, recid) = key
            .sign_prehash_recoverable(&message.signing_hash())
            .unwrap();
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(27 + recid.to_byte());
        AuthRequest {
            address: address.to_checksum(),
            signature: hex::encode(bytes),
            nonce: challenge.nonce,
        }
    }

    #[test]
    fn test_authenticate_success_consumes_nonce() {
        let store = test_store();
        let key = test_key(1);
        let auth = issue_and_sign(&store, &key);

        let identity = authenticate(&auth, &store).unwrap();
        assert_eq!(identity, typed_data::key_address(key.verifying_key()));

        // Nonce is burned; replaying the same handshake fails.
        assert_eq!(
            authenticate(&auth, &store),
            Err("nonce already consumed")
        );
    }

    #[test]
    fn test_authenticate_rejects_missing_fields() {
        let store = test_store();
        let auth = AuthRequest {
            address: String::new(),
            signature: "00".into(),
            nonce: "aa".into(),
        };
        assert_eq!(authenticate(&auth, &store), Err("missing auth fields"));
    }

    #[test]
    fn test_authenticate_rejects_unknown_nonce() {
        let store = test_store();
        let key = test_key(2);
        let mut auth = issue_and_sign(&store, &key);
        auth.nonce = "ff".repeat(32);
        assert_eq!(authenticate(&auth, &store), Err("unknown nonce"));
    }

    #[test]
    fn test_authenticate_rejects_wrong_claimed_identity() {
        let store = test_store();
        let key = test_key(3);
        let mut auth = issue_and_sign(&store, &key);
        auth.address = Address::from_bytes([9u8; 20]).to_checksum();
        assert_eq!(
            authenticate(&auth, &store),
            Err("nonce bound to different identity")
        );
    }

    #[test]
    fn test_authenticate_rejects_wrong_signer() {
        let store = test_store();
        let key = test_key(4);
        let other = test_key(5);
        let mut auth = issue_and_sign(&store, &key);

        // Re-sign the challenge with a different key: recovery yields a
        // different address than the claimed/bound one.
        let challenge = store.redeem(&auth.nonce).unwrap();
        let message = AuthMessage::from_challenge(&challenge);
        let (sig, recid) = other
            .sign_prehash_recoverable(&message.signing_hash())
            .unwrap();
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(27 + recid.to_byte());
        auth.signature = hex::encode(bytes);

        assert_eq!(
            authenticate(&auth, &store),
            Err("recovered identity mismatch")
        );
        // A failed attempt does not burn the nonce.
        assert!(store.redeem(&auth.nonce).is_ok());
    }

    #[test]
    fn test_authenticate_failure_preserves_nonce_for_retry() {
        let store = test_store();
        let key = test_key(6);
        let good = issue_and_sign(&store, &key);

        let mut bad = good.clone();
        bad.signature = "not-hex".into();
        assert_eq!(authenticate(&bad, &store), Err("malformed signature"));

        // The legitimate retry with the same nonce still succeeds.
        assert!(authenticate(&good, &store).is_ok());
    }
}
