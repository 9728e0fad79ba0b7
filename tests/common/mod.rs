// SPDX-License-Identifier: GPL-3.0-or-later

//! Common test utilities for signaling server integration tests.

use std::sync::Arc;
use std::time::Duration;

use k256::ecdsa::SigningKey;

use wallet_signal::challenge::{ChallengeStore, NonceChallenge};
use wallet_signal::handler::ConnectionDeps;
use wallet_signal::identity::Address;
use wallet_signal::metrics::SignalMetrics;
use wallet_signal::presence::SessionRegistry;
use wallet_signal::rate_limit::RateLimiter;
use wallet_signal::rooms::RoomRegistry;
use wallet_signal::typed_data::{self, AuthMessage};

/// A deterministic test wallet.
pub struct TestWallet {
    pub key: SigningKey,
    pub address: Address,
}

/// Creates a wallet from a small seed. Distinct seeds give distinct keys.
#[allow(dead_code)]
pub fn test_wallet(seed: u8) -> TestWallet {
    let mut bytes = [0u8; 32];
    bytes[31] = seed;
    bytes[7] = seed.wrapping_mul(13);
    let key = SigningKey::from_slice(&bytes).expect("valid test key");
    let address = typed_data::key_address(key.verifying_key());
    TestWallet { key, address }
}

/// Signs the typed message reconstructed from `challenge`, producing the
/// hex-encoded 65-byte signature a client would present.
#[allow(dead_code)]
pub fn sign_challenge(challenge: &NonceChallenge, key: &SigningKey) -> String {
    let message = AuthMessage::from_challenge(challenge);
    let (sig, recid) = key
        .sign_prehash_recoverable(&message.signing_hash())
        .expect("signing succeeds");
    let mut bytes = sig.to_bytes().to_vec();
    bytes.push(27 + recid.to_byte());
    hex::encode(bytes)
}

/// Shared registries backing a test server; clones of the inner `Arc`s are
/// handed to each connection.
pub struct TestState {
    pub challenges: Arc<ChallengeStore>,
    pub sessions: Arc<SessionRegistry>,
    pub rooms: Arc<RoomRegistry>,
    pub event_rate_limiter: Arc<RateLimiter>,
    pub metrics: SignalMetrics,
}

#[allow(dead_code)]
impl TestState {
    pub fn new() -> Self {
        TestState {
            challenges: Arc::new(ChallengeStore::new(Duration::from_secs(300), 1000)),
            sessions: Arc::new(SessionRegistry::new()),
            rooms: Arc::new(RoomRegistry::new()),
            event_rate_limiter: Arc::new(RateLimiter::new(600)),
            metrics: SignalMetrics::new(),
        }
    }

    /// Dependencies for one connection handler.
    pub fn deps(&self) -> ConnectionDeps {
        ConnectionDeps {
            challenges: self.challenges.clone(),
            sessions: self.sessions.clone(),
            rooms: self.rooms.clone(),
            event_rate_limiter: self.event_rate_limiter.clone(),
            metrics: self.metrics.clone(),
            max_message_size: 65_536,
            idle_timeout: Duration::from_secs(5),
        }
    }

    /// Issues a challenge for `wallet` and returns the signed auth frame
    /// fields (nonce, signature).
    pub fn issue_signed(&self, wallet: &TestWallet) -> (String, String) {
        let challenge = self
            .challenges
            .issue(
                wallet.address,
                1,
                "chat.example".to_string(),
                "https://chat.example".to_string(),
            )
            .expect("issue succeeds");
        let signature = sign_challenge(&challenge, &wallet.key);
        (challenge.nonce, signature)
    }
}
