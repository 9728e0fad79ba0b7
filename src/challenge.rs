// SPDX-License-Identifier: GPL-3.0-or-later

//! Nonce Challenge Store
//!
//! Issues and tracks one-time, time-limited authentication challenges. A
//! client requests a challenge over HTTP, signs the reconstructed typed
//! message off-band with its wallet key, and presents the nonce with the
//! signature when opening a WebSocket connection.
//!
//! A challenge is redeemable at most once and only before its expiration.
//! `redeem` is read-only: the nonce is burned (`consume`) only after the
//! signature actually verifies, so a transport-level failure does not cost
//! the client its nonce. Expired entries are deleted on touch and swept
//! periodically; the pending map is capped to bound memory under
//! nonce-request flooding.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use thiserror::Error;

use crate::identity::Address;

/// Nonce length in bytes before hex encoding.
const NONCE_LEN: usize = 32;

/// Errors from issuing a challenge.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IssueError {
    #[error("too many pending challenges")]
    CapacityExhausted,
}

/// Errors from redeeming a challenge.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("unknown nonce")]
    NotFound,
    #[error("nonce already consumed")]
    AlreadyConsumed,
    #[error("nonce expired")]
    Expired,
}

/// A pending authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceChallenge {
    /// Hex-encoded random nonce (32 bytes of entropy), also the store key.
    pub nonce: String,
    /// Wallet address the challenge is bound to.
    pub address: Address,
    /// Chain ID the client claims to operate on.
    pub chain_id: u64,
    /// Requesting application domain (part of the signed message).
    pub domain: String,
    /// Requesting application URI (part of the signed message).
    pub uri: String,
    /// Unix seconds at issuance.
    pub issued_at: u64,
    /// Unix seconds after which the challenge is invalid.
    pub expiration_time: u64,
    /// Set once the nonce has authenticated a connection.
    pub consumed: bool,
}

/// Thread-safe store of pending challenges keyed by nonce.
pub struct ChallengeStore {
    challenges: Mutex<HashMap<String, NonceChallenge>>,
    ttl: Duration,
    max_pending: usize,
}

/// Current unix time in seconds.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl ChallengeStore {
    /// Creates a new store with the given challenge TTL and pending cap.
    pub fn new(ttl: Duration, max_pending: usize) -> Self {
        ChallengeStore {
            challenges: Mutex::new(HashMap::new()),
            ttl,
            max_pending,
        }
    }

    /// Issues a fresh challenge bound to `address`.
    ///
    /// Fails with `CapacityExhausted` when the pending map is full even after
    /// dropping expired entries.
    pub fn issue(
        &self,
        address: Address,
        chain_id: u64,
        domain: String,
        uri: String,
    ) -> Result<NonceChallenge, IssueError> {
        let now = unix_now();
        let mut challenges = self.challenges.lock().unwrap();

        if challenges.len() >= self.max_pending {
            challenges.retain(|_, c| now < c.expiration_time);
            if challenges.len() >= self.max_pending {
                return Err(IssueError::CapacityExhausted);
            }
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = hex::encode(nonce_bytes);

        let challenge = NonceChallenge {
            nonce: nonce.clone(),
            address,
            chain_id,
            domain,
            uri,
            issued_at: now,
            expiration_time: now + self.ttl.as_secs(),
            consumed: false,
        };
        challenges.insert(nonce, challenge.clone());
        Ok(challenge)
    }

    /// Looks up a challenge for redemption without consuming it.
    ///
    /// Expired entries are deleted on touch. The caller marks the nonce
    /// consumed via [`consume`](Self::consume) only after the signature over
    /// the reconstructed message verifies.
    pub fn redeem(&self, nonce: &str) -> Result<NonceChallenge, ChallengeError> {
        let mut challenges = self.challenges.lock().unwrap();
        let challenge = challenges.get(nonce).ok_or(ChallengeError::NotFound)?;

        if challenge.consumed {
            return Err(ChallengeError::AlreadyConsumed);
        }
        if unix_now() >= challenge.expiration_time {
            challenges.remove(nonce);
            return Err(ChallengeError::Expired);
        }
        Ok(challenge.clone())
    }

    /// Marks a nonce consumed. No-op for unknown nonces.
    pub fn consume(&self, nonce: &str) {
        let mut challenges = self.challenges.lock().unwrap();
        if let Some(challenge) = challenges.get_mut(nonce) {
            challenge.consumed = true;
        }
    }

    /// Removes expired and consumed entries. Returns the number removed.
    ///
    /// Driven by a periodic background task; consumed entries are kept until
    /// the sweep so a replayed nonce reports `AlreadyConsumed` rather than
    /// `NotFound` in logs.
    pub fn sweep_expired(&self) -> usize {
        let now = unix_now();
        let mut challenges = self.challenges.lock().unwrap();
        let before = challenges.len();
        challenges.retain(|_, c| !c.consumed && now < c.expiration_time);
        before - challenges.len()
    }

    /// Returns the number of challenges currently held.
    pub fn pending_count(&self) -> usize {
        let challenges = self.challenges.lock().unwrap();
        challenges.len()
    }
}
