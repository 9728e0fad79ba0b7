// SPDX-License-Identifier: GPL-3.0-or-later

//! Authentication Flow Tests
//!
//! Exercises the challenge-response protocol end to end at the component
//! level: nonce issuance, typed-message reconstruction, signature recovery,
//! and single-use redemption.

mod common;

use std::time::Duration;

use common::{sign_challenge, test_wallet};
use wallet_signal::challenge::{ChallengeError, ChallengeStore};
use wallet_signal::handler::authenticate;
use wallet_signal::protocol::AuthRequest;
use wallet_signal::typed_data::{self, AuthMessage};

fn store() -> ChallengeStore {
    ChallengeStore::new(Duration::from_secs(300), 1000)
}

#[test]
fn test_full_challenge_response_round_trip() {
    let store = store();
    let wallet = test_wallet(1);

    let challenge = store
        .issue(
            wallet.address,
            1,
            "chat.example".to_string(),
            "https://chat.example".to_string(),
        )
        .unwrap();
    let signature = sign_challenge(&challenge, &wallet.key);

    let auth = AuthRequest {
        address: wallet.address.to_checksum(),
        signature,
        nonce: challenge.nonce.clone(),
    };
    assert_eq!(authenticate(&auth, &store), Ok(wallet.address));
}

#[test]
fn test_nonce_redeemable_exactly_once() {
    let store = store();
    let wallet = test_wallet(2);

    let challenge = store
        .issue(wallet.address, 1, "d".to_string(), "u".to_string())
        .unwrap();
    let auth = AuthRequest {
        address: wallet.address.to_checksum(),
        signature: sign_challenge(&challenge, &wallet.key),
        nonce: challenge.nonce.clone(),
    };

    assert!(authenticate(&auth, &store).is_ok());
    assert_eq!(authenticate(&auth, &store), Err("nonce already consumed"));
    assert_eq!(
        store.redeem(&challenge.nonce),
        Err(ChallengeError::AlreadyConsumed)
    );
}

#[test]
fn test_expired_nonce_rejected_even_with_valid_signature() {
    let store = ChallengeStore::new(Duration::from_secs(0), 1000);
    let wallet = test_wallet(3);

    let challenge = store
        .issue(wallet.address, 1, "d".to_string(), "u".to_string())
        .unwrap();
    let auth = AuthRequest {
        address: wallet.address.to_checksum(),
        signature: sign_challenge(&challenge, &wallet.key),
        nonce: challenge.nonce,
    };
    assert_eq!(authenticate(&auth, &store), Err("nonce expired"));
}

#[test]
fn test_lowercase_claimed_address_accepted() {
    let store = store();
    let wallet = test_wallet(4);

    let challenge = store
        .issue(wallet.address, 1, "d".to_string(), "u".to_string())
        .unwrap();
    let auth = AuthRequest {
        address: wallet.address.to_checksum().to_ascii_lowercase(),
        signature: sign_challenge(&challenge, &wallet.key),
        nonce: challenge.nonce,
    };
    assert_eq!(authenticate(&auth, &store), Ok(wallet.address));
}

#[test]
fn test_signature_over_mutated_challenge_fields_invalid() {
    let store = store();
    let wallet = test_wallet(5);

    let challenge = store
        .issue(
            wallet.address,
            1,
            "chat.example".to_string(),
            "https://chat.example".to_string(),
        )
        .unwrap();

    // Sign variants of the challenge with one field changed each; none may
    // recover to the wallet when verified against the stored challenge.
    let baseline = AuthMessage::from_challenge(&challenge);
    let mutations: Vec<AuthMessage> = {
        let mut chain = baseline.clone();
        chain.chain_id = 137;
        let mut domain = baseline.clone();
        domain.domain = "evil.example".to_string();
        let mut nonce = baseline.clone();
        nonce.nonce = "00".repeat(32);
        let mut uri = baseline.clone();
        uri.uri = "https://evil.example".to_string();
        vec![chain, domain, nonce, uri]
    };

    for mutated in mutations {
        let (sig, recid) = wallet
            .key
            .sign_prehash_recoverable(&mutated.signing_hash())
            .unwrap();
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(27 + recid.to_byte());

        let auth = AuthRequest {
            address: wallet.address.to_checksum(),
            signature: hex::encode(bytes),
            nonce: challenge.nonce.clone(),
        };
        assert!(
            authenticate(&auth, &store).is_err(),
            "signature over mutated message must not authenticate"
        );
    }
}

#[test]
fn test_signer_address_matches_key_derivation() {
    let wallet = test_wallet(6);
    let derived = typed_data::key_address(wallet.key.verifying_key());
    assert_eq!(derived, wallet.address);
}
