// SPDX-License-Identifier: GPL-3.0-or-later

//! Typed-Data Authentication Messages
//!
//! Rebuilds the exact EIP-712 payload a client must have signed to redeem a
//! nonce challenge, and recovers the signing wallet address from a 65-byte
//! recoverable secp256k1 signature.
//!
//! The message is reconstructed only from server-stored challenge data plus
//! constants baked into the binary ([`APP_NAME`], [`APP_VERSION`],
//! [`STATEMENT`]). A client never supplies any field of the message it is
//! attesting to, so it cannot sign one message and present mismatched
//! metadata. Verification is pure: it returns the recovered address and the
//! caller compares it against the claimed and challenge-bound identity.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::challenge::NonceChallenge;
use crate::identity::Address;

/// Application name in the EIP-712 domain separator.
pub const APP_NAME: &str = "WalletSignal";
/// Application version in the EIP-712 domain separator.
pub const APP_VERSION: &str = "1";
/// Statement text the user attests to. Baked into the server.
pub const STATEMENT: &str = "Sign in to verify ownership of this wallet address.";

const DOMAIN_TYPE: &str = "EIP712Domain(string name,string version,uint256 chainId)";
const AUTH_TYPE: &str = "Authentication(string domain,address wallet,string statement,\
                         string uri,string version,uint256 chainId,string nonce,\
                         uint256 issuedAt,uint256 expirationTime)";

/// Errors from signature verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("signature must be 65 hex-encoded bytes")]
    MalformedSignature,
    #[error("signature verification failed")]
    InvalidSignature,
}

/// The structured message a client signs to authenticate.
///
/// Built exclusively from a stored [`NonceChallenge`] via
/// [`AuthMessage::from_challenge`].
#[derive(Debug, Clone)]
pub struct AuthMessage {
    pub domain: String,
    pub wallet: Address,
    pub uri: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: u64,
    pub expiration_time: u64,
}

fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// ABI-encodes a u64 as a 32-byte big-endian word.
fn encode_uint(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// ABI-encodes an address as a left-padded 32-byte word.
fn encode_address(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

impl AuthMessage {
    /// Reconstructs the message for a stored challenge.
    pub fn from_challenge(challenge: &NonceChallenge) -> Self {
        AuthMessage {
            domain: challenge.domain.clone(),
            wallet: challenge.address,
            uri: challenge.uri.clone(),
            chain_id: challenge.chain_id,
            nonce: challenge.nonce.clone(),
            issued_at: challenge.issued_at,
            expiration_time: challenge.expiration_time,
        }
    }

    /// EIP-712 domain separator over `{name, version, chainId}`.
    fn domain_separator(&self) -> [u8; 32] {
        let mut enc = Vec::with_capacity(4 * 32);
        enc.extend_from_slice(&keccak256(DOMAIN_TYPE.as_bytes()));
        enc.extend_from_slice(&keccak256(APP_NAME.as_bytes()));
        enc.extend_from_slice(&keccak256(APP_VERSION.as_bytes()));
        enc.extend_from_slice(&encode_uint(self.chain_id));
        keccak256(&enc)
    }

    /// Hash of the `Authentication` struct per EIP-712 `hashStruct`.
    fn struct_hash(&self) -> [u8; 32] {
        let mut enc = Vec::with_capacity(10 * 32);
        enc.extend_from_slice(&keccak256(AUTH_TYPE.as_bytes()));
        enc.extend_from_slice(&keccak256(self.domain.as_bytes()));
        enc.extend_from_slice(&encode_address(&self.wallet));
        enc.extend_from_slice(&keccak256(STATEMENT.as_bytes()));
        enc.extend_from_slice(&keccak256(self.uri.as_bytes()));
        enc.extend_from_slice(&keccak256(APP_VERSION.as_bytes()));
        enc.extend_from_slice(&encode_uint(self.chain_id));
        enc.extend_from_slice(&keccak256(self.nonce.as_bytes()));
        enc.extend_from_slice(&encode_uint(self.issued_at));
        enc.extend_from_slice(&encode_uint(self.expiration_time));
        keccak256(&enc)
    }

    /// The 32-byte digest a wallet signs: `keccak256(0x19 0x01 ‖ domainSep ‖ structHash)`.
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut enc = Vec::with_capacity(2 + 2 * 32);
        enc.extend_from_slice(&[0x19, 0x01]);
        enc.extend_from_slice(&self.domain_separator());
        enc.extend_from_slice(&self.struct_hash());
        keccak256(&enc)
    }

    /// The typed-data description returned by the nonce endpoint, sufficient
    /// for a wallet to produce the signature with no further server
    /// interaction.
    pub fn typed_data(&self) -> serde_json::Value {
        serde_json::json!({
            "types": {
                "EIP712Domain": [
                    {"name": "name", "type": "string"},
                    {"name": "version", "type": "string"},
                    {"name": "chainId", "type": "uint256"},
                ],
                "Authentication": [
                    {"name": "domain", "type": "string"},
                    {"name": "wallet", "type": "address"},
                    {"name": "statement", "type": "string"},
                    {"name": "uri", "type": "string"},
                    {"name": "version", "type": "string"},
                    {"name": "chainId", "type": "uint256"},
                    {"name": "nonce", "type": "string"},
                    {"name": "issuedAt", "type": "uint256"},
                    {"name": "expirationTime", "type": "uint256"},
                ],
            },
            "primaryType": "Authentication",
            "domain": {
                "name": APP_NAME,
                "version": APP_VERSION,
                "chainId": self.chain_id,
            },
            "message": {
                "domain": self.domain,
                "wallet": self.wallet,
                "statement": STATEMENT,
                "uri": self.uri,
                "version": APP_VERSION,
                "chainId": self.chain_id,
                "nonce": self.nonce,
                "issuedAt": self.issued_at,
                "expirationTime": self.expiration_time,
            },
        })
    }
}

/// Derives the wallet address of a secp256k1 public key: the last 20 bytes of
/// `keccak256(uncompressed_point_without_prefix)`.
pub fn key_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash[12..]);
    Address::from_bytes(bytes)
}

/// Recovers the signing address from a hex-encoded 65-byte `r ‖ s ‖ v`
/// signature over `digest`. Accepts `v` as 0/1 or 27/28; rejects malleable
/// high-`s` signatures (EIP-2).
pub fn recover_address(digest: &[u8; 32], signature_hex: &str) -> Result<Address, VerifyError> {
    let signature_hex = signature_hex
        .strip_prefix("0x")
        .unwrap_or(signature_hex);
    let bytes = hex::decode(signature_hex).map_err(|_| VerifyError::MalformedSignature)?;
    if bytes.len() != 65 {
        return Err(VerifyError::MalformedSignature);
    }

    let signature =
        Signature::from_slice(&bytes[..64]).map_err(|_| VerifyError::MalformedSignature)?;
    if signature.normalize_s().is_some() {
        return Err(VerifyError::InvalidSignature);
    }

    let v = match bytes[64] {
        b @ 0..=1 => b,
        b @ 27..=28 => b - 27,
        _ => return Err(VerifyError::MalformedSignature),
    };
    let recovery_id = RecoveryId::from_byte(v).ok_or(VerifyError::MalformedSignature)?;

    let key = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
        .map_err(|_| VerifyError::InvalidSignature)?;
    Ok(key_address(&key))
}

/// Recovers the address that signed `message`. The caller compares the
/// result against the claimed and challenge-bound identity; this function
/// trusts nothing the client asserts.
pub fn verify(message: &AuthMessage, signature_hex: &str) -> Result<Address, VerifyError> {
    recover_address(&message.signing_hash(), signature_hex)
}
