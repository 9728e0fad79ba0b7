// SPDX-License-Identifier: GPL-3.0-or-later

//! Wallet Identity
//!
//! A user is identified by a 20-byte secp256k1 wallet address. Addresses
//! arrive from clients in arbitrary casing; this module canonicalizes them
//! once at the boundary. Equality and hashing work on the raw bytes, and the
//! display form is EIP-55 checksummed so logs and wire events always carry
//! one casing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Errors from parsing an address string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must be 0x followed by 40 hex characters")]
    BadLength,
    #[error("address contains non-hex characters")]
    BadHex,
}

/// A canonicalized 20-byte wallet address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    /// Wraps raw address bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    /// Returns the raw address bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Renders the EIP-55 mixed-case checksum form, e.g.
    /// `0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed`.
    ///
    /// A hex digit is uppercased when the corresponding nibble of
    /// `keccak256(lowercase_hex)` is >= 8.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = Keccak256::digest(lower.as_bytes());

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        if hex_part.len() != 40 {
            return Err(AddressError::BadLength);
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex_part, &mut bytes).map_err(|_| AddressError::BadHex)?;
        Ok(Address(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
