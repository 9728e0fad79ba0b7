// SPDX-License-Identifier: GPL-3.0-or-later

//! Wire Protocol
//!
//! JSON events exchanged over WebSocket text frames, tagged by a `type`
//! field. Client events arrive after authentication (except `auth` itself,
//! which must be the first frame); server events are produced by the
//! connection handler and the presence registry fan-out.
//!
//! Delivery and echo use one consistent naming pair: `dm:receive` to the
//! recipient's connections, `dm:sent` back to the sender's own socket.

use serde::{Deserialize, Serialize};

use crate::identity::Address;

/// First frame a client must send: the authentication handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Claimed wallet address, any casing.
    pub address: String,
    /// Hex-encoded 65-byte recoverable signature over the typed message.
    pub signature: String,
    /// The nonce from the challenge being redeemed.
    pub nonce: String,
}

/// Events consumed from authenticated clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "auth")]
    Auth(AuthRequest),
    #[serde(rename = "dm:send")]
    DmSend { to: String, body: String },
    #[serde(rename = "join_chat")]
    JoinChat { chat_id: String },
    #[serde(rename = "leave_chat")]
    LeaveChat { chat_id: String },
    #[serde(other)]
    Unknown,
}

/// A relayed direct message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectMessage {
    pub from: Address,
    pub to: Address,
    pub body: String,
    /// Unix seconds at relay time.
    pub ts: u64,
}

/// One entry of a presence snapshot. Only online identities are tracked, so
/// `online` is always true for listed entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub address: Address,
    pub online: bool,
}

/// Events produced by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "presence:online")]
    PresenceOnline { address: Address },
    #[serde(rename = "presence:offline")]
    PresenceOffline { address: Address },
    #[serde(rename = "presence:snapshot")]
    PresenceSnapshot { users: Vec<PresenceEntry> },
    #[serde(rename = "dm:receive")]
    DmReceive(DirectMessage),
    #[serde(rename = "dm:sent")]
    DmSent(DirectMessage),
}

/// Decodes a client event from a text frame.
pub fn decode_client_event(text: &str) -> Result<ClientEvent, serde_json::Error> {
    serde_json::from_str(text)
}

/// Encodes a server event as a text frame.
pub fn encode_server_event(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
