//! Message Types für das Token-Server-Protokoll
//!
//! Client-Nachrichten werden mit dem Geräteschlüssel signiert
//! (kanonisches JSON inkl. `timestamp`, ohne `signature`).

use serde::{Deserialize, Serialize};

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

/// Token für einen Kanal anfordern
#[derive(Debug, Clone, Serialize)]
pub struct TokenRequestPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub uid: u32,
    pub channel: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

impl TokenRequestPayload {
    pub fn new(uid: u32, channel: String, public_key: String, request_id: String) -> Self {
        Self {
            msg_type: "token_request",
            uid,
            channel,
            public_key,
            request_id,
        }
    }
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Ausgestelltes Token
    Token {
        #[serde(rename = "requestId")]
        request_id: String,
        token: String,
        /// Unix-Zeit in Millisekunden
        #[serde(rename = "expiresAt")]
        expires_at: i64,
        timestamp: i64,
    },

    /// Fehler
    Error {
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
        code: i32,
        message: String,
        timestamp: i64,
    },

    /// Heartbeat Antwort
    Pong { timestamp: i64 },
}
