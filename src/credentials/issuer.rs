//! Lokaler Token-Issuer
//!
//! Stellt Kanal-Tokens direkt im Prozess aus, ohne Netzwerk-Roundtrip.
//! Ein Token besteht aus den Claims als kanonisches JSON und deren
//! Ed25519-Signatur: `base64(claims).base64(signature)`.

use super::credential::{Credential, CredentialError, CredentialProvider};
use crate::crypto::{canonical_json, KeyPair};
use crate::session::PeerId;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64URL, Engine};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Inhalt eines Kanal-Tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    pub channel: String,
    pub uid: u32,
    pub issued_at: i64,
    pub expires_at: i64,
    pub nonce: u64,
}

pub struct LocalTokenIssuer {
    keypair: Arc<KeyPair>,
    lifetime: Duration,
}

impl LocalTokenIssuer {
    pub fn new(keypair: Arc<KeyPair>, lifetime: std::time::Duration) -> Self {
        let lifetime = Duration::from_std(lifetime).unwrap_or_else(|_| Duration::hours(10));
        Self { keypair, lifetime }
    }

    /// Public Key, gegen den Tokens geprüft werden können
    pub fn public_key_base64(&self) -> String {
        self.keypair.public_key_base64()
    }

    /// Stellt ein Token für `identity` in `channel` aus
    pub fn issue(&self, identity: PeerId, channel: &str) -> Result<Credential, CredentialError> {
        let now = Utc::now();
        let expires = now + self.lifetime;
        let claims = TokenClaims {
            channel: channel.to_string(),
            uid: identity.0,
            issued_at: now.timestamp(),
            expires_at: expires.timestamp(),
            nonce: rand::random(),
        };

        let value = serde_json::to_value(&claims)
            .map_err(|e| CredentialError::Provider(e.to_string()))?;
        let body = canonical_json(&value);
        let signature = self.keypair.sign(body.as_bytes());

        let token = format!(
            "{}.{}",
            B64URL.encode(body.as_bytes()),
            B64URL.encode(signature.to_bytes())
        );

        tracing::debug!(
            "Issued token for uid {} in '{}' valid until {}",
            identity,
            channel,
            expires
        );

        Ok(Credential::new(
            token,
            from_timestamp(claims.issued_at)?,
            from_timestamp(claims.expires_at)?,
        ))
    }

    /// Prüft Signatur und Format eines Tokens und liefert die Claims
    pub fn verify(public_key: &str, token: &str) -> Result<TokenClaims, CredentialError> {
        let (body, signature) = token
            .split_once('.')
            .ok_or_else(|| CredentialError::Malformed("missing separator".to_string()))?;

        let body = B64URL
            .decode(body)
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;
        let signature = B64URL
            .decode(signature)
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;

        // KeyPair::verify_base64 erwartet Standard-Base64
        let signature = base64::engine::general_purpose::STANDARD.encode(signature);
        KeyPair::verify_base64(public_key, &body, &signature)
            .map_err(|_| CredentialError::InvalidSignature)?;

        serde_json::from_slice(&body).map_err(|e| CredentialError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl CredentialProvider for LocalTokenIssuer {
    async fn acquire(&self, identity: PeerId, channel: &str) -> Result<Credential, CredentialError> {
        self.issue(identity, channel)
    }
}

fn from_timestamp(secs: i64) -> Result<DateTime<Utc>, CredentialError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| CredentialError::Malformed(format!("timestamp out of range: {}", secs)))
}

// ============================================================================
// TESTS
// ============================================================================
