//! Zugangs-Credential für den Kanal und der Provider-Vertrag

use crate::session::PeerId;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Token server connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Token request timed out")]
    Timeout,

    #[error("Token server error: {code} - {message}")]
    ServerError { code: i32, message: String },

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token signature invalid")]
    InvalidSignature,

    #[error("Credential provider failed: {0}")]
    Provider(String),
}

// ============================================================================
// CREDENTIAL
// ============================================================================

/// Token plus Gültigkeitsfenster
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(token: impl Into<String>, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            issued_at,
            expires_at,
        }
    }

    /// Erstellt ein Credential, das ab jetzt `lifetime` gültig ist
    pub fn valid_for(token: impl Into<String>, lifetime: Duration) -> Self {
        let now = Utc::now();
        Self::new(token, now, now + lifetime)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Verbleibende Gültigkeit (nie negativ)
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

// Token nie ins Log schreiben
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ============================================================================
// PROVIDER
// ============================================================================

/// Asynchrone Quelle für Kanal-Credentials (Netzwerk-Roundtrip o.ä.)
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire(&self, identity: PeerId, channel: &str) -> Result<Credential, CredentialError>;
}
