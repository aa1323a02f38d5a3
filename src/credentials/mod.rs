//! Credentials Module - Kanal-Tokens besorgen und erneuern
//!
//! Dieses Modul verwaltet:
//! - das Credential (Token + Gültigkeitsfenster) und den Provider-Vertrag
//! - den Coordinator für Join, Renew und Rejoin
//! - einen lokalen Token-Issuer (Ed25519-signierte Claims)
//! - einen WebSocket-Client für einen externen Token-Server
//!

mod coordinator;
mod credential;
mod issuer;
mod messages;
mod remote;

pub use coordinator::{
    AcquirePurpose, CredentialCoordinator, CredentialOutcome, DEFAULT_ACQUIRE_TIMEOUT,
};
pub use credential::{Credential, CredentialError, CredentialProvider};
pub use issuer::{LocalTokenIssuer, TokenClaims};
pub use remote::{RemoteTokenProvider, DEFAULT_REQUEST_TIMEOUT};

use crate::config::SessionConfig;
use crate::crypto::KeyPair;
use std::sync::Arc;

/// Wählt den Provider anhand der Konfiguration: Token-Server falls
/// `token_server_url` gesetzt ist, sonst lokaler Issuer
pub fn provider_from_config(
    config: &SessionConfig,
    keypair: Arc<KeyPair>,
) -> Result<Arc<dyn CredentialProvider>, CredentialError> {
    let provider: Arc<dyn CredentialProvider> = match config.token_server_url.as_deref() {
        Some(url) => {
            tracing::info!("Using token server at {}", url);
            Arc::new(RemoteTokenProvider::new(url, keypair)?)
        }
        None => {
            tracing::info!("Issuing tokens locally");
            Arc::new(LocalTokenIssuer::new(keypair, config.token_lifetime()))
        }
    };
    Ok(provider)
}
