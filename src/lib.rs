//! Call Session - Anrufsteuerung für P2P Audio/Video-Calls
//!
//! Eine Call-Session in einem gemeinsamen Kanal mit:
//! - State Machine für eingehende und ausgehende Anrufe
//! - transparenter Token-Erneuerung (Renew und Rejoin)
//! - Ed25519-signierten Kanal-Tokens (lokal oder vom Token-Server)
//! - Notifications für UI-Observer
//!
//! Media Engine und Klingel-Indikator stellt die einbettende Anwendung
//! über die Traits in [`media`] bereit.

pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod media;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, SessionConfig};
pub use credentials::{
    provider_from_config, Credential, CredentialError, CredentialProvider, LocalTokenIssuer,
    RemoteTokenProvider,
};
pub use crypto::KeyPair;
pub use error::{ErrorCode, SessionError};
pub use media::{EngineError, EngineEvent, LeaveReason, MediaEngine, RingIndicator};
pub use session::{
    Advisory, CallSession, EngineEventSink, ObserverId, PeerId, Phase, PlatformPreconditions,
    SessionNotification, SessionSnapshot,
};

use once_cell::sync::OnceCell;

// ============================================================================
// LOGGING
// ============================================================================

static LOGGING: OnceCell<()> = OnceCell::new();

/// Initialisiert das Logging (mehrfacher Aufruf ist harmlos)
///
/// `RUST_LOG` wird respektiert, die Crate selbst loggt standardmäßig auf
/// `debug`.
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
            "call_session=debug"
                .parse()
                .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::DEBUG.into()),
        );

        if tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global subscriber already installed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice() {
        init_logging();
        init_logging();
        tracing::info!("logging initialized");
    }
}
