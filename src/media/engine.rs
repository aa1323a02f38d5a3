//! Media Engine Vertrag
//!
//! Alle Operationen sind aus Sicht der State Machine fire-and-forget:
//! ein `Ok(())` bedeutet nur, dass die Engine den Befehl angenommen hat.
//! Bestätigungen (Join erfolgreich, Peer sichtbar, ...) kommen asynchron
//! als `EngineEvent` über den `EngineEventSink` der Session zurück.

use crate::session::PeerId;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Eine Engine-Operation wurde abgelehnt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed: {reason}")]
pub struct EngineError {
    pub operation: &'static str,
    pub reason: String,
}

impl EngineError {
    pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
        Self {
            operation,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// ENGINE EVENTS
// ============================================================================

/// Grund, warum ein Peer den Kanal verlassen hat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    /// Peer hat regulär aufgelegt
    Quit,
    /// Verbindung zum Peer abgerissen
    Dropped,
}

/// Callbacks der Engine, die auf den Owner-Task marshalled werden
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Native Ressourcen sind bereit, Join ist ab jetzt erlaubt
    Ready,
    /// Eigener Join wurde vom Kanal bestätigt
    JoinSucceeded { channel: String },
    /// Eigener Leave ist abgeschlossen
    LeaveCompleted,
    /// Ein Peer ist im Kanal sichtbar geworden
    PeerJoined(PeerId),
    /// Ein Peer hat den Kanal verlassen
    PeerLeft { peer: PeerId, reason: LeaveReason },
    /// Das Token läuft in Kürze ab
    CredentialExpiryWarning,
    /// Das Token ist abgelaufen, die Mitgliedschaft ist ungültig
    CredentialHardExpired,
}

// ============================================================================
// MEDIA ENGINE
// ============================================================================

/// Opaque Echtzeit-Engine (Audio/Video-Transport und Rendering)
///
/// Nur die State Machine darf mutierende Operationen aufrufen.
pub trait MediaEngine: Send {
    /// Tritt dem Kanal mit dem gegebenen Token bei
    fn join_channel(&mut self, token: &str, channel: &str, uid: PeerId)
        -> Result<(), EngineError>;

    /// Verlässt den aktuellen Kanal
    fn leave_channel(&mut self) -> Result<(), EngineError>;

    fn enable_audio(&mut self) -> Result<(), EngineError>;
    fn disable_audio(&mut self) -> Result<(), EngineError>;
    fn enable_video(&mut self) -> Result<(), EngineError>;
    fn disable_video(&mut self) -> Result<(), EngineError>;

    /// Bindet die lokale Vorschau an ihr Render-Ziel und startet sie
    fn bind_local_render(&mut self) -> Result<(), EngineError>;
    /// Stoppt die lokale Vorschau und löst die Bindung
    fn unbind_local_render(&mut self) -> Result<(), EngineError>;

    /// Bindet das Video des Peers an das Remote-Render-Ziel
    fn bind_remote_render(&mut self, peer: PeerId) -> Result<(), EngineError>;
    fn unbind_remote_render(&mut self, peer: PeerId) -> Result<(), EngineError>;

    /// Tauscht das Token der laufenden Verbindung ohne Rejoin aus
    fn renew_credential(&mut self, token: &str) -> Result<(), EngineError>;

    /// `true` wenn die Engine `EngineEvent::Ready` sendet. Sonst wartet die
    /// Session vor dem ersten Join die konfigurierte Fallback-Verzögerung ab.
    fn emits_ready_event(&self) -> bool {
        false
    }
}
