//! Fehlertypen der Call-Session
//!
//! Alle Fehler werden lokal in eine Advisory-Notification übersetzt und nie
//! als Panic an die UI durchgereicht. `SessionError` wird nur von
//! `CallSession::start` direkt an den Aufrufer zurückgegeben.

use crate::config::ConfigError;
use crate::credentials::CredentialError;
use crate::media::{EngineError, IndicatorError};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// ERROR CODES
// ============================================================================

/// Fehlercode, der in Advisory-Notifications mitgeliefert wird
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    PreconditionUnmet,
    CredentialAcquisitionFailed,
    InvalidTransition,
    EngineOperationFailed,
}

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Platform preconditions not met: {}", .0.join(", "))]
    PreconditionUnmet(Vec<&'static str>),

    #[error("Credential acquisition failed: {0}")]
    CredentialAcquisitionFailed(#[from] CredentialError),

    #[error("Invalid transition: {action} in phase {phase}")]
    InvalidTransition { action: &'static str, phase: String },

    #[error("Engine operation failed: {0}")]
    EngineOperationFailed(#[from] EngineError),

    #[error("Ring indicator failed: {0}")]
    Indicator(#[from] IndicatorError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl SessionError {
    /// Liefert den Code für die Advisory-Notification
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::PreconditionUnmet(_) | SessionError::Config(_) => {
                ErrorCode::PreconditionUnmet
            }
            SessionError::CredentialAcquisitionFailed(_) => ErrorCode::CredentialAcquisitionFailed,
            SessionError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            SessionError::EngineOperationFailed(_) | SessionError::Indicator(_) => {
                ErrorCode::EngineOperationFailed
            }
        }
    }
}
