//! Session-Datenmodell
//!
//! `Session` ist der einzige veränderliche Datensatz des Anrufstatus und
//! gehört exklusiv der State Machine. Nach außen geht nur der
//! `SessionSnapshot`.

use crate::credentials::Credential;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

// ============================================================================
// PEER ID
// ============================================================================

/// Kennung eines Teilnehmers im Kanal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u32);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PeerId {
    fn from(uid: u32) -> Self {
        Self(uid)
    }
}

// ============================================================================
// PHASE
// ============================================================================

/// Phase der Call-Session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nicht im Kanal
    Idle,
    /// Im Kanal, Medien aus, bereit für eingehende/ausgehende Anrufe
    Listening,
    /// Eingehender Anruf, Indikator aktiv, Medien noch aus
    Ringing,
    /// Ausgehender Anruf, Medien an, Peer noch nicht im Kanal
    Connecting,
    /// Anruf aktiv
    Active,
}

impl Phase {
    /// Phasen, in denen ein Gegenüber gebunden ist
    pub fn has_remote(self) -> bool {
        matches!(self, Phase::Ringing | Phase::Connecting | Phase::Active)
    }

    /// Medien sind an
    pub fn is_in_call(self) -> bool {
        matches!(self, Phase::Connecting | Phase::Active)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Listening => "listening",
            Phase::Ringing => "ringing",
            Phase::Connecting => "connecting",
            Phase::Active => "active",
        };
        f.write_str(name)
    }
}

// ============================================================================
// SESSION
// ============================================================================

#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) local_identity: PeerId,
    pub(crate) remote_identity: Option<PeerId>,
    pub(crate) phase: Phase,
    pub(crate) initiated_locally: bool,
    pub(crate) present_peers: BTreeSet<PeerId>,
    pub(crate) credential: Option<Credential>,
    pub(crate) call_id: Option<Uuid>,
}

impl Session {
    pub fn new(local_identity: PeerId) -> Self {
        Self {
            local_identity,
            remote_identity: None,
            phase: Phase::Idle,
            initiated_locally: false,
            present_peers: BTreeSet::new(),
            credential: None,
            call_id: None,
        }
    }

    pub fn local_identity(&self) -> PeerId {
        self.local_identity
    }

    pub fn remote_identity(&self) -> Option<PeerId> {
        self.remote_identity
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn initiated_locally(&self) -> bool {
        self.initiated_locally
    }

    pub fn present_peers(&self) -> &BTreeSet<PeerId> {
        &self.present_peers
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Join ist nur mit einem noch gültigen Credential möglich
    pub fn can_join_at(&self, now: DateTime<Utc>) -> bool {
        self.credential
            .as_ref()
            .is_some_and(|c| !c.is_expired_at(now))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            local_identity: self.local_identity,
            remote_identity: self.remote_identity,
            phase: self.phase,
            initiated_locally: self.initiated_locally,
            present_peers: self.present_peers.iter().copied().collect(),
            call_id: self.call_id,
            credential_expires_at: self.credential.as_ref().map(|c| c.expires_at),
        }
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Read-only Sicht auf die Session für Observer und UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub local_identity: PeerId,
    pub remote_identity: Option<PeerId>,
    pub phase: Phase,
    pub initiated_locally: bool,
    pub present_peers: Vec<PeerId>,
    pub call_id: Option<Uuid>,
    pub credential_expires_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    /// Peers, die angerufen werden können (ohne sich selbst)
    pub fn call_candidates(&self) -> Vec<PeerId> {
        self.present_peers
            .iter()
            .copied()
            .filter(|peer| *peer != self.local_identity)
            .collect()
    }
}
