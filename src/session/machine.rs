//! Call Session State Machine
//!
//! Rein synchroner Kern der Session: nimmt Benutzeraktionen, Engine-Events
//! und Credential-Ergebnisse entgegen, berechnet den nächsten Zustand und
//! ruft Engine und Klingel-Indikator genau einmal pro Übergang auf.
//!
//! Asynchrone Folgeaktionen (Credential besorgen) werden nicht selbst
//! ausgeführt, sondern als `Directive` an den Owner-Task zurückgegeben.
//! Dadurch ist die State Machine ohne Runtime testbar.
//!
//! Übergänge:
//! ```text
//! Idle ──credential──▶ Listening ──peer joined──▶ Ringing ──answer──▶ Active
//!  ▲                      │  ▲                       │                 │
//!  │                      │  └──reject / peer left───┘                 │
//!  │                      └──place_call──▶ (Connecting ──peer joined──▶) Active
//!  └──────────────── hang up / peer left (Re-Arm) ─────────────────────┘
//! ```

use super::notify::{Advisory, SessionNotification};
use super::state::{PeerId, Phase, Session, SessionSnapshot};
use crate::config::SessionConfig;
use crate::credentials::{AcquirePurpose, Credential, CredentialError};
use crate::error::{ErrorCode, SessionError};
use crate::media::{EngineError, EngineEvent, LeaveReason, MediaEngine, RingIndicator};
use chrono::Utc;
use uuid::Uuid;

// ============================================================================
// TYPES
// ============================================================================

/// Benutzeraktionen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    PlaceCall(PeerId),
    Answer,
    Reject,
    HangUp,
    /// Re-Arming nach endgültig fehlgeschlagenem Rejoin erneut versuchen
    Rearm,
}

/// Asynchrone Folgeaktion für den Owner-Task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    AcquireCredential(AcquirePurpose),
}

/// Was die State Machine bei der Engine veranlasst hat
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaState {
    pub in_channel: bool,
    pub audio: bool,
    pub video: bool,
    pub local_bound: bool,
    pub remote_bound: Option<PeerId>,
}

// ============================================================================
// STATE MACHINE
// ============================================================================

pub struct CallStateMachine {
    session: Session,
    config: SessionConfig,
    engine: Box<dyn MediaEngine>,
    ringer: Box<dyn RingIndicator>,
    media: MediaState,
    ringing: bool,
    engine_ready: bool,
    join_pending: bool,
    rejoin_attempts: u32,
    /// Anrufer, der aufgelegt hat bevor angenommen wurde
    missed_caller: Option<PeerId>,
    stopped: bool,
    last_published: Option<SessionSnapshot>,
    directives: Vec<Directive>,
    notifications: Vec<SessionNotification>,
}

impl CallStateMachine {
    pub fn new(
        local_identity: PeerId,
        config: SessionConfig,
        engine: Box<dyn MediaEngine>,
        ringer: Box<dyn RingIndicator>,
    ) -> Self {
        Self {
            session: Session::new(local_identity),
            config,
            engine,
            ringer,
            media: MediaState::default(),
            ringing: false,
            engine_ready: false,
            join_pending: false,
            rejoin_attempts: 0,
            missed_caller: None,
            stopped: false,
            last_published: None,
            directives: Vec::new(),
            notifications: Vec::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn media_state(&self) -> &MediaState {
        &self.media
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn engine_emits_ready(&self) -> bool {
        self.engine.emits_ready_event()
    }

    /// Gesammelte Folgeaktionen abholen
    pub fn take_directives(&mut self) -> Vec<Directive> {
        std::mem::take(&mut self.directives)
    }

    /// Gesammelte Notifications abholen (in Entstehungsreihenfolge)
    pub fn take_notifications(&mut self) -> Vec<SessionNotification> {
        std::mem::take(&mut self.notifications)
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Startet die Session: Medien aus, erstes Credential anfordern
    pub fn start(&mut self) {
        tracing::info!(
            "Starting call session for uid {} in channel '{}'",
            self.session.local_identity,
            self.config.channel
        );

        // Engine startet immer mit deaktivierten Medien
        let errors: Vec<EngineError> = [self.engine.disable_video(), self.engine.disable_audio()]
            .into_iter()
            .filter_map(Result::err)
            .collect();
        for e in errors {
            self.report(e.into());
        }

        self.publish();
        self.directives
            .push(Directive::AcquireCredential(AcquirePurpose::Join));
    }

    /// Engine meldet Bereitschaft (Ready-Event oder Fallback-Timer)
    pub fn engine_ready(&mut self) {
        if self.engine_ready || self.stopped {
            return;
        }
        tracing::info!("Media engine ready");
        self.engine_ready = true;

        if self.join_pending {
            self.join_pending = false;
            self.join_for_listening();
        }
        self.publish();
    }

    /// Beendet die Session endgültig (kein Re-Arm)
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        tracing::info!("Stopping call session");
        self.teardown();
        self.join_pending = false;
        self.stopped = true;
        self.directives.clear();
    }

    // ========================================================================
    // INPUTS
    // ========================================================================

    pub fn apply(&mut self, action: UserAction) {
        if self.stopped {
            tracing::debug!("Ignoring {:?} after stop", action);
            return;
        }

        match action {
            UserAction::PlaceCall(peer) => self.place_call(peer),
            UserAction::Answer => self.answer(),
            UserAction::Reject => self.reject(),
            UserAction::HangUp => self.hang_up(),
            UserAction::Rearm => self.rearm(),
        }
        self.publish();
    }

    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        if self.stopped {
            tracing::debug!("Ignoring engine event {:?} after stop", event);
            return;
        }

        match event {
            EngineEvent::Ready => self.engine_ready(),
            EngineEvent::JoinSucceeded { channel } => {
                tracing::info!(
                    "Joined channel '{}' as uid {}",
                    channel,
                    self.session.local_identity
                );
            }
            EngineEvent::LeaveCompleted => tracing::debug!("Left channel"),
            EngineEvent::PeerJoined(peer) => self.peer_joined(peer),
            EngineEvent::PeerLeft { peer, reason } => self.peer_left(peer, reason),
            EngineEvent::CredentialExpiryWarning => self.credential_expiring(),
            EngineEvent::CredentialHardExpired => self.credential_expired(),
        }
        self.publish();
    }

    /// Continuation des Credential-Coordinators bei Erfolg
    pub fn credential_acquired(&mut self, purpose: AcquirePurpose, credential: Credential) {
        if self.stopped {
            return;
        }
        self.session.credential = Some(credential);

        match purpose {
            AcquirePurpose::Renew => self.apply_renewed_credential(),
            AcquirePurpose::Join | AcquirePurpose::Rejoin if self.session.phase == Phase::Idle => {
                if self.engine_ready {
                    self.join_for_listening();
                } else {
                    tracing::debug!("Credential ready, waiting for engine before joining");
                    self.join_pending = true;
                }
            }
            AcquirePurpose::Join => {
                tracing::debug!(
                    "Credential ready but already in phase {}, nothing to join",
                    self.session.phase
                );
            }
            AcquirePurpose::Rejoin => self.rejoin(),
        }
        self.publish();
    }

    /// Credential konnte nicht besorgt werden
    pub fn credential_failed(&mut self, purpose: AcquirePurpose, error: CredentialError) {
        if self.stopped {
            return;
        }
        self.report(SessionError::CredentialAcquisitionFailed(error));

        match purpose {
            AcquirePurpose::Join => {
                // Bleibt Idle, der Aufrufer kann per `rearm` erneut versuchen
                self.join_pending = false;
            }
            AcquirePurpose::Renew => {
                // Altes Token gilt bis zum Hard-Expiry weiter
            }
            AcquirePurpose::Rejoin => {
                if self.session.phase != Phase::Idle {
                    tracing::warn!("No fresh credential after hard expiry, leaving channel");
                    self.teardown();
                }
            }
        }
        self.publish();
    }

    // ========================================================================
    // USER ACTIONS
    // ========================================================================

    fn place_call(&mut self, peer: PeerId) {
        if self.session.phase != Phase::Listening {
            self.ignore("place_call");
            return;
        }
        if peer == self.session.local_identity {
            tracing::warn!("Ignoring place_call to own uid {}", peer);
            return;
        }

        let await_presence =
            self.config.await_remote_presence && !self.session.present_peers.contains(&peer);

        self.session.call_id = Some(Uuid::new_v4());
        self.session.remote_identity = Some(peer);
        self.session.initiated_locally = true;
        self.missed_caller = None;

        let remote = if await_presence { None } else { Some(peer) };
        match self.connect_media(remote) {
            Ok(()) => {
                self.session.phase = if await_presence {
                    Phase::Connecting
                } else {
                    Phase::Active
                };
                tracing::info!(
                    "Calling uid {} (call {:?}, phase {})",
                    peer,
                    self.session.call_id,
                    self.session.phase
                );
            }
            Err(e) => self.abort_call(e),
        }
    }

    fn answer(&mut self) {
        if self.session.phase != Phase::Ringing {
            match self.missed_caller.take() {
                Some(caller) => {
                    tracing::warn!("Cannot answer: caller {} already left", caller);
                    self.notifications
                        .push(SessionNotification::Advisory(Advisory {
                            code: Some(ErrorCode::InvalidTransition),
                            message: format!("Caller {} already hung up", caller),
                        }));
                }
                None => self.ignore("answer"),
            }
            return;
        }

        // Indikator immer zuerst stoppen
        self.stop_ringing();

        let Some(peer) = self.session.remote_identity else {
            self.report(SessionError::InvalidTransition {
                action: "answer",
                phase: "ringing without caller".to_string(),
            });
            self.dismiss_incoming();
            return;
        };

        match self.connect_media(Some(peer)) {
            Ok(()) => {
                self.session.phase = Phase::Active;
                tracing::info!("Answered call from uid {} (call {:?})", peer, self.session.call_id);
            }
            Err(e) => self.abort_call(e),
        }
    }

    fn reject(&mut self) {
        if self.session.phase != Phase::Ringing {
            self.ignore("reject");
            return;
        }
        self.stop_ringing();
        tracing::info!("Rejected call from uid {:?}", self.session.remote_identity);
        self.dismiss_incoming();
    }

    fn hang_up(&mut self) {
        // Auflegen stoppt das Klingeln sofort, in jeder Phase
        self.stop_ringing();

        match self.session.phase {
            Phase::Active | Phase::Connecting => {
                tracing::info!("Hanging up call with uid {:?}", self.session.remote_identity);
                self.end_call();
            }
            Phase::Ringing => {
                tracing::info!("Hang up while ringing, rejecting incoming call");
                self.dismiss_incoming();
            }
            Phase::Idle | Phase::Listening => self.ignore("hang_up"),
        }
    }

    fn rearm(&mut self) {
        if self.session.phase != Phase::Idle {
            self.ignore("rearm");
            return;
        }
        tracing::info!("Re-arming call session");
        self.rejoin_attempts = 0;
        self.directives
            .push(Directive::AcquireCredential(AcquirePurpose::Join));
    }

    // ========================================================================
    // ENGINE EVENTS
    // ========================================================================

    fn peer_joined(&mut self, peer: PeerId) {
        if peer == self.session.local_identity {
            tracing::debug!("Ignoring presence event for own uid");
            return;
        }
        if !self.media.in_channel {
            tracing::debug!("Ignoring stale join of uid {} outside of channel", peer);
            return;
        }

        self.session.present_peers.insert(peer);

        match self.session.phase {
            Phase::Listening => self.incoming_call(peer),
            Phase::Connecting if self.session.remote_identity == Some(peer) => {
                match self.engine.bind_remote_render(peer) {
                    Ok(()) => {
                        self.media.remote_bound = Some(peer);
                        self.session.phase = Phase::Active;
                        tracing::info!("Called uid {} joined, call active", peer);
                    }
                    Err(e) => self.abort_call(e),
                }
            }
            phase => tracing::debug!(
                "Uid {} joined during {}, recorded in presence only",
                peer,
                phase
            ),
        }
    }

    fn incoming_call(&mut self, peer: PeerId) {
        self.session.call_id = Some(Uuid::new_v4());
        self.session.remote_identity = Some(peer);
        self.session.initiated_locally = false;
        self.missed_caller = None;

        if self.config.require_explicit_answer {
            self.session.phase = Phase::Ringing;
            self.start_ringing(peer);
            tracing::info!(
                "Incoming call from uid {} (call {:?})",
                peer,
                self.session.call_id
            );
            self.publish();
            self.notifications.push(SessionNotification::Advisory(Advisory::info(
                format!("Incoming call from {}", peer),
            )));
        } else {
            tracing::info!("Auto-answering call from uid {}", peer);
            match self.connect_media(Some(peer)) {
                Ok(()) => self.session.phase = Phase::Active,
                Err(e) => self.abort_call(e),
            }
        }
    }

    fn peer_left(&mut self, peer: PeerId, reason: LeaveReason) {
        self.session.present_peers.remove(&peer);

        if self.session.remote_identity != Some(peer) {
            tracing::debug!("Uid {} left ({:?}), not our call partner", peer, reason);
            return;
        }

        let message = match reason {
            LeaveReason::Quit => format!("Remote {} hung up", peer),
            LeaveReason::Dropped => format!("Connection to {} lost", peer),
        };
        tracing::info!("{}", message);

        match self.session.phase {
            Phase::Ringing => {
                self.stop_ringing();
                self.dismiss_incoming();
                self.missed_caller = Some(peer);
            }
            Phase::Active | Phase::Connecting => self.end_call(),
            Phase::Idle | Phase::Listening => {}
        }
        self.notifications
            .push(SessionNotification::Advisory(Advisory::info(message)));
    }

    fn credential_expiring(&mut self) {
        if !self.media.in_channel {
            tracing::debug!("Ignoring expiry warning outside of channel");
            return;
        }
        tracing::info!("Credential expires soon, renewing");
        self.directives
            .push(Directive::AcquireCredential(AcquirePurpose::Renew));
    }

    fn credential_expired(&mut self) {
        if !self.media.in_channel {
            tracing::debug!("Ignoring hard expiry outside of channel");
            return;
        }
        tracing::warn!(
            "Credential expired in phase {}, rejoin required",
            self.session.phase
        );
        self.session.credential = None;
        self.directives
            .push(Directive::AcquireCredential(AcquirePurpose::Rejoin));
    }

    // ========================================================================
    // CHANNEL MEMBERSHIP
    // ========================================================================

    fn valid_token(&self) -> Option<String> {
        if !self.session.can_join_at(Utc::now()) {
            return None;
        }
        self.session.credential.as_ref().map(|c| c.token.clone())
    }

    /// Idle → Listening
    fn join_for_listening(&mut self) {
        let Some(token) = self.valid_token() else {
            tracing::warn!("No valid credential for join");
            self.retry_rearm();
            return;
        };

        let local = self.session.local_identity;
        match self.engine.join_channel(&token, &self.config.channel, local) {
            Ok(()) => {
                self.media.in_channel = true;
                self.session.phase = Phase::Listening;
                self.rejoin_attempts = 0;
                tracing::info!(
                    "Listening in channel '{}' for incoming calls",
                    self.config.channel
                );
            }
            Err(e) => {
                self.report(e.into());
                self.retry_rearm();
            }
        }
    }

    /// Hard-Expiry: Kanal mit neuem Token verlassen und wieder betreten,
    /// Phase und Gegenüber bleiben erhalten
    fn rejoin(&mut self) {
        let phase = self.session.phase;
        tracing::info!(
            "Rejoining channel in phase {} (remote {:?})",
            phase,
            self.session.remote_identity
        );

        if let Some(e) = self.leave_channel() {
            self.report(e.into());
        }

        let Some(token) = self.valid_token() else {
            tracing::warn!("Fresh credential already expired, cannot rejoin");
            self.teardown();
            self.retry_rearm();
            return;
        };

        let local = self.session.local_identity;
        match self.engine.join_channel(&token, &self.config.channel, local) {
            Ok(()) => {
                self.media.in_channel = true;
                if phase.is_in_call() {
                    self.rebind_render_targets();
                }
                self.notifications.push(SessionNotification::Advisory(Advisory::info(
                    "Rejoined channel with fresh credential",
                )));
            }
            Err(e) => {
                self.report(e.into());
                self.teardown();
                self.retry_rearm();
            }
        }
    }

    fn apply_renewed_credential(&mut self) {
        if !self.media.in_channel {
            tracing::debug!("Renewed credential stored for next join");
            return;
        }
        let Some(token) = self.valid_token() else {
            return;
        };
        match self.engine.renew_credential(&token) {
            Ok(()) => {
                tracing::info!("Credential renewed on live connection");
                self.notifications
                    .push(SessionNotification::Advisory(Advisory::info("Credential renewed")));
            }
            Err(e) => self.report(e.into()),
        }
    }

    fn retry_rearm(&mut self) {
        if self.rejoin_attempts < self.config.max_rejoin_attempts {
            self.rejoin_attempts += 1;
            tracing::warn!(
                "Retrying re-arm ({}/{})",
                self.rejoin_attempts,
                self.config.max_rejoin_attempts
            );
            self.directives
                .push(Directive::AcquireCredential(AcquirePurpose::Join));
        } else {
            tracing::error!(
                "Giving up re-arm after {} attempts, staying idle",
                self.rejoin_attempts
            );
            self.notifications.push(SessionNotification::Advisory(Advisory::info(
                "Not reachable for calls, retry required",
            )));
        }
    }

    fn leave_channel(&mut self) -> Option<EngineError> {
        if !self.media.in_channel {
            return None;
        }
        self.media.in_channel = false;
        self.session.present_peers.clear();
        self.engine.leave_channel().err()
    }

    // ========================================================================
    // MEDIA
    // ========================================================================

    fn connect_media(&mut self, remote: Option<PeerId>) -> Result<(), EngineError> {
        self.engine.enable_video()?;
        self.media.video = true;
        self.engine.enable_audio()?;
        self.media.audio = true;
        self.engine.bind_local_render()?;
        self.media.local_bound = true;
        if let Some(peer) = remote {
            self.engine.bind_remote_render(peer)?;
            self.media.remote_bound = Some(peer);
        }
        Ok(())
    }

    fn rebind_render_targets(&mut self) {
        match self.engine.bind_local_render() {
            Ok(()) => self.media.local_bound = true,
            Err(e) => self.report(e.into()),
        }
        if self.session.phase == Phase::Active {
            if let Some(peer) = self.session.remote_identity {
                match self.engine.bind_remote_render(peer) {
                    Ok(()) => self.media.remote_bound = Some(peer),
                    Err(e) => self.report(e.into()),
                }
            }
        }
    }

    /// Medien abbauen. Der lokale Zustand gilt danach als abgebaut,
    /// auch wenn einzelne Engine-Aufrufe fehlschlagen.
    fn release_media(&mut self) -> Vec<EngineError> {
        let mut errors = Vec::new();

        if self.media.local_bound {
            self.media.local_bound = false;
            errors.extend(self.engine.unbind_local_render().err());
        }
        if let Some(peer) = self.media.remote_bound.take() {
            errors.extend(self.engine.unbind_remote_render(peer).err());
        }
        if self.media.video {
            self.media.video = false;
            errors.extend(self.engine.disable_video().err());
        }
        if self.media.audio {
            self.media.audio = false;
            errors.extend(self.engine.disable_audio().err());
        }
        errors
    }

    /// Aufbau fehlgeschlagen: zurück nach Listening mit deaktivierten Medien
    fn abort_call(&mut self, error: EngineError) {
        tracing::error!("Call setup failed: {}", error);
        self.report(error.into());
        for e in self.release_media() {
            self.report(e.into());
        }
        self.clear_call();
        self.session.phase = if self.media.in_channel {
            Phase::Listening
        } else {
            Phase::Idle
        };
    }

    /// Ringing → Listening
    fn dismiss_incoming(&mut self) {
        self.clear_call();
        self.session.phase = Phase::Listening;
    }

    /// Active → Idle → (Re-Arm) Listening
    fn end_call(&mut self) {
        self.teardown();
        self.rejoin_attempts = 0;
        self.directives
            .push(Directive::AcquireCredential(AcquirePurpose::Join));
    }

    /// Alles abbauen und nach Idle
    fn teardown(&mut self) {
        self.stop_ringing();
        let mut errors = self.release_media();
        errors.extend(self.leave_channel());
        for e in errors {
            self.report(e.into());
        }
        self.clear_call();
        self.session.phase = Phase::Idle;
        self.publish();
    }

    fn clear_call(&mut self) {
        self.session.remote_identity = None;
        self.session.initiated_locally = false;
        self.session.call_id = None;
    }

    // ========================================================================
    // RING INDICATOR
    // ========================================================================

    fn start_ringing(&mut self, caller: PeerId) {
        if self.ringing {
            return;
        }
        // Auch bei Fehlschlag als aktiv führen, damit genau ein stop folgt
        self.ringing = true;
        if let Err(e) = self.ringer.start(caller) {
            self.report(e.into());
        }
    }

    fn stop_ringing(&mut self) {
        if self.ringing {
            self.ringing = false;
            self.ringer.stop();
        }
    }

    // ========================================================================
    // REPORTING
    // ========================================================================

    fn ignore(&self, action: &'static str) {
        tracing::warn!(
            "Ignoring {} in phase {} (invalid transition)",
            action,
            self.session.phase
        );
    }

    fn report(&mut self, error: SessionError) {
        tracing::error!("{}", error);
        self.notifications
            .push(SessionNotification::Advisory(Advisory::error(&error)));
    }

    fn publish(&mut self) {
        let snapshot = self.session.snapshot();
        if self.last_published.as_ref() != Some(&snapshot) {
            tracing::debug!(
                "Session state: {} (remote {:?}, peers {:?})",
                snapshot.phase,
                snapshot.remote_identity,
                snapshot.present_peers
            );
            self.last_published = Some(snapshot.clone());
            self.notifications
                .push(SessionNotification::StateChanged(snapshot));
        }
    }

    /// Prüft die Invarianten des Datenmodells
    pub fn check_invariants(&self) -> Result<(), String> {
        let s = &self.session;

        if s.remote_identity.is_some() != s.phase.has_remote() {
            return Err(format!(
                "remote identity {:?} in phase {}",
                s.remote_identity, s.phase
            ));
        }
        if s.phase == Phase::Active
            && !(self.media.audio && self.media.video && self.media.in_channel)
        {
            return Err(format!("active without media/channel: {:?}", self.media));
        }
        if s.phase == Phase::Idle && (self.media.audio || self.media.video) {
            return Err(format!("idle with media enabled: {:?}", self.media));
        }
        if self.ringing != (s.phase == Phase::Ringing) {
            return Err(format!("ringing={} in phase {}", self.ringing, s.phase));
        }
        if s.present_peers.contains(&s.local_identity) {
            return Err("local identity listed as present peer".to_string());
        }
        Ok(())
    }
}

impl std::fmt::Debug for CallStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallStateMachine")
            .field("session", &self.session)
            .field("media", &self.media)
            .field("ringing", &self.ringing)
            .field("engine_ready", &self.engine_ready)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
