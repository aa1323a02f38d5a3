//! Call Session Handle
//!
//! `CallSession` ist die öffentliche Fassade. Alle Eingaben (Benutzeraktionen,
//! Engine-Events, Credential-Ergebnisse) landen in einer Queue und werden von
//! einem einzigen Owner-Task nacheinander auf die State Machine angewendet.
//! Es gibt damit keine nebenläufigen Mutationen der Session.
//!
//! Observer und Broadcast-Subscriber werden vom Owner-Task benachrichtigt.
//! Observer dürfen Methoden des Handles aufrufen (die Eingabe wird nur
//! eingereiht), aber nicht blockieren.

use super::machine::{CallStateMachine, Directive, UserAction};
use super::notify::{Notifier, ObserverId, SessionNotification};
use super::state::{PeerId, Session, SessionSnapshot};
use crate::config::SessionConfig;
use crate::credentials::{CredentialCoordinator, CredentialOutcome, CredentialProvider};
use crate::error::SessionError;
use crate::media::{EngineEvent, MediaEngine, RingIndicator};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

// ============================================================================
// PLATFORM PRECONDITIONS
// ============================================================================

/// Vom Host bestätigte Berechtigungen und Fähigkeiten
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlatformPreconditions {
    pub microphone: bool,
    pub camera: bool,
    pub vibration: bool,
    pub foreground_service: bool,
    pub network: bool,
}

impl PlatformPreconditions {
    pub fn all_granted() -> Self {
        Self {
            microphone: true,
            camera: true,
            vibration: true,
            foreground_service: true,
            network: true,
        }
    }

    /// Namen der fehlenden Voraussetzungen
    pub fn missing(&self) -> Vec<&'static str> {
        [
            (self.microphone, "microphone"),
            (self.camera, "camera"),
            (self.vibration, "vibration"),
            (self.foreground_service, "foreground_service"),
            (self.network, "network"),
        ]
        .into_iter()
        .filter(|(granted, _)| !granted)
        .map(|(_, name)| name)
        .collect()
    }

    pub fn is_satisfied(&self) -> bool {
        self.missing().is_empty()
    }
}

// ============================================================================
// OWNER INPUTS
// ============================================================================

enum Input {
    User(UserAction),
    Engine(EngineEvent),
    /// Fallback-Timer, falls die Engine kein Ready-Event sendet
    ReadyFallback,
    Credential(CredentialOutcome),
    /// Barriere: bestätigt, sobald alle vorherigen Eingaben verarbeitet sind
    Flush(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
}

/// Nimmt Engine-Callbacks von beliebigen Threads entgegen und reiht sie
/// in die Queue des Owner-Tasks ein
#[derive(Clone)]
pub struct EngineEventSink {
    tx: mpsc::WeakUnboundedSender<Input>,
}

impl EngineEventSink {
    /// Gibt `false` zurück, wenn die Session bereits beendet ist
    pub fn deliver(&self, event: EngineEvent) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(Input::Engine(event)).is_ok(),
            None => {
                tracing::debug!("Dropping engine event {:?}, session gone", event);
                false
            }
        }
    }
}

impl std::fmt::Debug for EngineEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEventSink").finish_non_exhaustive()
    }
}

// ============================================================================
// CALL SESSION
// ============================================================================

pub struct CallSession {
    local_identity: PeerId,
    input_tx: mpsc::UnboundedSender<Input>,
    notifier: Notifier,
    snapshot: Arc<RwLock<SessionSnapshot>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CallSession {
    /// Prüft die Voraussetzungen und startet den Owner-Task
    ///
    /// Muss innerhalb einer Tokio-Runtime aufgerufen werden. Die Engine wird
    /// mit deaktivierten Medien initialisiert, danach wird das erste
    /// Credential besorgt und der Kanal betreten (Listening).
    pub fn start(
        local_identity: PeerId,
        preconditions: &PlatformPreconditions,
        config: SessionConfig,
        engine: Box<dyn MediaEngine>,
        ringer: Box<dyn RingIndicator>,
        provider: Arc<dyn CredentialProvider>,
    ) -> Result<Self, SessionError> {
        let missing = preconditions.missing();
        if !missing.is_empty() {
            tracing::error!("Cannot start call session, missing: {:?}", missing);
            return Err(SessionError::PreconditionUnmet(missing));
        }
        config.validate()?;

        let notifier = Notifier::new(config.event_capacity);
        let snapshot = Arc::new(RwLock::new(Session::new(local_identity).snapshot()));
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        let weak_tx = input_tx.downgrade();
        let coordinator = CredentialCoordinator::new(
            provider,
            local_identity,
            config.channel.clone(),
            move |outcome| {
                if let Some(tx) = weak_tx.upgrade() {
                    let _ = tx.send(Input::Credential(outcome));
                }
            },
        )
        .with_timeout(config.credential_timeout());

        let machine = CallStateMachine::new(local_identity, config.clone(), engine, ringer);

        if !machine.engine_emits_ready() {
            let weak_tx = input_tx.downgrade();
            let delay = config.join_fallback_delay();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(tx) = weak_tx.upgrade() {
                    let _ = tx.send(Input::ReadyFallback);
                }
            });
        }

        let task = tokio::spawn(Self::run(
            machine,
            coordinator,
            input_rx,
            notifier.clone(),
            Arc::clone(&snapshot),
        ));

        Ok(Self {
            local_identity,
            input_tx,
            notifier,
            snapshot,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn local_identity(&self) -> PeerId {
        self.local_identity
    }

    /// Ruft einen anwesenden Peer an (nur aus Listening)
    pub fn place_call(&self, peer: PeerId) {
        self.send(Input::User(UserAction::PlaceCall(peer)));
    }

    pub fn answer(&self) {
        self.send(Input::User(UserAction::Answer));
    }

    pub fn reject(&self) {
        self.send(Input::User(UserAction::Reject));
    }

    pub fn hang_up(&self) {
        self.send(Input::User(UserAction::HangUp));
    }

    /// Erneuter Versuch, den Kanal zu betreten (nur aus Idle)
    pub fn rearm(&self) {
        self.send(Input::User(UserAction::Rearm));
    }

    /// Sink für die Callbacks der Media Engine
    pub fn engine_events(&self) -> EngineEventSink {
        EngineEventSink {
            tx: self.input_tx.downgrade(),
        }
    }

    /// Observer für Zustandsänderungen registrieren
    pub fn on_session_state_changed<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&SessionSnapshot) + Send + Sync + 'static,
    {
        self.notifier.register(move |notification| {
            if let SessionNotification::StateChanged(snapshot) = notification {
                observer(snapshot);
            }
        })
    }

    /// Observer für alle Notifications (inkl. Advisories)
    pub fn on_notification<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&SessionNotification) + Send + Sync + 'static,
    {
        self.notifier.register(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.notifier.unregister(id)
    }

    /// Gibt einen Notification-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotification> {
        self.notifier.subscribe()
    }

    /// Zuletzt vom Owner-Task veröffentlichter Zustand
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().clone()
    }

    /// Wartet, bis alle bisher eingereihten Eingaben verarbeitet sind
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.input_tx.send(Input::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Beendet die Session: Klingeln stoppen, Medien abbauen, Kanal verlassen
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.input_tx.send(Input::Stop(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("Call session task failed: {}", e);
            }
        }
    }

    fn send(&self, input: Input) {
        if self.input_tx.send(input).is_err() {
            tracing::warn!("Call session already stopped, input dropped");
        }
    }

    // ========================================================================
    // OWNER TASK
    // ========================================================================

    async fn run(
        mut machine: CallStateMachine,
        mut coordinator: CredentialCoordinator,
        mut input_rx: mpsc::UnboundedReceiver<Input>,
        notifier: Notifier,
        snapshot: Arc<RwLock<SessionSnapshot>>,
    ) {
        machine.start();
        Self::dispatch(&mut machine, &mut coordinator, &notifier, &snapshot);

        while let Some(input) = input_rx.recv().await {
            match input {
                Input::User(action) => machine.apply(action),
                Input::Engine(event) => machine.handle_engine_event(event),
                Input::ReadyFallback => {
                    tracing::debug!("No ready event from engine, using fallback delay");
                    machine.engine_ready();
                }
                Input::Credential(outcome) => {
                    if let Some((purpose, result)) = coordinator.complete(outcome) {
                        match result {
                            Ok(credential) => machine.credential_acquired(purpose, credential),
                            Err(e) => machine.credential_failed(purpose, e),
                        }
                    }
                }
                Input::Flush(ack) => {
                    let _ = ack.send(());
                }
                Input::Stop(ack) => {
                    coordinator.cancel();
                    machine.shutdown();
                    Self::dispatch(&mut machine, &mut coordinator, &notifier, &snapshot);
                    let _ = ack.send(());
                    return;
                }
            }
            Self::dispatch(&mut machine, &mut coordinator, &notifier, &snapshot);
        }

        // Handle ohne stop() verworfen
        if !machine.is_stopped() {
            tracing::debug!("Call session handle dropped, shutting down");
            coordinator.cancel();
            machine.shutdown();
            Self::dispatch(&mut machine, &mut coordinator, &notifier, &snapshot);
        }
    }

    fn dispatch(
        machine: &mut CallStateMachine,
        coordinator: &mut CredentialCoordinator,
        notifier: &Notifier,
        snapshot: &RwLock<SessionSnapshot>,
    ) {
        for directive in machine.take_directives() {
            match directive {
                Directive::AcquireCredential(purpose) => coordinator.request(purpose),
            }
        }

        let notifications = machine.take_notifications();
        if notifications.is_empty() {
            return;
        }

        *snapshot.write() = machine.session().snapshot();
        for notification in &notifications {
            notifier.publish(notification);
        }
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("local_identity", &self.local_identity)
            .field("phase", &self.snapshot.read().phase)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
