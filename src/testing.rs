//! Test-Doubles für Engine, Klingel-Indikator und Credential-Provider

use crate::credentials::{Credential, CredentialError, CredentialProvider};
use crate::media::{EngineError, IndicatorError, MediaEngine, RingIndicator};
use crate::session::PeerId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Join {
        token: String,
        channel: String,
        uid: PeerId,
    },
    Leave,
    EnableAudio,
    DisableAudio,
    EnableVideo,
    DisableVideo,
    BindLocal,
    UnbindLocal,
    BindRemote(PeerId),
    UnbindRemote(PeerId),
    Renew(String),
}

#[derive(Default)]
struct FakeEngineState {
    calls: Vec<EngineCall>,
    failing: HashSet<&'static str>,
}

/// Zeichnet alle Aufrufe auf; einzelne Operationen können fehlschlagen
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<FakeEngineState>>,
    ready_signal: bool,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine, die `EngineEvent::Ready` selbst sendet
    pub fn with_ready_signal() -> Self {
        Self {
            ready_signal: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear(&self) {
        self.state.lock().calls.clear();
    }

    pub fn count(&self, call: &EngineCall) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Operation schlägt ab jetzt fehl (Name wie in `MediaEngine`)
    pub fn fail(&self, operation: &'static str) {
        self.state.lock().failing.insert(operation);
    }

    pub fn heal(&self, operation: &'static str) {
        self.state.lock().failing.remove(operation);
    }

    fn record(&self, operation: &'static str, call: EngineCall) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.failing.contains(operation) {
            Err(EngineError::new(operation, "injected failure"))
        } else {
            Ok(())
        }
    }
}

impl MediaEngine for FakeEngine {
    fn join_channel(&mut self, token: &str, channel: &str, uid: PeerId) -> Result<(), EngineError> {
        self.record(
            "join_channel",
            EngineCall::Join {
                token: token.to_string(),
                channel: channel.to_string(),
                uid,
            },
        )
    }

    fn leave_channel(&mut self) -> Result<(), EngineError> {
        self.record("leave_channel", EngineCall::Leave)
    }

    fn enable_audio(&mut self) -> Result<(), EngineError> {
        self.record("enable_audio", EngineCall::EnableAudio)
    }

    fn disable_audio(&mut self) -> Result<(), EngineError> {
        self.record("disable_audio", EngineCall::DisableAudio)
    }

    fn enable_video(&mut self) -> Result<(), EngineError> {
        self.record("enable_video", EngineCall::EnableVideo)
    }

    fn disable_video(&mut self) -> Result<(), EngineError> {
        self.record("disable_video", EngineCall::DisableVideo)
    }

    fn bind_local_render(&mut self) -> Result<(), EngineError> {
        self.record("bind_local_render", EngineCall::BindLocal)
    }

    fn unbind_local_render(&mut self) -> Result<(), EngineError> {
        self.record("unbind_local_render", EngineCall::UnbindLocal)
    }

    fn bind_remote_render(&mut self, peer: PeerId) -> Result<(), EngineError> {
        self.record("bind_remote_render", EngineCall::BindRemote(peer))
    }

    fn unbind_remote_render(&mut self, peer: PeerId) -> Result<(), EngineError> {
        self.record("unbind_remote_render", EngineCall::UnbindRemote(peer))
    }

    fn renew_credential(&mut self, token: &str) -> Result<(), EngineError> {
        self.record("renew_credential", EngineCall::Renew(token.to_string()))
    }

    fn emits_ready_event(&self) -> bool {
        self.ready_signal
    }
}

// ============================================================================
// RING INDICATOR
// ============================================================================

#[derive(Default)]
struct FakeRingerState {
    starts: usize,
    stops: usize,
    fail_next_start: bool,
}

/// Zählt start/stop und prüft, dass beide strikt paarweise kommen
#[derive(Clone, Default)]
pub struct FakeRinger {
    state: Arc<Mutex<FakeRingerState>>,
}

impl FakeRinger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> usize {
        self.state.lock().starts
    }

    pub fn stops(&self) -> usize {
        self.state.lock().stops
    }

    pub fn fail_next_start(&self) {
        self.state.lock().fail_next_start = true;
    }
}

impl RingIndicator for FakeRinger {
    fn start(&mut self, caller: PeerId) -> Result<(), IndicatorError> {
        let mut state = self.state.lock();
        assert_eq!(state.starts, state.stops, "ring indicator started twice");
        state.starts += 1;
        if std::mem::take(&mut state.fail_next_start) {
            return Err(IndicatorError(format!("cannot vibrate for {}", caller)));
        }
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        assert!(state.stops < state.starts, "ring indicator stopped without start");
        state.stops += 1;
    }
}

// ============================================================================
// CREDENTIALS
// ============================================================================

/// Liefert `token-1`, `token-2`, ... mit einer Stunde Laufzeit
#[derive(Default)]
pub struct FakeCredentials {
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Verzögert jede folgende Antwort (simuliert einen hängenden Provider)
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn acquire(&self, _identity: PeerId, _channel: &str) -> Result<Credential, CredentialError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CredentialError::Provider("injected failure".to_string()));
        }
        Ok(Credential::valid_for(
            format!("token-{}", n),
            chrono::Duration::hours(1),
        ))
    }
}
