//! Credential Refresh Coordinator
//!
//! Besorgt Credentials asynchron abseits des Owner-Tasks und liefert das
//! Ergebnis über eine vom Aufrufer bereitgestellte Continuation zurück.
//! Die Continuation stellt das Ergebnis in die Eingangs-Queue des Owners,
//! die State Machine wendet es dort an (Join, Renew oder Rejoin).
//!
//! Es läuft höchstens eine Anfrage gleichzeitig. Eine dringendere Anfrage
//! (z.B. Hard-Expiry während eines Renew) wertet die laufende auf, statt
//! eine zweite zu starten. Fehlschläge werden nicht automatisch wiederholt.
//! Jede Anfrage ist zeitlich begrenzt, ein hängender Provider endet als
//! `CredentialError::Timeout` und gibt den Platz für die nächste frei.

use super::credential::{Credential, CredentialError, CredentialProvider};
use crate::session::PeerId;
use std::sync::Arc;
use std::time::Duration;

/// Obergrenze für eine einzelne Anfrage, unabhängig vom Provider
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// TYPES
// ============================================================================

/// Wofür ein Credential besorgt wird
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AcquirePurpose {
    /// Proaktive Erneuerung nach Expiry-Warnung (kein Rejoin)
    Renew,
    /// Erster Join bzw. Re-Arming nach Auflegen
    Join,
    /// Token ist abgelaufen, Kanal muss neu betreten werden
    Rejoin,
}

/// Ergebnis einer Anfrage, wie es an den Owner zurückgeliefert wird
#[derive(Debug)]
pub struct CredentialOutcome {
    generation: u64,
    purpose: AcquirePurpose,
    result: Result<Credential, CredentialError>,
}

type Continuation = Arc<dyn Fn(CredentialOutcome) + Send + Sync>;

// ============================================================================
// COORDINATOR
// ============================================================================

pub struct CredentialCoordinator {
    provider: Arc<dyn CredentialProvider>,
    identity: PeerId,
    channel: String,
    deliver: Continuation,
    timeout: Duration,
    generation: u64,
    in_flight: Option<AcquirePurpose>,
    upgrade: Option<AcquirePurpose>,
}

impl CredentialCoordinator {
    /// `deliver` wird aus dem Provider-Task aufgerufen und muss das
    /// Ergebnis an den Owner-Kontext weiterreichen (nicht blockieren)
    pub fn new<F>(
        provider: Arc<dyn CredentialProvider>,
        identity: PeerId,
        channel: String,
        deliver: F,
    ) -> Self
    where
        F: Fn(CredentialOutcome) + Send + Sync + 'static,
    {
        Self {
            provider,
            identity,
            channel,
            deliver: Arc::new(deliver),
            timeout: DEFAULT_ACQUIRE_TIMEOUT,
            generation: 0,
            in_flight: None,
            upgrade: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Credential für den (Re-)Join besorgen
    pub fn acquire(&mut self) {
        self.request(AcquirePurpose::Join);
    }

    /// Token läuft bald ab: neues Credential für `renew_credential`
    pub fn on_expiry_warning(&mut self) {
        self.request(AcquirePurpose::Renew);
    }

    /// Token ist abgelaufen: neues Credential für vollständigen Rejoin
    pub fn on_hard_expiry(&mut self) {
        self.request(AcquirePurpose::Rejoin);
    }

    pub fn request(&mut self, purpose: AcquirePurpose) {
        match self.in_flight {
            Some(current) => {
                let pending = self.upgrade.unwrap_or(current);
                if purpose > pending {
                    tracing::debug!(
                        "Credential request {:?} upgrades in-flight {:?}",
                        purpose,
                        current
                    );
                    self.upgrade = Some(purpose);
                } else {
                    tracing::debug!(
                        "Credential request {:?} coalesced into in-flight {:?}",
                        purpose,
                        current
                    );
                }
            }
            None => self.spawn(purpose),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Nimmt ein zurückgeliefertes Ergebnis an
    ///
    /// Gibt `None` für veraltete Ergebnisse (nach `cancel`) zurück. Wurde die
    /// Anfrage zwischenzeitlich aufgewertet, trägt das Ergebnis den
    /// aufgewerteten Zweck.
    pub fn complete(
        &mut self,
        outcome: CredentialOutcome,
    ) -> Option<(AcquirePurpose, Result<Credential, CredentialError>)> {
        if outcome.generation != self.generation {
            tracing::debug!(
                "Dropping stale credential result for {:?} (generation {})",
                outcome.purpose,
                outcome.generation
            );
            return None;
        }

        self.in_flight = None;
        let purpose = self
            .upgrade
            .take()
            .map_or(outcome.purpose, |upgraded| upgraded.max(outcome.purpose));

        match &outcome.result {
            Ok(credential) => tracing::info!(
                "Credential acquired for {:?}, expires at {}",
                purpose,
                credential.expires_at
            ),
            Err(e) => tracing::error!("Credential acquisition for {:?} failed: {}", purpose, e),
        }

        Some((purpose, outcome.result))
    }

    /// Verwirft alle laufenden Anfragen (Ergebnisse werden ignoriert)
    pub fn cancel(&mut self) {
        self.generation += 1;
        self.in_flight = None;
        self.upgrade = None;
    }

    fn spawn(&mut self, purpose: AcquirePurpose) {
        self.in_flight = Some(purpose);

        let provider = Arc::clone(&self.provider);
        let deliver = Arc::clone(&self.deliver);
        let identity = self.identity;
        let channel = self.channel.clone();
        let generation = self.generation;
        let timeout = self.timeout;

        tracing::debug!("Acquiring credential for {:?}", purpose);

        tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, provider.acquire(identity, &channel))
                .await
                .unwrap_or_else(|_| {
                    tracing::warn!("Credential provider did not answer within {:?}", timeout);
                    Err(CredentialError::Timeout)
                });
            deliver(CredentialOutcome {
                generation,
                purpose,
                result,
            });
        });
    }
}

impl std::fmt::Debug for CredentialCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCoordinator")
            .field("identity", &self.identity)
            .field("channel", &self.channel)
            .field("timeout", &self.timeout)
            .field("generation", &self.generation)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCredentials;
    use tokio::sync::mpsc;

    fn coordinator(
        provider: Arc<FakeCredentials>,
    ) -> (CredentialCoordinator, mpsc::UnboundedReceiver<CredentialOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator =
            CredentialCoordinator::new(provider, PeerId(1001), "HoneyFamily".into(), move |o| {
                let _ = tx.send(o);
            });
        (coordinator, rx)
    }

    #[tokio::test]
    async fn test_acquire_delivers_to_continuation() {
        let provider = Arc::new(FakeCredentials::new());
        let (mut coordinator, mut rx) = coordinator(Arc::clone(&provider));

        coordinator.acquire();
        assert!(coordinator.is_in_flight());

        let outcome = rx.recv().await.unwrap();
        let (purpose, result) = coordinator.complete(outcome).unwrap();
        assert_eq!(purpose, AcquirePurpose::Join);
        assert_eq!(result.unwrap().token, "token-1");
        assert!(!coordinator.is_in_flight());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_reported_not_retried() {
        let provider = Arc::new(FakeCredentials::new());
        provider.set_failing(true);
        let (mut coordinator, mut rx) = coordinator(Arc::clone(&provider));

        coordinator.on_expiry_warning();
        let (purpose, result) = coordinator.complete(rx.recv().await.unwrap()).unwrap();

        assert_eq!(purpose, AcquirePurpose::Renew);
        assert!(result.is_err());
        tokio::task::yield_now().await;
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_hard_expiry_upgrades_in_flight_renew() {
        let provider = Arc::new(FakeCredentials::new());
        let (mut coordinator, mut rx) = coordinator(Arc::clone(&provider));

        coordinator.on_expiry_warning();
        coordinator.on_hard_expiry();
        // Renew ist schwächer als der laufende Rejoin: wird geschluckt
        coordinator.on_expiry_warning();

        let (purpose, result) = coordinator.complete(rx.recv().await.unwrap()).unwrap();
        assert_eq!(purpose, AcquirePurpose::Rejoin);
        assert!(result.is_ok());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_provider_times_out_and_frees_slot() {
        let provider = Arc::new(FakeCredentials::new());
        provider.set_delay(Some(Duration::from_secs(3600)));
        let (coordinator, mut rx) = coordinator(Arc::clone(&provider));
        let mut coordinator = coordinator.with_timeout(Duration::from_millis(50));

        coordinator.acquire();
        let (purpose, result) = coordinator.complete(rx.recv().await.unwrap()).unwrap();
        assert_eq!(purpose, AcquirePurpose::Join);
        assert_eq!(result, Err(CredentialError::Timeout));
        assert!(!coordinator.is_in_flight());

        // Nächste Anfrage startet neu statt im toten Request zu landen
        provider.set_delay(None);
        coordinator.on_hard_expiry();
        let (purpose, result) = coordinator.complete(rx.recv().await.unwrap()).unwrap();
        assert_eq!(purpose, AcquirePurpose::Rejoin);
        assert_eq!(result.unwrap().token, "token-2");
    }

    #[tokio::test]
    async fn test_cancel_discards_late_results() {
        let provider = Arc::new(FakeCredentials::new());
        let (mut coordinator, mut rx) = coordinator(provider);

        coordinator.acquire();
        coordinator.cancel();

        let outcome = rx.recv().await.unwrap();
        assert!(coordinator.complete(outcome).is_none());
    }
}
