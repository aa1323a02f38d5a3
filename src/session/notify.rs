//! Notifications an UI und andere Observer
//!
//! Zustandsänderungen und Hinweise (inkl. Fehler) laufen über denselben
//! Kanal. Observer werden auf dem Owner-Task aufgerufen und dürfen nicht
//! blockieren.

use super::state::SessionSnapshot;
use crate::error::{ErrorCode, SessionError};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

// ============================================================================
// NOTIFICATIONS
// ============================================================================

/// Kurzer Hinweis für den Benutzer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Advisory {
    /// `None` für reine Info-Hinweise
    pub code: Option<ErrorCode>,
    pub message: String,
}

impl Advisory {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn error(error: &SessionError) -> Self {
        Self {
            code: Some(error.code()),
            message: error.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.code.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SessionNotification {
    StateChanged(SessionSnapshot),
    Advisory(Advisory),
}

// ============================================================================
// OBSERVERS
// ============================================================================

/// Handle zum Abmelden eines Observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Arc<dyn Fn(&SessionNotification) + Send + Sync>;

/// Verteilt Notifications an Callback-Observer und Broadcast-Subscriber
#[derive(Clone)]
pub(crate) struct Notifier {
    observers: Arc<RwLock<Vec<(ObserverId, Observer)>>>,
    next_id: Arc<AtomicU64>,
    event_tx: broadcast::Sender<SessionNotification>,
}

impl Notifier {
    pub(crate) fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self {
            observers: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            event_tx,
        }
    }

    pub(crate) fn register<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&SessionNotification) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(observer)));
        id
    }

    pub(crate) fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(other, _)| *other != id);
        observers.len() != before
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionNotification> {
        self.event_tx.subscribe()
    }

    pub(crate) fn publish(&self, notification: &SessionNotification) {
        // Liste klonen, damit ein Observer sich selbst abmelden kann
        let observers: Vec<Observer> = self
            .observers
            .read()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();

        for observer in observers {
            observer(notification);
        }

        let _ = self.event_tx.send(notification.clone());
    }
}
