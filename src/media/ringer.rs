//! Klingel-Indikator (Vibration, Bildschirm wecken)

use crate::session::PeerId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Ring indicator failed: {0}")]
pub struct IndicatorError(pub String);

/// Signalisiert einen eingehenden Anruf
///
/// `start` und `stop` werden von der State Machine strikt paarweise
/// aufgerufen. Auch wenn `start` fehlschlägt, folgt später genau ein `stop`.
pub trait RingIndicator: Send {
    fn start(&mut self, caller: PeerId) -> Result<(), IndicatorError>;
    fn stop(&mut self);
}
