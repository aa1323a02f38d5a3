//! Media Module - Schnittstellen zu externen Kollaborateuren
//!
//! Die eigentliche Echtzeit-Engine (Audio/Video, Netzwerk, Rendering) und
//! der Klingel-Indikator (Vibration, Wake-Lock) werden von der einbettenden
//! Anwendung bereitgestellt. Dieses Modul definiert nur die Verträge:
//! - `MediaEngine` mit ihren Events
//! - `RingIndicator`
//!

mod engine;
mod ringer;

pub use engine::{EngineError, EngineEvent, LeaveReason, MediaEngine};
pub use ringer::{IndicatorError, RingIndicator};
