//! Crypto Module - Ed25519 Key Management
//!
//! Dieses Modul verwaltet den Signierschlüssel:
//! - Generierung beim ersten Start und persistente Speicherung
//! - Signierung von Token-Claims und Token-Anfragen
//! - Verifikation von Signaturen
//!

mod keypair;

pub use keypair::{canonical_json, KeyPair, KeyPairError};
