//! Ed25519 Schlüsselpaar für Token-Signierung
//!
//! Der lokale Token-Issuer signiert damit die Claims eines Kanal-Tokens,
//! der Remote-Provider signiert damit seine Token-Anfragen an den Server.
//!
//! ## Verwendung
//! ```rust,no_run
//! use call_session::crypto::KeyPair;
//!
//! let keypair = KeyPair::load_or_create()?;
//! let signature = keypair.sign_base64(b"Hello, World!");
//! assert!(KeyPair::verify_base64(&keypair.public_key_base64(), b"Hello, World!", &signature).is_ok());
//! # Ok::<(), call_session::crypto::KeyPairError>(())
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum KeyPairError {
    #[error("Key file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode key material: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("Invalid key length: expected 32, got {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid signature encoding")]
    InvalidSignatureEncoding,

    #[error("Signature verification failed")]
    VerificationFailed,
}

// ============================================================================
// KEYPAIR STRUCT
// ============================================================================

#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Lädt den Schlüssel aus dem App-Datenverzeichnis oder erstellt ihn
    ///
    /// - Linux: `~/.local/share/call-session/keys/signing.key`
    /// - macOS: `~/Library/Application Support/com.callsession.call-session/keys/signing.key`
    /// - Windows: `%APPDATA%/callsession/call-session/data/keys/signing.key`
    pub fn load_or_create() -> Result<Self, KeyPairError> {
        Self::load_or_create_at(Self::default_key_path()?)
    }

    /// Lädt den Schlüssel von `path` oder erstellt ihn dort
    pub fn load_or_create_at(path: impl AsRef<Path>) -> Result<Self, KeyPairError> {
        let path = path.as_ref();
        if path.exists() {
            tracing::info!("Loading signing key from {:?}", path);
            Self::load_from_file(path)
        } else {
            tracing::info!("Creating new signing key at {:?}", path);
            let keypair = Self::generate();
            keypair.save_to_file(path)?;
            Ok(keypair)
        }
    }

    pub fn generate() -> Self {
        let mut csprng = OsRng;
        Self {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    fn load_from_file(path: &Path) -> Result<Self, KeyPairError> {
        let encoded = fs::read_to_string(path)?;
        let bytes = BASE64.decode(encoded.trim())?;
        let key_bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyPairError::InvalidKeyLength(bytes.len()))?;

        Ok(Self {
            signing_key: SigningKey::from_bytes(&key_bytes),
        })
    }

    fn save_to_file(&self, path: &Path) -> Result<(), KeyPairError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, BASE64.encode(self.signing_key.to_bytes()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    fn default_key_path() -> Result<PathBuf, KeyPairError> {
        let proj_dirs = directories::ProjectDirs::from("com", "callsession", "call-session")
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not determine app data directory",
                )
            })?;

        Ok(proj_dirs.data_dir().join("keys").join("signing.key"))
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn sign_base64(&self, message: &[u8]) -> String {
        BASE64.encode(self.sign(message).to_bytes())
    }

    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Signiert ein JSON-Objekt in kanonischer Form (Keys sortiert, ohne `signature`)
    pub fn sign_json(&self, payload: &serde_json::Value) -> String {
        self.sign_base64(canonical_json(payload).as_bytes())
    }

    /// Prüft eine Base64-Signatur gegen einen Base64 Public Key
    pub fn verify_base64(
        public_key: &str,
        message: &[u8],
        signature: &str,
    ) -> Result<(), KeyPairError> {
        let key_bytes = BASE64.decode(public_key)?;
        let key_bytes: [u8; 32] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyPairError::InvalidKeyLength(key_bytes.len()))?;
        let verifying_key =
            VerifyingKey::from_bytes(&key_bytes).map_err(|_| KeyPairError::InvalidPublicKey)?;

        let sig_bytes = BASE64.decode(signature)?;
        let signature = Signature::from_slice(&sig_bytes)
            .map_err(|_| KeyPairError::InvalidSignatureEncoding)?;

        verifying_key
            .verify(message, &signature)
            .map_err(|_| KeyPairError::VerificationFailed)
    }
}

/// Serialisiert JSON mit alphabetisch sortierten Keys, `signature` wird ausgelassen
pub fn canonical_json(value: &serde_json::Value) -> String {
    serde_json::to_string(&sorted(value)).unwrap_or_default()
}

fn sorted(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().filter(|k| *k != "signature").collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for key in keys {
                out.insert(key.clone(), sorted(&map[key]));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sorted).collect())
        }
        other => other.clone(),
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_base64())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::generate();
        let signature = keypair.sign_base64(b"join HoneyFamily");

        // 64 bytes = 88 chars Base64
        assert_eq!(signature.len(), 88);
        assert!(
            KeyPair::verify_base64(&keypair.public_key_base64(), b"join HoneyFamily", &signature)
                .is_ok()
        );
        assert!(matches!(
            KeyPair::verify_base64(&keypair.public_key_base64(), b"tampered", &signature),
            Err(KeyPairError::VerificationFailed)
        ));
    }

    #[test]
    fn test_canonical_json_is_order_independent() {
        let a = serde_json::json!({ "uid": 7, "channel": "c", "signature": "x" });
        let b = serde_json::json!({ "channel": "c", "uid": 7 });
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&b), r#"{"channel":"c","uid":7}"#);
    }

    #[test]
    fn test_load_or_create_persists_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("signing.key");

        let created = KeyPair::load_or_create_at(&path).unwrap();
        let loaded = KeyPair::load_or_create_at(&path).unwrap();
        assert_eq!(created.public_key_base64(), loaded.public_key_base64());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_rejects_truncated_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signing.key");
        fs::write(&path, BASE64.encode([1u8; 16])).unwrap();

        assert!(matches!(
            KeyPair::load_or_create_at(&path),
            Err(KeyPairError::InvalidKeyLength(16))
        ));
    }
}
