//! Konfiguration der Call-Session
//!
//! Standardwerte: Kanal `HoneyFamily`, 1s Join-Verzögerung, 10h Token-Laufzeit.
//! Jeder Wert kann über Umgebungsvariablen oder eine JSON-Datei
//! überschrieben werden.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Standard-Kanal
pub const DEFAULT_CHANNEL: &str = "HoneyFamily";

/// Fallback-Verzögerung vor dem ersten Join, falls die Engine kein Ready-Signal liefert
pub const DEFAULT_JOIN_DELAY_MS: u64 = 1000;

/// Obergrenze für eine Credential-Anfrage (ms)
pub const DEFAULT_CREDENTIAL_TIMEOUT_MS: u64 = 15_000;

/// Token-Laufzeit in Sekunden (10 Stunden)
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 36_000;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Channel name must not be empty")]
    EmptyChannel,
}

// ============================================================================
// SESSION CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Name des gemeinsamen Kanals
    pub channel: String,

    /// Eingehende Anrufe klingeln und müssen explizit angenommen werden.
    /// `false` nimmt jeden eingehenden Anruf sofort an.
    pub require_explicit_answer: bool,

    /// Ausgehende Anrufe bleiben in `Connecting`, bis der Peer im Kanal sichtbar ist
    pub await_remote_presence: bool,

    /// Fallback-Verzögerung vor dem ersten Join (ms)
    pub join_fallback_delay_ms: u64,

    /// Maximale Anzahl Join-Wiederholungen beim Re-Arming
    pub max_rejoin_attempts: u32,

    /// Laufzeit lokal ausgestellter Tokens (s)
    pub token_lifetime_secs: u64,

    /// Obergrenze für eine Credential-Anfrage (ms)
    pub credential_timeout_ms: u64,

    /// Optionaler Token-Server, sonst werden Tokens lokal ausgestellt
    pub token_server_url: Option<String>,

    /// Kapazität des Broadcast-Kanals für Notifications
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            require_explicit_answer: true,
            await_remote_presence: false,
            join_fallback_delay_ms: DEFAULT_JOIN_DELAY_MS,
            max_rejoin_attempts: 3,
            token_lifetime_secs: DEFAULT_TOKEN_LIFETIME_SECS,
            credential_timeout_ms: DEFAULT_CREDENTIAL_TIMEOUT_MS,
            token_server_url: None,
            event_capacity: 100,
        }
    }
}

impl SessionConfig {
    /// Lädt die Konfiguration aus Umgebungsvariablen (fehlende Werte = Default)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Lädt die Konfiguration aus einer JSON-Datei
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Prüft die Werte auf Plausibilität
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel.trim().is_empty() {
            return Err(ConfigError::EmptyChannel);
        }
        if self.token_lifetime_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "token_lifetime_secs",
                value: "0".to_string(),
            });
        }
        if self.credential_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "credential_timeout_ms",
                value: "0".to_string(),
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "event_capacity",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn join_fallback_delay(&self) -> Duration {
        Duration::from_millis(self.join_fallback_delay_ms)
    }

    pub fn credential_timeout(&self) -> Duration {
        Duration::from_millis(self.credential_timeout_ms)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(channel) = lookup("CALL_CHANNEL") {
            config.channel = channel;
        }
        if let Some(v) = lookup("CALL_REQUIRE_ANSWER") {
            config.require_explicit_answer = parse_bool("CALL_REQUIRE_ANSWER", &v)?;
        }
        if let Some(v) = lookup("CALL_AWAIT_PRESENCE") {
            config.await_remote_presence = parse_bool("CALL_AWAIT_PRESENCE", &v)?;
        }
        if let Some(v) = lookup("CALL_JOIN_DELAY_MS") {
            config.join_fallback_delay_ms = parse_number("CALL_JOIN_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("CALL_MAX_REJOIN") {
            config.max_rejoin_attempts = parse_number("CALL_MAX_REJOIN", &v)?;
        }
        if let Some(v) = lookup("CALL_TOKEN_LIFETIME_SECS") {
            config.token_lifetime_secs = parse_number("CALL_TOKEN_LIFETIME_SECS", &v)?;
        }
        if let Some(v) = lookup("CALL_CREDENTIAL_TIMEOUT_MS") {
            config.credential_timeout_ms = parse_number("CALL_CREDENTIAL_TIMEOUT_MS", &v)?;
        }
        if let Some(url) = lookup("CALL_TOKEN_SERVER_URL") {
            config.token_server_url = Some(url).filter(|u| !u.trim().is_empty());
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.channel, "HoneyFamily");
        assert!(config.require_explicit_answer);
        assert!(!config.await_remote_presence);
        assert_eq!(config.join_fallback_delay(), Duration::from_secs(1));
        assert_eq!(config.token_lifetime(), Duration::from_secs(36_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = SessionConfig::from_lookup(lookup_from(&[
            ("CALL_CHANNEL", "Family2"),
            ("CALL_REQUIRE_ANSWER", "false"),
            ("CALL_JOIN_DELAY_MS", "250"),
            ("CALL_CREDENTIAL_TIMEOUT_MS", "2000"),
            ("CALL_TOKEN_SERVER_URL", "https://tokens.example.org"),
        ]))
        .unwrap();

        assert_eq!(config.channel, "Family2");
        assert!(!config.require_explicit_answer);
        assert_eq!(config.join_fallback_delay_ms, 250);
        assert_eq!(config.credential_timeout(), Duration::from_secs(2));
        assert_eq!(
            config.token_server_url.as_deref(),
            Some("https://tokens.example.org")
        );
    }

    #[test]
    fn test_env_rejects_garbage() {
        let err = SessionConfig::from_lookup(lookup_from(&[("CALL_MAX_REJOIN", "many")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CALL_MAX_REJOIN",
                ..
            }
        ));

        let err = SessionConfig::from_lookup(lookup_from(&[("CALL_CHANNEL", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyChannel));
    }

    #[test]
    fn test_json_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "channel": "Lobby", "awaitRemotePresence": true }}"#).unwrap();

        let config = SessionConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.channel, "Lobby");
        assert!(config.await_remote_presence);
        // Nicht gesetzte Felder behalten ihre Defaults
        assert_eq!(config.max_rejoin_attempts, 3);
    }
}
