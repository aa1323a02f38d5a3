//! WebSocket Client für den Token-Server
//!
//! Pro Anfrage wird eine kurze Verbindung aufgebaut:
//! - signierte `token_request` Nachricht senden
//! - auf die passende `token` oder `error` Antwort warten (mit Timeout)
//! - Verbindung schließen
//!
//! Token werden nur alle paar Stunden benötigt, eine dauerhafte
//! Verbindung lohnt sich daher nicht.

use super::credential::{Credential, CredentialError, CredentialProvider};
use super::messages::{ServerMessage, TokenRequestPayload};
use crate::crypto::KeyPair;
use crate::session::PeerId;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Standard-Timeout für eine Token-Anfrage
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RemoteTokenProvider {
    ws_url: Url,
    keypair: Arc<KeyPair>,
    timeout: Duration,
}

impl RemoteTokenProvider {
    /// `server_url` darf http(s) oder ws(s) sein, der Pfad `/ws` wird angehängt
    pub fn new(server_url: &str, keypair: Arc<KeyPair>) -> Result<Self, CredentialError> {
        Ok(Self {
            ws_url: Self::websocket_url(server_url)?,
            keypair,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn ws_url(&self) -> &Url {
        &self.ws_url
    }

    fn websocket_url(server_url: &str) -> Result<Url, CredentialError> {
        let mut url = Url::parse(server_url)
            .map_err(|e| CredentialError::ConnectionFailed(format!("invalid url: {}", e)))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(CredentialError::ConnectionFailed(format!(
                    "unsupported scheme: {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| CredentialError::ConnectionFailed("cannot set ws scheme".to_string()))?;

        url.path_segments_mut()
            .map_err(|_| CredentialError::ConnectionFailed("url cannot be a base".to_string()))?
            .pop_if_empty()
            .push("ws");

        Ok(url)
    }

    /// Baut die signierte Nachricht (Timestamp + Signatur über kanonisches JSON)
    fn signed_message(&self, payload: &TokenRequestPayload) -> Result<String, CredentialError> {
        let mut value = serde_json::to_value(payload)
            .map_err(|e| CredentialError::Provider(e.to_string()))?;

        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::Number(Utc::now().timestamp_millis().into()),
            );
        }
        let signature = self.keypair.sign_json(&value);
        if let Some(obj) = value.as_object_mut() {
            obj.insert("signature".to_string(), serde_json::Value::String(signature));
        }

        serde_json::to_string(&value).map_err(|e| CredentialError::Provider(e.to_string()))
    }
}

impl RemoteTokenProvider {
    /// Verbindungsaufbau, Anfrage und Antwort als ein Schritt
    async fn round_trip(&self, identity: PeerId, channel: &str) -> Result<Credential, CredentialError> {
        let (ws_stream, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| CredentialError::ConnectionFailed(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let request_id = uuid::Uuid::new_v4().to_string();
        let payload = TokenRequestPayload::new(
            identity.0,
            channel.to_string(),
            self.keypair.public_key_base64(),
            request_id.clone(),
        );
        write
            .send(Message::Text(self.signed_message(&payload)?))
            .await
            .map_err(|e| CredentialError::ConnectionFailed(e.to_string()))?;

        let mut result = Err(CredentialError::ConnectionFailed(
            "stream ended without response".to_string(),
        ));
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(ServerMessage::Token {
                        request_id: rid,
                        token,
                        expires_at,
                        ..
                    }) if rid == request_id => {
                        result = Utc
                            .timestamp_millis_opt(expires_at)
                            .single()
                            .map(|expires| Credential::new(token, Utc::now(), expires))
                            .ok_or_else(|| {
                                CredentialError::Malformed(format!(
                                    "expiresAt out of range: {}",
                                    expires_at
                                ))
                            });
                        break;
                    }
                    Ok(ServerMessage::Error {
                        request_id: rid,
                        code,
                        message,
                        ..
                    }) if rid.as_deref().map_or(true, |r| r == request_id) => {
                        result = Err(CredentialError::ServerError { code, message });
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Ignoring unparsable token server message: {}", e),
                },
                Ok(Message::Close(_)) => {
                    result = Err(CredentialError::ConnectionFailed(
                        "closed by server".to_string(),
                    ));
                    break;
                }
                Err(e) => {
                    result = Err(CredentialError::ConnectionFailed(e.to_string()));
                    break;
                }
                _ => {}
            }
        }

        let _ = write.send(Message::Close(None)).await;
        result
    }
}

#[async_trait]
impl CredentialProvider for RemoteTokenProvider {
    async fn acquire(&self, identity: PeerId, channel: &str) -> Result<Credential, CredentialError> {
        tracing::info!("Requesting token for uid {} from {}", identity, self.ws_url);

        // Timeout gilt für den gesamten Roundtrip inkl. Handshake
        let result = tokio::time::timeout(self.timeout, self.round_trip(identity, channel))
            .await
            .map_err(|_| {
                tracing::warn!("Token request to {} timed out after {:?}", self.ws_url, self.timeout);
                CredentialError::Timeout
            })?;

        if let Ok(credential) = &result {
            tracing::info!("Token received, valid until {}", credential.expires_at);
        }
        result
    }
}

impl std::fmt::Debug for RemoteTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTokenProvider")
            .field("ws_url", &self.ws_url.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::canonical_json;
    use tokio::net::TcpListener;

    /// Minimaler Token-Server: beantwortet jede Anfrage über `respond`
    async fn spawn_server<F>(respond: F) -> String
    where
        F: Fn(serde_json::Value) -> Option<String> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let request: serde_json::Value = serde_json::from_str(&text).unwrap();
                if let Some(reply) = respond(request) {
                    if ws.send(Message::Text(reply)).await.is_err() {
                        break;
                    }
                }
            }
        });

        format!("http://{}", addr)
    }

    #[test]
    fn test_websocket_url() {
        let keypair = Arc::new(KeyPair::generate());
        let provider = RemoteTokenProvider::new("https://tokens.example.org", Arc::clone(&keypair)).unwrap();
        assert_eq!(provider.ws_url().as_str(), "wss://tokens.example.org/ws");

        let provider = RemoteTokenProvider::new("http://127.0.0.1:8080/api/", keypair).unwrap();
        assert_eq!(provider.ws_url().as_str(), "ws://127.0.0.1:8080/api/ws");
    }

    #[test]
    fn test_rejects_unsupported_scheme() {
        let keypair = Arc::new(KeyPair::generate());
        assert!(matches!(
            RemoteTokenProvider::new("ftp://example.org", keypair),
            Err(CredentialError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_acquire_signed_request() {
        let url = spawn_server(|request| {
            // Signatur des Clients prüfen
            let signature = request["signature"].as_str().unwrap().to_string();
            let public_key = request["publicKey"].as_str().unwrap().to_string();
            KeyPair::verify_base64(&public_key, canonical_json(&request).as_bytes(), &signature)
                .expect("request must be signed");

            assert_eq!(request["type"], "token_request");
            assert_eq!(request["uid"], 1001);
            assert_eq!(request["channel"], "HoneyFamily");

            Some(
                serde_json::json!({
                    "type": "token",
                    "requestId": request["requestId"],
                    "token": "server-token",
                    "expiresAt": Utc::now().timestamp_millis() + 60_000,
                    "timestamp": Utc::now().timestamp_millis(),
                })
                .to_string(),
            )
        })
        .await;

        let provider = RemoteTokenProvider::new(&url, Arc::new(KeyPair::generate())).unwrap();
        let credential = provider.acquire(PeerId(1001), "HoneyFamily").await.unwrap();

        assert_eq!(credential.token, "server-token");
        assert!(!credential.is_expired());
    }

    #[tokio::test]
    async fn test_acquire_server_error() {
        let url = spawn_server(|request| {
            Some(
                serde_json::json!({
                    "type": "error",
                    "requestId": request["requestId"],
                    "code": 403,
                    "message": "uid not allowed",
                    "timestamp": 0,
                })
                .to_string(),
            )
        })
        .await;

        let provider = RemoteTokenProvider::new(&url, Arc::new(KeyPair::generate())).unwrap();
        assert_eq!(
            provider.acquire(PeerId(5), "HoneyFamily").await,
            Err(CredentialError::ServerError {
                code: 403,
                message: "uid not allowed".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_acquire_ignores_foreign_responses_and_times_out() {
        let url = spawn_server(|_| {
            Some(
                serde_json::json!({
                    "type": "token",
                    "requestId": "someone-else",
                    "token": "not-ours",
                    "expiresAt": 0,
                    "timestamp": 0,
                })
                .to_string(),
            )
        })
        .await;

        let provider = RemoteTokenProvider::new(&url, Arc::new(KeyPair::generate()))
            .unwrap()
            .with_timeout(Duration::from_millis(200));
        assert_eq!(
            provider.acquire(PeerId(5), "HoneyFamily").await,
            Err(CredentialError::Timeout)
        );
    }

    #[tokio::test]
    async fn test_acquire_times_out_on_silent_handshake() {
        // Nimmt TCP an, beantwortet aber den WebSocket-Upgrade nie
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let provider =
            RemoteTokenProvider::new(&format!("http://{}", addr), Arc::new(KeyPair::generate()))
                .unwrap()
                .with_timeout(Duration::from_millis(200));

        let result = tokio::time::timeout(
            Duration::from_secs(3),
            provider.acquire(PeerId(5), "HoneyFamily"),
        )
        .await
        .expect("acquire must honour its own timeout");
        assert_eq!(result, Err(CredentialError::Timeout));
    }

    #[tokio::test]
    async fn test_acquire_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider =
            RemoteTokenProvider::new(&format!("http://{}", addr), Arc::new(KeyPair::generate()))
                .unwrap();
        assert!(matches!(
            provider.acquire(PeerId(5), "HoneyFamily").await,
            Err(CredentialError::ConnectionFailed(_))
        ));
    }
}
