//! Inbound webhook verification and classification.
//!
//! A webhook carries its token in a request header and its sealed body as
//! the request body. After the envelope is opened the JSON `type` field
//! selects exactly one [`NotificationPayload`] variant.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sealpost_crypto::hash::sha256;
use sealpost_crypto::EntityIdentifier;

use crate::errors::EnvelopeError;
use crate::transport::{HeaderLookup, DEFAULT_TOKEN_HEADER};
use crate::verifier::{EnvelopeVerifier, InboundCheck};

// ============================================================================
// Notification Types
// ============================================================================

/// Category of a user's answer to an authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationResponseType {
    Authorized,
    Denied,
    Failed,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationReason {
    Approved,
    Disapproved,
    Fraudulent,
    Policy,
    Permission,
    Authentication,
    Configuration,
    BusyLocal,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationResult {
    pub authorization_request_id: String,
    pub authorized: bool,
    pub service_user_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_user_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_push_id: Option<String>,
    pub device_id: String,
    #[serde(default)]
    pub service_pins: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<AuthorizationResponseType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<AuthorizationReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraud: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnd {
    /// Platform timestamp, carried as sent
    pub api_time: String,
    pub user_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLinkCompletion {
    pub device_id: String,
    pub device_public_key: String,
    pub device_public_key_id: String,
}

/// A verified, decrypted webhook notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationPayload {
    AuthorizationResult(AuthorizationResult),
    SessionEnd(SessionEnd),
    DeviceLinkCompletion(DeviceLinkCompletion),
}

const KNOWN_KINDS: [&str; 3] = ["authorization_result", "session_end", "device_link_completion"];

impl NotificationPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationPayload::AuthorizationResult(_) => "authorization_result",
            NotificationPayload::SessionEnd(_) => "session_end",
            NotificationPayload::DeviceLinkCompletion(_) => "device_link_completion",
        }
    }

    /// Classify a decrypted body.
    ///
    /// Unparseable JSON is an `InvalidResponse`; a missing or unknown `type`
    /// is an `InvalidRequest`.
    pub fn from_json(plaintext: &[u8]) -> Result<Self, EnvelopeError> {
        let value: serde_json::Value = serde_json::from_slice(plaintext)
            .map_err(|e| EnvelopeError::invalid_response(format!("notification is not json: {e}")))?;

        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| EnvelopeError::InvalidRequest("notification has no type".to_string()))?;
        if !KNOWN_KINDS.contains(&kind) {
            return Err(EnvelopeError::InvalidRequest(format!(
                "unknown notification type {kind:?}"
            )));
        }

        serde_json::from_value(value).map_err(|e| {
            EnvelopeError::invalid_response(format!("malformed notification: {e}"))
        })
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
pub struct WebhookStats {
    pub received: AtomicU64,
    pub accepted: AtomicU64,
    /// Authentic but empty deliveries
    pub empty: AtomicU64,
    /// Token, claim or key rejections
    pub rejected: AtomicU64,
    pub decryption_failures: AtomicU64,
    pub unknown_kind: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WebhookStatsSnapshot {
    pub received: u64,
    pub accepted: u64,
    pub empty: u64,
    pub rejected: u64,
    pub decryption_failures: u64,
    pub unknown_kind: u64,
}

impl WebhookStats {
    pub fn snapshot(&self) -> WebhookStatsSnapshot {
        WebhookStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            decryption_failures: self.decryption_failures.load(Ordering::Relaxed),
            unknown_kind: self.unknown_kind.load(Ordering::Relaxed),
        }
    }

    fn record_failure(&self, err: &EnvelopeError) {
        let counter = match err {
            EnvelopeError::Cryptography(_) => &self.decryption_failures,
            EnvelopeError::InvalidRequest(_) => &self.unknown_kind,
            _ => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct WebhookDispatcher {
    verifier: EnvelopeVerifier,
    token_header: String,
    expected_issuer: Option<EntityIdentifier>,
    stats: Arc<WebhookStats>,
}

impl WebhookDispatcher {
    pub fn new(verifier: EnvelopeVerifier) -> Self {
        Self {
            verifier,
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            expected_issuer: None,
            stats: Arc::new(WebhookStats::default()),
        }
    }

    pub fn with_token_header(mut self, header: impl Into<String>) -> Self {
        self.token_header = header.into();
        self
    }

    /// Only accept webhooks signed by `issuer`.
    pub fn with_expected_issuer(mut self, issuer: EntityIdentifier) -> Self {
        self.expected_issuer = Some(issuer);
        self
    }

    pub fn stats(&self) -> &Arc<WebhookStats> {
        &self.stats
    }

    /// Verify, decrypt and classify one webhook delivery.
    ///
    /// `method` and `path` are the request line the webhook arrived on. When
    /// both are given they must match the token's request binding; when both
    /// are omitted the binding is not checked.
    ///
    /// `headers` may be repeated `(name, value)` pairs or a map from name to
    /// values; see [`HeaderLookup`].
    ///
    /// Returns `Ok(None)` for an authentic delivery that carries no content.
    pub async fn dispatch<H>(
        &self,
        headers: &H,
        body: &str,
        method: Option<&str>,
        path: Option<&str>,
    ) -> Result<Option<NotificationPayload>, EnvelopeError>
    where
        H: HeaderLookup + Sync + ?Sized,
    {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        let result = self.dispatch_inner(headers, body, method, path).await;
        match &result {
            Ok(Some(payload)) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                info!(kind = payload.kind(), "webhook accepted");
            }
            Ok(None) => {
                self.stats.empty.fetch_add(1, Ordering::Relaxed);
                debug!("webhook carried no content");
            }
            Err(e) => {
                self.stats.record_failure(e);
                warn!(
                    body_sha256 = %hex::encode(&sha256(body.as_bytes())[..8]),
                    error = %e,
                    "webhook rejected"
                );
            }
        }
        result
    }

    async fn dispatch_inner<H>(
        &self,
        headers: &H,
        body: &str,
        method: Option<&str>,
        path: Option<&str>,
    ) -> Result<Option<NotificationPayload>, EnvelopeError>
    where
        H: HeaderLookup + Sync + ?Sized,
    {
        let token = headers.first_value(&self.token_header).ok_or_else(|| {
            EnvelopeError::invalid_response(format!("missing {} header", self.token_header))
        })?;

        let request = match (method, path) {
            (Some(m), Some(p)) => Some((m, p)),
            (None, None) => None,
            _ => {
                return Err(EnvelopeError::InvalidRequest(
                    "method and path must be given together".to_string(),
                ))
            }
        };
        let check = InboundCheck {
            issuer: self.expected_issuer,
            request,
            body: Some(body),
        };

        let opened = self.verifier.open(token, check).await?;
        match opened.plaintext {
            Some(plaintext) => NotificationPayload::from_json(&plaintext).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_end_from_json() {
        let payload = NotificationPayload::from_json(
            br#"{"type":"session_end","apiTime":"2024-01-01T00:00:00Z","userHash":"abc"}"#,
        )
        .unwrap();
        assert_eq!(
            payload,
            NotificationPayload::SessionEnd(SessionEnd {
                api_time: "2024-01-01T00:00:00Z".to_string(),
                user_hash: "abc".to_string(),
            })
        );
        assert_eq!(payload.kind(), "session_end");
    }

    #[test]
    fn test_authorization_result_from_json() {
        let payload = NotificationPayload::from_json(
            br#"{
                "type": "authorization_result",
                "authorizationRequestId": "req-1",
                "authorized": false,
                "serviceUserHash": "suh",
                "deviceId": "dev-1",
                "servicePins": ["1234", "5678"],
                "responseType": "DENIED",
                "reason": "FRAUDULENT",
                "denialReason": "DEN1",
                "fraud": true
            }"#,
        )
        .unwrap();
        let NotificationPayload::AuthorizationResult(result) = payload else {
            panic!("expected authorization result");
        };
        assert!(!result.authorized);
        assert_eq!(result.service_pins, vec!["1234", "5678"]);
        assert_eq!(result.organization_user_hash, None);
        assert_eq!(result.response_type, Some(AuthorizationResponseType::Denied));
        assert_eq!(result.reason, Some(AuthorizationReason::Fraudulent));
        assert_eq!(result.fraud, Some(true));
    }

    #[test]
    fn test_unrecognised_reason_is_other() {
        let payload = NotificationPayload::from_json(
            br#"{"type":"authorization_result","authorizationRequestId":"r","authorized":true,
                "serviceUserHash":"s","deviceId":"d","reason":"SOMETHING_NEW"}"#,
        )
        .unwrap();
        let NotificationPayload::AuthorizationResult(result) = payload else {
            panic!("expected authorization result");
        };
        assert_eq!(result.reason, Some(AuthorizationReason::Other));
        assert!(result.service_pins.is_empty());
    }

    #[test]
    fn test_device_link_completion_round_trips() {
        let payload = NotificationPayload::DeviceLinkCompletion(DeviceLinkCompletion {
            device_id: "d".to_string(),
            device_public_key: "pk".to_string(),
            device_public_key_id: "kid".to_string(),
        });
        let json = serde_json::to_vec(&payload).unwrap();
        assert!(String::from_utf8_lossy(&json).contains(r#""type":"device_link_completion""#));
        assert_eq!(NotificationPayload::from_json(&json).unwrap(), payload);
    }

    #[test]
    fn test_classification_errors() {
        assert!(matches!(
            NotificationPayload::from_json(br#"{"type":"user_deleted"}"#),
            Err(EnvelopeError::InvalidRequest(_))
        ));
        assert!(matches!(
            NotificationPayload::from_json(br#"{"userHash":"abc"}"#),
            Err(EnvelopeError::InvalidRequest(_))
        ));
        assert!(matches!(
            NotificationPayload::from_json(b"not json"),
            Err(EnvelopeError::InvalidResponse { .. })
        ));
        assert!(matches!(
            NotificationPayload::from_json(br#"{"type":"session_end","apiTime":1}"#),
            Err(EnvelopeError::InvalidResponse { .. })
        ));
    }
}
