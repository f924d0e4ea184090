//! HTTP collaborator seam and the envelope call path built on it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use sealpost_crypto::EntityIdentifier;

use crate::errors::{CommunicationError, EnvelopeError};
use crate::key_source::{KeyFetcher, KeyRecord};
use crate::outbound::OutboundBuilder;
use crate::verifier::{EnvelopeVerifier, InboundCheck};

/// Default header carrying the compact token.
pub const DEFAULT_TOKEN_HEADER: &str = "X-Sealpost-Token";

/// First value of `name` in `headers`, compared case-insensitively.
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Read access to received headers. Names compare case-insensitively and a
/// header may carry several values, of which the first one counts.
///
/// Implemented for repeated `(name, value)` pairs and for a map from name to
/// its list of values.
pub trait HeaderLookup {
    fn first_value(&self, name: &str) -> Option<&str>;
}

impl HeaderLookup for [(String, String)] {
    fn first_value(&self, name: &str) -> Option<&str> {
        header_value(self, name)
    }
}

impl HeaderLookup for Vec<(String, String)> {
    fn first_value(&self, name: &str) -> Option<&str> {
        header_value(self, name)
    }
}

impl HeaderLookup for HashMap<String, Vec<String>> {
    fn first_value(&self, name: &str) -> Option<&str> {
        self.iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .find_map(|(_, values)| values.first())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: String,
    /// Path relative to the transport's base URL, including any query
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl TransportRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    fn status_error(&self) -> CommunicationError {
        CommunicationError::Status {
            status: self.status,
            body: String::from_utf8_lossy(&self.body).into_owned(),
        }
    }
}

/// Sends one HTTP exchange. Pooling and retries are the implementation's
/// concern.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, CommunicationError>;
}

// ============================================================================
// Key listing over HTTP
// ============================================================================

/// Lists keys with `GET {keys_path}/{entity}[?key_id=..]`.
pub struct HttpKeyFetcher {
    transport: Arc<dyn HttpTransport>,
    keys_path: String,
}

impl HttpKeyFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, keys_path: impl Into<String>) -> Self {
        Self {
            transport,
            keys_path: keys_path.into().trim_end_matches('/').to_string(),
        }
    }

    /// `key_id` is untrusted header input and is always form-encoded.
    fn keys_url(&self, entity: &EntityIdentifier, key_id: Option<&str>) -> String {
        match key_id {
            Some(id) => {
                let query = form_urlencoded::Serializer::new(String::new())
                    .append_pair("key_id", id)
                    .finish();
                format!("{}/{}?{}", self.keys_path, entity, query)
            }
            None => format!("{}/{}", self.keys_path, entity),
        }
    }
}

#[async_trait]
impl KeyFetcher for HttpKeyFetcher {
    async fn fetch_keys(
        &self,
        entity: &EntityIdentifier,
        key_id: Option<&str>,
    ) -> Result<Vec<KeyRecord>, EnvelopeError> {
        let response = self
            .transport
            .send(TransportRequest::new("GET", self.keys_url(entity, key_id)))
            .await?;

        // An entity without published keys lists nothing.
        if response.status == 404 {
            return Ok(Vec::new());
        }
        if !response.is_success() {
            return Err(response.status_error().into());
        }
        serde_json::from_slice(&response.body)
            .map_err(|e| EnvelopeError::invalid_response(format!("key listing: {e}")))
    }
}

// ============================================================================
// Envelope client
// ============================================================================

/// Seals requests, sends them and opens the sealed responses.
pub struct EnvelopeClient {
    builder: OutboundBuilder,
    verifier: EnvelopeVerifier,
    transport: Arc<dyn HttpTransport>,
    token_header: String,
    ttl_secs: u64,
}

impl EnvelopeClient {
    pub fn new(
        builder: OutboundBuilder,
        verifier: EnvelopeVerifier,
        transport: Arc<dyn HttpTransport>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            builder,
            verifier,
            transport,
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            ttl_secs,
        }
    }

    pub fn with_token_header(mut self, header: impl Into<String>) -> Self {
        self.token_header = header.into();
        self
    }

    /// Send `plaintext` to `destination` and return the decrypted reply.
    ///
    /// `Ok(None)` means the destination answered without content.
    pub async fn call(
        &self,
        method: &str,
        path: &str,
        destination: EntityIdentifier,
        plaintext: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, EnvelopeError> {
        let sealed = self
            .builder
            .build_request(method, path, plaintext, destination, self.ttl_secs)
            .await?;

        let mut request = TransportRequest::new(method.to_ascii_uppercase(), path)
            .header(self.token_header.as_str(), sealed.envelope.compact_token());
        if let Some(body) = sealed.body {
            request = request
                .header("Content-Type", "application/jose")
                .body(body);
        }

        debug!(method = %method, path = %path, destination = %destination, "sending sealed request");
        let response = self.transport.send(request).await.map_err(|e| {
            warn!(path = %path, error = %e, "transport failure");
            EnvelopeError::from(e)
        })?;

        if !response.is_success() {
            info!(path = %path, status = response.status, "request refused");
            return Err(response.status_error().into());
        }

        let token = response.header(&self.token_header).ok_or_else(|| {
            EnvelopeError::invalid_response(format!("response has no {} header", self.token_header))
        })?;
        let body = std::str::from_utf8(&response.body)
            .map_err(|_| EnvelopeError::invalid_response("response body is not utf-8"))?;

        let check = InboundCheck::from_issuer(destination).with_body(body);
        let opened = self.verifier.open(token, check).await?;
        Ok(opened.plaintext)
    }
}
