//! Error taxonomy for envelope operations.
//!
//! Every public operation in this crate returns [`EnvelopeError`]. Lower
//! level errors from `sealpost-crypto` are folded in here so callers match
//! on one closed set of categories.

use sealpost_crypto::{
    CipherError, ClaimViolation, CryptoError, EntityIdentifier, KeyError, SigningError, TokenError,
};
use thiserror::Error;

// ============================================================================
// Transport Errors
// ============================================================================

/// Failures of the HTTP collaborator, passed through unmasked.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommunicationError {
    /// Could not reach the remote side
    #[error("connection failed: {0}")]
    Connection(String),

    /// Request did not complete in time
    #[error("request timed out")]
    Timeout,

    /// Remote side answered with a non-success status
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
}

// ============================================================================
// Envelope Errors
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// No usable public key, even after one refresh
    #[error("no key found for {entity} (key id {})", .key_id.as_deref().unwrap_or("<current>"))]
    NoKeyFound {
        entity: EntityIdentifier,
        key_id: Option<String>,
    },

    /// Envelope was malformed, forged, or its claims were rejected
    #[error("invalid response: {reason}")]
    InvalidResponse {
        reason: String,
        claim: Option<&'static str>,
    },

    /// Content was authentic but not something we understand
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("cryptography error: {0}")]
    Cryptography(#[from] CryptoError),

    #[error("communication error: {0}")]
    Communication(#[from] CommunicationError),
}

impl EnvelopeError {
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        EnvelopeError::InvalidResponse {
            reason: reason.into(),
            claim: None,
        }
    }

    /// Name of the rejected claim, when the rejection was about one.
    pub fn claim(&self) -> Option<&'static str> {
        match self {
            EnvelopeError::InvalidResponse { claim, .. } => *claim,
            _ => None,
        }
    }

    pub fn is_no_key_found(&self) -> bool {
        matches!(self, EnvelopeError::NoKeyFound { .. })
    }
}

impl From<ClaimViolation> for EnvelopeError {
    fn from(v: ClaimViolation) -> Self {
        EnvelopeError::InvalidResponse {
            claim: Some(v.claim()),
            reason: v.to_string(),
        }
    }
}

impl From<TokenError> for EnvelopeError {
    fn from(e: TokenError) -> Self {
        EnvelopeError::invalid_response(e.to_string())
    }
}

impl From<CipherError> for EnvelopeError {
    fn from(e: CipherError) -> Self {
        EnvelopeError::Cryptography(e.into())
    }
}

impl From<SigningError> for EnvelopeError {
    fn from(e: SigningError) -> Self {
        EnvelopeError::Cryptography(e.into())
    }
}

impl From<KeyError> for EnvelopeError {
    fn from(e: KeyError) -> Self {
        EnvelopeError::Cryptography(e.into())
    }
}
