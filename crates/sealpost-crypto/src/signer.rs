//! Token issuance with the local key pair.

use std::sync::Arc;

use uuid::Uuid;

use crate::claims::{BodyDigest, Claims, RequestBinding};
use crate::entity::EntityIdentifier;
use crate::keystore::{KeyError, KeyStore};
use crate::token::{seal, Envelope};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("token lifetime must be positive and end before u64::MAX")]
    InvalidTtl,
    #[error("token serialization failed: {0}")]
    Serialization(String),
}

/// Who a token is from, who it is for and how long it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenScope {
    pub issuer: EntityIdentifier,
    pub audience: EntityIdentifier,
    pub subject: String,
    pub ttl_secs: u64,
}

impl TokenScope {
    pub fn new(
        issuer: EntityIdentifier,
        audience: EntityIdentifier,
        subject: impl Into<String>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            issuer,
            audience,
            subject: subject.into(),
            ttl_secs,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnvelopeSigner {
    keys: Arc<KeyStore>,
}

impl EnvelopeSigner {
    pub fn new(keys: Arc<KeyStore>) -> Self {
        Self { keys }
    }

    /// Issue a token carrying `payload` (normally ciphertext) in its
    /// `ctx` claim.
    pub fn sign(&self, payload: &str, scope: &TokenScope, now: u64) -> Result<Envelope, SigningError> {
        let mut claims = self.claims(scope, now)?;
        claims.ctx = Some(payload.to_string());
        self.finish(&claims)
    }

    /// Issue a token for a body sent next to it rather than inside it.
    ///
    /// The token carries the body's digest and, when given, the method and
    /// path the body is sent to.
    pub fn sign_detached(
        &self,
        body: Option<&str>,
        request: Option<RequestBinding>,
        scope: &TokenScope,
        now: u64,
    ) -> Result<Envelope, SigningError> {
        let mut claims = self.claims(scope, now)?;
        claims.request = request;
        claims.body = body.map(|b| BodyDigest::of(b.as_bytes()));
        self.finish(&claims)
    }

    fn claims(&self, scope: &TokenScope, now: u64) -> Result<Claims, SigningError> {
        if scope.ttl_secs == 0 {
            return Err(SigningError::InvalidTtl);
        }
        let exp = now.checked_add(scope.ttl_secs).ok_or(SigningError::InvalidTtl)?;
        Ok(Claims {
            iss: scope.issuer,
            aud: scope.audience,
            sub: scope.subject.clone(),
            iat: now,
            exp,
            jti: Uuid::new_v4().to_string(),
            request: None,
            ctx: None,
            body: None,
        })
    }

    fn finish(&self, claims: &Claims) -> Result<Envelope, SigningError> {
        let pair = self.keys.key_pair()?;
        seal(pair, claims).map_err(|e| SigningError::Serialization(e.to_string()))
    }
}
