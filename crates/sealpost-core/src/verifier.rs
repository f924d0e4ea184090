//! Inbound envelope verification.
//!
//! A token moves through parse, key resolution, signature check and claim
//! validation before any ciphertext is released. Every rejection before
//! decryption is an `InvalidResponse` (or `NoKeyFound`); a failure to
//! decrypt an accepted envelope is a `Cryptography` error.

use std::sync::Arc;

use tracing::{debug, warn};

use sealpost_crypto::{
    ClaimPolicy, ClaimViolation, Claims, EntityIdentifier, Expectations, PayloadCipher,
    UnverifiedToken,
};

use crate::clock::Clock;
use crate::errors::EnvelopeError;
use crate::key_cache::{CachedKey, PublicKeyCache};

/// What the caller knows about the message being verified.
#[derive(Debug, Clone, Copy, Default)]
pub struct InboundCheck<'a> {
    /// Expected signer. Falls back to the verifier's default issuer.
    pub issuer: Option<EntityIdentifier>,
    /// `(method, path)` the token must be bound to
    pub request: Option<(&'a str, &'a str)>,
    /// Body received next to the token
    pub body: Option<&'a str>,
}

impl<'a> InboundCheck<'a> {
    pub fn from_issuer(issuer: EntityIdentifier) -> Self {
        Self {
            issuer: Some(issuer),
            ..Self::default()
        }
    }

    pub fn with_request(mut self, method: &'a str, path: &'a str) -> Self {
        self.request = Some((method, path));
        self
    }

    pub fn with_body(mut self, body: &'a str) -> Self {
        self.body = Some(body);
        self
    }
}

/// An accepted envelope whose content has not been decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedEnvelope {
    pub claims: Claims,
    pub key_id: String,
    /// Ciphertext authenticated by the token, if any
    pub content: Option<String>,
}

/// An accepted and decrypted envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedEnvelope {
    pub claims: Claims,
    pub key_id: String,
    /// `None` when the envelope carried no content
    pub plaintext: Option<Vec<u8>>,
}

#[derive(Clone)]
pub struct EnvelopeVerifier {
    local_identity: EntityIdentifier,
    cache: Arc<PublicKeyCache>,
    cipher: PayloadCipher,
    clock: Arc<dyn Clock>,
    policy: ClaimPolicy,
    default_issuer: Option<EntityIdentifier>,
}

impl EnvelopeVerifier {
    pub fn new(
        local_identity: EntityIdentifier,
        cache: Arc<PublicKeyCache>,
        cipher: PayloadCipher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            local_identity,
            cache,
            cipher,
            clock,
            policy: ClaimPolicy::default(),
            default_issuer: None,
        }
    }

    pub fn with_policy(mut self, policy: ClaimPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Issuer to expect when an [`InboundCheck`] names none.
    pub fn with_default_issuer(mut self, issuer: EntityIdentifier) -> Self {
        self.default_issuer = Some(issuer);
        self
    }

    pub fn default_issuer(&self) -> Option<EntityIdentifier> {
        self.default_issuer
    }

    pub fn local_identity(&self) -> EntityIdentifier {
        self.local_identity
    }

    pub fn cache(&self) -> &Arc<PublicKeyCache> {
        &self.cache
    }

    /// Authenticate `token` and release the ciphertext it covers.
    pub async fn verify(
        &self,
        token: &str,
        check: InboundCheck<'_>,
    ) -> Result<VerifiedEnvelope, EnvelopeError> {
        let now = self.clock.now_secs();

        let parsed = UnverifiedToken::parse(token).map_err(|e| {
            warn!(error = %e, "rejecting malformed token");
            EnvelopeError::from(e)
        })?;

        let mut expect = Expectations::for_audience(self.local_identity);
        if let Some(issuer) = check.issuer.or(self.default_issuer) {
            expect = expect.with_issuer(issuer);
        }
        if let Some((method, path)) = check.request {
            expect = expect.with_request(method, path);
        }

        // Refuse unexpected signers before spending a key fetch on them.
        parsed.claims().check_issuer(&expect).map_err(|v| {
            warn!(iss = %parsed.claims().iss, "token from unexpected issuer");
            EnvelopeError::from(v)
        })?;

        let issuer = parsed.claims().iss;
        let key = self.resolve_signer(&issuer, parsed.key_id(), now).await?;

        parsed.verify_signature(&key.material).map_err(|e| {
            warn!(iss = %issuer, key_id = %key.key_id, error = %e, "token signature rejected");
            EnvelopeError::from(e)
        })?;

        let claims = parsed.into_claims();
        claims.validate(&expect, &self.policy, now).map_err(|v| {
            warn!(iss = %issuer, claim = v.claim(), error = %v, "token claims rejected");
            EnvelopeError::from(v)
        })?;
        let content = claims
            .bound_content(check.body)
            .map_err(|v| {
                warn!(iss = %issuer, claim = v.claim(), error = %v, "token content rejected");
                EnvelopeError::from(v)
            })?
            .map(str::to_string);

        debug!(iss = %issuer, key_id = %key.key_id, jti = %claims.jti, "token accepted");
        Ok(VerifiedEnvelope {
            claims,
            key_id: key.key_id,
            content,
        })
    }

    /// Key for `(issuer, key_id)`. A key id that stays unknown for `issuer`
    /// but is held by another entity means the declared issuer was altered.
    async fn resolve_signer(
        &self,
        issuer: &EntityIdentifier,
        key_id: &str,
        now: u64,
    ) -> Result<CachedKey, EnvelopeError> {
        match self.cache.require(issuer, key_id, now).await {
            Err(e) if e.is_no_key_found() => match self.cache.holder_of(key_id, issuer) {
                Some(holder) => {
                    warn!(iss = %issuer, holder = %holder, key_id = %key_id, "signing key belongs to another entity");
                    Err(ClaimViolation::IssuerMismatch {
                        expected: holder,
                        actual: *issuer,
                    }
                    .into())
                }
                None => Err(e),
            },
            other => other,
        }
    }

    /// [`verify`](Self::verify), then decrypt the released ciphertext.
    pub async fn open(
        &self,
        token: &str,
        check: InboundCheck<'_>,
    ) -> Result<OpenedEnvelope, EnvelopeError> {
        let verified = self.verify(token, check).await?;
        let plaintext = match verified.content.as_deref() {
            Some(ct) => Some(self.cipher.decrypt(ct).map_err(|e| {
                warn!(iss = %verified.claims.iss, error = %e, "payload decryption failed");
                EnvelopeError::from(e)
            })?),
            None => None,
        };
        Ok(OpenedEnvelope {
            claims: verified.claims,
            key_id: verified.key_id,
            plaintext,
        })
    }
}
