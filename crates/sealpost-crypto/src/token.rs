//! Compact signed tokens.
//!
//! A token is `b64url(header) . b64url(claims) . b64url(signature)`. The
//! signature is Ed25519 over a transcript digest of the two leading
//! segments exactly as transmitted, so re-encoding is never needed to
//! verify.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::claims::Claims;
use crate::keystore::{KeyPair, PublicKeyBundle};
use crate::transcript::{Transcript, TOKEN_SIGNATURE_DOMAIN};

/// Signature algorithm. Local policy, never negotiated.
pub const TOKEN_ALGORITHM: &str = "EdDSA";
pub const TOKEN_TYPE: &str = "JWT";

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("token signed with key {token}, resolved key is {resolved}")]
    KeyMismatch { token: String, resolved: String },
    #[error("signature verification failed")]
    BadSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
    pub kid: String,
}

impl TokenHeader {
    fn for_key(key_id: &str) -> Self {
        Self {
            alg: TOKEN_ALGORITHM.to_string(),
            typ: TOKEN_TYPE.to_string(),
            kid: key_id.to_string(),
        }
    }
}

/// A signed token ready to be put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    compact_token: String,
    algorithm: &'static str,
}

impl Envelope {
    pub fn compact_token(&self) -> &str {
        &self.compact_token
    }

    pub fn algorithm(&self) -> &str {
        self.algorithm
    }

    pub fn into_compact_token(self) -> String {
        self.compact_token
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compact_token)
    }
}

fn signature_digest(header_segment: &str, claims_segment: &str) -> [u8; 32] {
    let mut t = Transcript::new(TOKEN_SIGNATURE_DOMAIN);
    t.append_bytes(1, header_segment.as_bytes());
    t.append_bytes(2, claims_segment.as_bytes());
    t.digest()
}

/// Serialize and sign `claims` with `pair`.
pub(crate) fn seal(pair: &KeyPair, claims: &Claims) -> Result<Envelope, serde_json::Error> {
    let header_segment = B64.encode(serde_json::to_vec(&TokenHeader::for_key(pair.key_id()))?);
    let claims_segment = B64.encode(serde_json::to_vec(claims)?);
    let sig = pair.sign(&signature_digest(&header_segment, &claims_segment));

    Ok(Envelope {
        compact_token: format!("{}.{}.{}", header_segment, claims_segment, B64.encode(sig)),
        algorithm: TOKEN_ALGORITHM,
    })
}

/// A parsed token whose signature has not been checked yet.
///
/// Claims may be read to decide which key to resolve, but must not be
/// trusted until [`UnverifiedToken::verify_signature`] succeeds.
#[derive(Debug, Clone)]
pub struct UnverifiedToken {
    header: TokenHeader,
    claims: Claims,
    digest: [u8; 32],
    signature: Vec<u8>,
}

impl UnverifiedToken {
    pub fn parse(token: &str) -> Result<Self, TokenError> {
        let segments: Vec<&str> = token.trim().split('.').collect();
        let &[header_segment, claims_segment, sig_segment] = segments.as_slice() else {
            return Err(TokenError::Malformed(format!(
                "expected 3 segments, got {}",
                segments.len()
            )));
        };

        let header_json = B64
            .decode(header_segment)
            .map_err(|_| TokenError::Malformed("header is not base64url".to_string()))?;
        let header: TokenHeader = serde_json::from_slice(&header_json)
            .map_err(|e| TokenError::Malformed(format!("header: {e}")))?;
        if header.alg != TOKEN_ALGORITHM {
            return Err(TokenError::UnsupportedAlgorithm(header.alg));
        }

        let claims_json = B64
            .decode(claims_segment)
            .map_err(|_| TokenError::Malformed("claims are not base64url".to_string()))?;
        let claims: Claims = serde_json::from_slice(&claims_json)
            .map_err(|e| TokenError::Malformed(format!("claims: {e}")))?;

        let signature = B64
            .decode(sig_segment)
            .map_err(|_| TokenError::Malformed("signature is not base64url".to_string()))?;

        Ok(Self {
            digest: signature_digest(header_segment, claims_segment),
            header,
            claims,
            signature,
        })
    }

    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    pub fn key_id(&self) -> &str {
        &self.header.kid
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Check the signature against `key`, which must be the key the header
    /// names.
    pub fn verify_signature(&self, key: &PublicKeyBundle) -> Result<(), TokenError> {
        if key.key_id() != self.header.kid {
            return Err(TokenError::KeyMismatch {
                token: self.header.kid.clone(),
                resolved: key.key_id().to_string(),
            });
        }
        if key.verify(&self.digest, &self.signature) {
            Ok(())
        } else {
            Err(TokenError::BadSignature)
        }
    }

    pub fn into_claims(self) -> Claims {
        self.claims
    }
}
