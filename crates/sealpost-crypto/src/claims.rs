//! Token claims and their validation rules.

use serde::{Deserialize, Serialize};

use crate::entity::EntityIdentifier;
use crate::hash::{body_hash, digest_eq, BODY_HASH_FUNC};

/// Binds a token to one HTTP method and path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBinding {
    pub meth: String,
    pub path: String,
}

impl RequestBinding {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            meth: method.into().to_ascii_uppercase(),
            path: path.into(),
        }
    }
}

/// Digest of a body carried outside the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyDigest {
    pub hash: String,
    pub func: String,
}

impl BodyDigest {
    pub fn of(body: &[u8]) -> Self {
        Self {
            hash: body_hash(body),
            func: BODY_HASH_FUNC.to_string(),
        }
    }

    pub fn matches(&self, body: &[u8]) -> bool {
        self.func == BODY_HASH_FUNC && digest_eq(self.hash.as_bytes(), body_hash(body).as_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: EntityIdentifier,
    pub aud: EntityIdentifier,
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestBinding>,
    /// Embedded ciphertext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx: Option<String>,
    /// Digest of a detached ciphertext body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyDigest>,
}

/// Local verification policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimPolicy {
    /// Tolerance applied to both `iat` and `exp`. Zero means exact.
    pub clock_skew_secs: u64,
}

/// What the receiving side expects to find in the claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectations {
    pub audience: EntityIdentifier,
    pub issuer: Option<EntityIdentifier>,
    pub request: Option<RequestBinding>,
}

impl Expectations {
    pub fn for_audience(audience: EntityIdentifier) -> Self {
        Self {
            audience,
            issuer: None,
            request: None,
        }
    }

    pub fn with_issuer(mut self, issuer: EntityIdentifier) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn with_request(mut self, method: &str, path: &str) -> Self {
        self.request = Some(RequestBinding::new(method, path));
        self
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ClaimViolation {
    #[error("token expired at {exp} (now {now})")]
    Expired { exp: u64, now: u64 },
    #[error("token issued in the future at {iat} (now {now})")]
    NotYetValid { iat: u64, now: u64 },
    #[error("token lifetime is empty: iat {iat}, exp {exp}")]
    EmptyLifetime { iat: u64, exp: u64 },
    #[error("audience mismatch: expected {expected}, got {actual}")]
    AudienceMismatch {
        expected: EntityIdentifier,
        actual: EntityIdentifier,
    },
    #[error("issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        expected: EntityIdentifier,
        actual: EntityIdentifier,
    },
    #[error("token carries no request binding")]
    MissingRequestBinding,
    #[error("method mismatch: expected {expected}, got {actual}")]
    MethodMismatch { expected: String, actual: String },
    #[error("path mismatch: expected {expected}, got {actual}")]
    PathMismatch { expected: String, actual: String },
    #[error("body digest mismatch")]
    BodyMismatch,
    #[error("body digest declared but no body received")]
    MissingBody,
    #[error("body received but not bound by the token")]
    UnboundBody,
    #[error("token declares both embedded and detached content")]
    AmbiguousContent,
}

impl ClaimViolation {
    /// Name of the violated claim, for diagnostics.
    pub fn claim(&self) -> &'static str {
        match self {
            ClaimViolation::Expired { .. } => "exp",
            ClaimViolation::NotYetValid { .. } => "iat",
            ClaimViolation::EmptyLifetime { .. } => "exp",
            ClaimViolation::AudienceMismatch { .. } => "aud",
            ClaimViolation::IssuerMismatch { .. } => "iss",
            ClaimViolation::MissingRequestBinding => "request",
            ClaimViolation::MethodMismatch { .. } => "request.meth",
            ClaimViolation::PathMismatch { .. } => "request.path",
            ClaimViolation::BodyMismatch
            | ClaimViolation::MissingBody
            | ClaimViolation::UnboundBody => "body",
            ClaimViolation::AmbiguousContent => "ctx",
        }
    }
}

impl Claims {
    /// Check lifetime, audience, issuer and request binding against `now`.
    ///
    /// A token is valid while `iat - skew <= now < exp + skew`.
    pub fn validate(
        &self,
        expect: &Expectations,
        policy: &ClaimPolicy,
        now: u64,
    ) -> Result<(), ClaimViolation> {
        let skew = policy.clock_skew_secs;

        if self.exp <= self.iat {
            return Err(ClaimViolation::EmptyLifetime {
                iat: self.iat,
                exp: self.exp,
            });
        }
        if now >= self.exp.saturating_add(skew) {
            return Err(ClaimViolation::Expired { exp: self.exp, now });
        }
        if now.saturating_add(skew) < self.iat {
            return Err(ClaimViolation::NotYetValid { iat: self.iat, now });
        }

        if self.aud != expect.audience {
            return Err(ClaimViolation::AudienceMismatch {
                expected: expect.audience,
                actual: self.aud,
            });
        }
        self.check_issuer(expect)?;

        if let Some(expected) = &expect.request {
            let actual = self
                .request
                .as_ref()
                .ok_or(ClaimViolation::MissingRequestBinding)?;
            if !actual.meth.eq_ignore_ascii_case(&expected.meth) {
                return Err(ClaimViolation::MethodMismatch {
                    expected: expected.meth.clone(),
                    actual: actual.meth.clone(),
                });
            }
            if actual.path != expected.path {
                return Err(ClaimViolation::PathMismatch {
                    expected: expected.path.clone(),
                    actual: actual.path.clone(),
                });
            }
        }

        Ok(())
    }

    /// Issuer check on its own, usable before the signature is verified to
    /// refuse tokens from an unexpected principal without a key lookup.
    pub fn check_issuer(&self, expect: &Expectations) -> Result<(), ClaimViolation> {
        match expect.issuer {
            Some(expected) if expected != self.iss => Err(ClaimViolation::IssuerMismatch {
                expected,
                actual: self.iss,
            }),
            _ => Ok(()),
        }
    }

    /// Resolve the ciphertext this token authenticates.
    ///
    /// `detached` is the body received next to the token, if any. Returns
    /// `None` when the token carries no content and no body was received.
    pub fn bound_content<'a>(
        &'a self,
        detached: Option<&'a str>,
    ) -> Result<Option<&'a str>, ClaimViolation> {
        let detached = detached.filter(|b| !b.is_empty());
        match (&self.ctx, &self.body, detached) {
            (Some(_), Some(_), _) => Err(ClaimViolation::AmbiguousContent),
            (Some(_), None, Some(_)) => Err(ClaimViolation::UnboundBody),
            (Some(ctx), None, None) => Ok(Some(ctx.as_str())),
            (None, Some(digest), Some(body)) => {
                if digest.matches(body.as_bytes()) {
                    Ok(Some(body))
                } else {
                    Err(ClaimViolation::BodyMismatch)
                }
            }
            (None, Some(digest), None) => {
                if digest.matches(b"") {
                    Ok(None)
                } else {
                    Err(ClaimViolation::MissingBody)
                }
            }
            (None, None, Some(_)) => Err(ClaimViolation::UnboundBody),
            (None, None, None) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const NOW: u64 = 1_700_000_000;

    fn claims(iat: u64, exp: u64) -> (Claims, Expectations) {
        let iss = EntityIdentifier::organization(Uuid::new_v4());
        let aud = EntityIdentifier::service(Uuid::new_v4());
        let claims = Claims {
            iss,
            aud,
            sub: "subject".to_string(),
            iat,
            exp,
            jti: Uuid::new_v4().to_string(),
            request: Some(RequestBinding::new("post", "/webhook")),
            ctx: None,
            body: None,
        };
        (claims, Expectations::for_audience(aud).with_issuer(iss))
    }

    #[test]
    fn test_expiry_boundary_is_exact() {
        let policy = ClaimPolicy::default();

        let (c, e) = claims(NOW - 10, NOW);
        assert_eq!(
            c.validate(&e, &policy, NOW),
            Err(ClaimViolation::Expired { exp: NOW, now: NOW })
        );

        let (c, e) = claims(NOW - 10, NOW + 1);
        assert!(c.validate(&e, &policy, NOW).is_ok());
    }

    #[test]
    fn test_skew_boundary() {
        let policy = ClaimPolicy { clock_skew_secs: 5 };

        let (c, e) = claims(NOW - 60, NOW - 4);
        assert!(c.validate(&e, &policy, NOW).is_ok());

        let (c, e) = claims(NOW - 60, NOW - 5);
        assert!(matches!(
            c.validate(&e, &policy, NOW),
            Err(ClaimViolation::Expired { .. })
        ));

        let (c, e) = claims(NOW + 5, NOW + 60);
        assert!(c.validate(&e, &policy, NOW).is_ok());

        let (c, e) = claims(NOW + 6, NOW + 60);
        let err = c.validate(&e, &policy, NOW).unwrap_err();
        assert_eq!(err.claim(), "iat");
    }

    #[test]
    fn test_issued_at_now_is_valid() {
        let (c, e) = claims(NOW, NOW + 60);
        assert!(c.validate(&e, &ClaimPolicy::default(), NOW).is_ok());

        let (c, e) = claims(NOW + 1, NOW + 60);
        assert!(matches!(
            c.validate(&e, &ClaimPolicy::default(), NOW),
            Err(ClaimViolation::NotYetValid { .. })
        ));
    }

    #[test]
    fn test_audience_and_issuer_are_named() {
        let (c, e) = claims(NOW, NOW + 60);
        let other = EntityIdentifier::service(Uuid::new_v4());

        let wrong_aud = Expectations { audience: other, ..e.clone() };
        assert_eq!(
            c.validate(&wrong_aud, &ClaimPolicy::default(), NOW).unwrap_err().claim(),
            "aud"
        );

        let wrong_iss = e.clone().with_issuer(other);
        assert_eq!(
            c.validate(&wrong_iss, &ClaimPolicy::default(), NOW).unwrap_err().claim(),
            "iss"
        );

        let no_iss = Expectations::for_audience(c.aud);
        assert!(c.validate(&no_iss, &ClaimPolicy::default(), NOW).is_ok());
    }

    #[test]
    fn test_request_binding() {
        let (c, e) = claims(NOW, NOW + 60);
        let policy = ClaimPolicy::default();

        assert!(c.validate(&e.clone().with_request("POST", "/webhook"), &policy, NOW).is_ok());
        assert!(c.validate(&e.clone().with_request("post", "/webhook"), &policy, NOW).is_ok());
        assert_eq!(
            c.validate(&e.clone().with_request("GET", "/webhook"), &policy, NOW)
                .unwrap_err()
                .claim(),
            "request.meth"
        );
        assert_eq!(
            c.validate(&e.clone().with_request("POST", "/other"), &policy, NOW)
                .unwrap_err()
                .claim(),
            "request.path"
        );

        let mut unbound = c.clone();
        unbound.request = None;
        assert_eq!(
            unbound.validate(&e.clone().with_request("POST", "/webhook"), &policy, NOW),
            Err(ClaimViolation::MissingRequestBinding)
        );
        // legacy mode skips the binding
        assert!(unbound.validate(&e, &policy, NOW).is_ok());
    }

    #[test]
    fn test_bound_content() {
        let (mut c, _) = claims(NOW, NOW + 60);

        assert_eq!(c.bound_content(None), Ok(None));
        assert_eq!(c.bound_content(Some("")), Ok(None));
        assert_eq!(c.bound_content(Some("x")), Err(ClaimViolation::UnboundBody));

        c.ctx = Some("sealed".to_string());
        assert_eq!(c.bound_content(None), Ok(Some("sealed")));
        assert_eq!(c.bound_content(Some("x")), Err(ClaimViolation::UnboundBody));

        c.ctx = None;
        c.body = Some(BodyDigest::of(b"detached"));
        assert_eq!(c.bound_content(Some("detached")), Ok(Some("detached")));
        assert_eq!(c.bound_content(Some("detacheD")), Err(ClaimViolation::BodyMismatch));
        assert_eq!(c.bound_content(None), Err(ClaimViolation::MissingBody));

        c.body = Some(BodyDigest::of(b""));
        assert_eq!(c.bound_content(None), Ok(None));

        c.ctx = Some("sealed".to_string());
        assert_eq!(c.bound_content(None), Err(ClaimViolation::AmbiguousContent));
    }

    #[test]
    fn test_unknown_hash_function_never_matches() {
        let mut digest = BodyDigest::of(b"body");
        digest.func = "MD5".to_string();
        assert!(!digest.matches(b"body"));
    }
}
