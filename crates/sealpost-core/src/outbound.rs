//! Outbound envelope construction.

use std::sync::Arc;

use tracing::debug;

use sealpost_crypto::{
    EntityIdentifier, Envelope, EnvelopeSigner, PayloadCipher, RequestBinding, TokenScope,
};

use crate::clock::Clock;
use crate::errors::EnvelopeError;
use crate::key_cache::PublicKeyCache;

/// A request ready to send: the token for the header and the sealed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedRequest {
    pub envelope: Envelope,
    pub body: Option<String>,
}

/// Encrypts to a destination's current key and signs as the local identity.
#[derive(Clone)]
pub struct OutboundBuilder {
    local_identity: EntityIdentifier,
    signer: EnvelopeSigner,
    cipher: PayloadCipher,
    cache: Arc<PublicKeyCache>,
    clock: Arc<dyn Clock>,
}

impl OutboundBuilder {
    pub fn new(
        local_identity: EntityIdentifier,
        signer: EnvelopeSigner,
        cipher: PayloadCipher,
        cache: Arc<PublicKeyCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            local_identity,
            signer,
            cipher,
            cache,
            clock,
        }
    }

    pub fn local_identity(&self) -> EntityIdentifier {
        self.local_identity
    }

    fn scope(&self, destination: EntityIdentifier, ttl_secs: u64) -> TokenScope {
        TokenScope::new(
            self.local_identity,
            destination,
            self.local_identity.to_string(),
            ttl_secs,
        )
    }

    async fn seal_for(
        &self,
        plaintext: &[u8],
        destination: &EntityIdentifier,
        now: u64,
    ) -> Result<String, EnvelopeError> {
        let key = self.cache.require_current(destination, now).await?;
        debug!(destination = %destination, key_id = %key.key_id, "sealing payload");
        Ok(self.cipher.encrypt(plaintext, &key.material)?)
    }

    /// Seal `plaintext` for `destination` and embed it in a signed token.
    pub async fn build(
        &self,
        plaintext: &[u8],
        destination: EntityIdentifier,
        ttl_secs: u64,
    ) -> Result<Envelope, EnvelopeError> {
        let now = self.clock.now_secs();
        let ct = self.seal_for(plaintext, &destination, now).await?;
        Ok(self.signer.sign(&ct, &self.scope(destination, ttl_secs), now)?)
    }

    /// Seal an optional body for `destination` and sign a token bound to
    /// the body digest and the request line.
    pub async fn build_request(
        &self,
        method: &str,
        path: &str,
        plaintext: Option<&[u8]>,
        destination: EntityIdentifier,
        ttl_secs: u64,
    ) -> Result<SealedRequest, EnvelopeError> {
        let now = self.clock.now_secs();
        let body = match plaintext {
            Some(p) => Some(self.seal_for(p, &destination, now).await?),
            None => None,
        };
        let envelope = self.signer.sign_detached(
            body.as_deref(),
            Some(RequestBinding::new(method, path)),
            &self.scope(destination, ttl_secs),
            now,
        )?;
        Ok(SealedRequest { envelope, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::key_source::{KeyRecord, StaticKeySource};
    use sealpost_crypto::{CryptoError, KeyPair, KeyStore, UnverifiedToken};
    use uuid::Uuid;

    const NOW: u64 = 1_700_000_000;

    async fn builder_for(
        destination: EntityIdentifier,
        dest_pair: &KeyPair,
    ) -> (OutboundBuilder, Arc<StaticKeySource>) {
        let source = Arc::new(StaticKeySource::new());
        source
            .publish(destination, KeyRecord::from_bundle(&dest_pair.public_bundle(), 1))
            .await;
        let keys = Arc::new(KeyStore::new(KeyPair::generate()));
        let builder = OutboundBuilder::new(
            EntityIdentifier::service(Uuid::new_v4()),
            EnvelopeSigner::new(keys.clone()),
            PayloadCipher::new(keys),
            Arc::new(PublicKeyCache::new(source.clone())),
            Arc::new(FixedClock::new(NOW)),
        );
        (builder, source)
    }

    #[tokio::test]
    async fn test_build_seals_to_destination() {
        let destination = EntityIdentifier::organization(Uuid::new_v4());
        let dest_pair = KeyPair::generate();
        let (builder, _) = builder_for(destination, &dest_pair).await;

        let env = builder.build(b"hello", destination, 30).await.unwrap();
        let claims = UnverifiedToken::parse(env.compact_token()).unwrap().into_claims();
        assert_eq!(claims.iss, builder.local_identity());
        assert_eq!(claims.aud, destination);
        assert_eq!(claims.exp, NOW + 30);

        let dest_cipher = PayloadCipher::new(Arc::new(KeyStore::new(dest_pair)));
        assert_eq!(dest_cipher.decrypt(&claims.ctx.unwrap()).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_build_request_without_body() {
        let destination = EntityIdentifier::organization(Uuid::new_v4());
        let (builder, source) = builder_for(destination, &KeyPair::generate()).await;

        let sealed = builder
            .build_request("get", "/v3/ping", None, destination, 30)
            .await
            .unwrap();
        assert!(sealed.body.is_none());
        let claims = UnverifiedToken::parse(sealed.envelope.compact_token())
            .unwrap()
            .into_claims();
        assert_eq!(claims.request, Some(RequestBinding::new("GET", "/v3/ping")));
        assert!(claims.body.is_none());
        // no body means no destination key is needed
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_destination() {
        let destination = EntityIdentifier::organization(Uuid::new_v4());
        let (builder, _) = builder_for(destination, &KeyPair::generate()).await;
        let stranger = EntityIdentifier::directory(Uuid::new_v4());

        let err = builder.build(b"x", stranger, 30).await.unwrap_err();
        assert!(err.is_no_key_found());
    }

    #[tokio::test]
    async fn test_zero_ttl_is_signing_error() {
        let destination = EntityIdentifier::organization(Uuid::new_v4());
        let (builder, _) = builder_for(destination, &KeyPair::generate()).await;

        let err = builder.build(b"x", destination, 0).await.unwrap_err();
        assert!(matches!(
            err,
            EnvelopeError::Cryptography(CryptoError::Signing(_))
        ));
    }
}
