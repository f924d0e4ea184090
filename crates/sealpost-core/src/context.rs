//! Wiring of the shared pieces one principal needs.

use std::sync::Arc;

use sealpost_crypto::{ClaimPolicy, EntityIdentifier, EnvelopeSigner, KeyStore, PayloadCipher};

use crate::clock::Clock;
use crate::key_cache::PublicKeyCache;
use crate::key_source::KeyFetcher;
use crate::outbound::OutboundBuilder;
use crate::verifier::EnvelopeVerifier;
use crate::webhook::WebhookDispatcher;

/// Local identity, key store, key cache and clock, shared by every
/// builder, verifier and dispatcher made from it.
#[derive(Clone)]
pub struct EnvelopeContext {
    local_identity: EntityIdentifier,
    keys: Arc<KeyStore>,
    cache: Arc<PublicKeyCache>,
    clock: Arc<dyn Clock>,
    policy: ClaimPolicy,
    counterparty: Option<EntityIdentifier>,
}

impl EnvelopeContext {
    pub fn new(
        local_identity: EntityIdentifier,
        keys: Arc<KeyStore>,
        fetcher: Arc<dyn KeyFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            local_identity,
            keys,
            cache: Arc::new(PublicKeyCache::new(fetcher)),
            clock,
            policy: ClaimPolicy::default(),
            counterparty: None,
        }
    }

    /// Expect `counterparty` as the issuer of everything verified through
    /// this context unless a check names another one.
    pub fn with_counterparty(mut self, counterparty: EntityIdentifier) -> Self {
        self.counterparty = Some(counterparty);
        self
    }

    pub fn counterparty(&self) -> Option<EntityIdentifier> {
        self.counterparty
    }

    pub fn with_policy(mut self, policy: ClaimPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn local_identity(&self) -> EntityIdentifier {
        self.local_identity
    }

    pub fn cache(&self) -> &Arc<PublicKeyCache> {
        &self.cache
    }

    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    pub fn verifier(&self) -> EnvelopeVerifier {
        let verifier = EnvelopeVerifier::new(
            self.local_identity,
            self.cache.clone(),
            PayloadCipher::new(self.keys.clone()),
            self.clock.clone(),
        )
        .with_policy(self.policy);
        match self.counterparty {
            Some(counterparty) => verifier.with_default_issuer(counterparty),
            None => verifier,
        }
    }

    pub fn outbound(&self) -> OutboundBuilder {
        OutboundBuilder::new(
            self.local_identity,
            EnvelopeSigner::new(self.keys.clone()),
            PayloadCipher::new(self.keys.clone()),
            self.cache.clone(),
            self.clock.clone(),
        )
    }

    /// Dispatcher over [`verifier`](Self::verifier), so it inherits the
    /// counterparty as expected issuer.
    pub fn webhook_dispatcher(&self) -> WebhookDispatcher {
        WebhookDispatcher::new(self.verifier())
    }
}
