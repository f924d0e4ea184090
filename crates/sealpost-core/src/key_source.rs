//! Key-listing sources the cache refreshes from.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use sealpost_crypto::{EntityIdentifier, PublicKeyBundle};

use crate::errors::EnvelopeError;

/// One published public key of an entity, as listed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    pub key_id: String,
    /// base64url of `sign_pub || kex_pub`
    pub public_key: String,
    pub active: bool,
    /// Unix seconds
    pub created: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<u64>,
}

impl KeyRecord {
    pub fn from_bundle(bundle: &PublicKeyBundle, created: u64) -> Self {
        Self {
            key_id: bundle.key_id().to_string(),
            public_key: bundle.encode(),
            active: true,
            created,
            expires: None,
        }
    }

    pub fn expiring_at(mut self, expires: u64) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Lists the public keys of an entity.
///
/// `key_id` is a hint. Implementations may return the entity's whole key
/// set; the cache stores everything it receives.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    async fn fetch_keys(
        &self,
        entity: &EntityIdentifier,
        key_id: Option<&str>,
    ) -> Result<Vec<KeyRecord>, EnvelopeError>;
}

// ============================================================================
// In-memory source
// ============================================================================

/// Fixed key listing held in memory, for tests and offline tools.
#[derive(Default)]
pub struct StaticKeySource {
    keys: RwLock<HashMap<EntityIdentifier, Vec<KeyRecord>>>,
    failure: RwLock<Option<EnvelopeError>>,
    latency: Option<Duration>,
    fetches: AtomicUsize,
}

impl StaticKeySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch, to widen race windows in tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub async fn publish(&self, entity: EntityIdentifier, record: KeyRecord) {
        let mut keys = self.keys.write().await;
        let records = keys.entry(entity).or_default();
        records.retain(|r| r.key_id != record.key_id);
        records.push(record);
    }

    pub async fn revoke(&self, entity: &EntityIdentifier, key_id: &str) {
        let mut keys = self.keys.write().await;
        if let Some(records) = keys.get_mut(entity) {
            records.retain(|r| r.key_id != key_id);
        }
    }

    /// Make every subsequent fetch fail with `err` (or succeed again with `None`).
    pub async fn set_failure(&self, err: Option<EnvelopeError>) {
        *self.failure.write().await = err;
    }

    /// Number of fetches served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyFetcher for StaticKeySource {
    async fn fetch_keys(
        &self,
        entity: &EntityIdentifier,
        _key_id: Option<&str>,
    ) -> Result<Vec<KeyRecord>, EnvelopeError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = self.failure.read().await.clone() {
            return Err(err);
        }
        let keys = self.keys.read().await;
        Ok(keys.get(entity).cloned().unwrap_or_default())
    }
}
