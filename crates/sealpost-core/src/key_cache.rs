//! Public key cache with single-flight refresh.
//!
//! Entries live in a sharded map so lookups of different keys never contend.
//! A miss triggers one fetch from the injected [`KeyFetcher`]; concurrent
//! misses for the same `(entity, key id)` wait on a shared
//! [`tokio::sync::OnceCell`] and all observe the same outcome.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use sealpost_crypto::{EntityIdentifier, KeyError, PublicKeyBundle};

use crate::errors::EnvelopeError;
use crate::key_source::{KeyFetcher, KeyRecord};

/// A counterparty public key as held by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedKey {
    pub entity: EntityIdentifier,
    pub key_id: String,
    pub material: PublicKeyBundle,
    pub active: bool,
    pub created: u64,
    pub expires_at: Option<u64>,
}

impl CachedKey {
    /// Decode a listed record. The record's key id must match its material.
    pub fn from_record(entity: EntityIdentifier, record: &KeyRecord) -> Result<Self, KeyError> {
        let material = PublicKeyBundle::from_encoded(&record.key_id, &record.public_key)?;
        Ok(Self {
            entity,
            key_id: record.key_id.clone(),
            material,
            active: record.active,
            created: record.created,
            expires_at: record.expires,
        })
    }

    /// Active and not past its expiry.
    pub fn is_usable(&self, now: u64) -> bool {
        self.active && self.expires_at.map_or(true, |exp| now < exp)
    }
}

/// Outcome of a cache resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLookup {
    /// Served from the cache without I/O
    Hit(CachedKey),
    /// Found after refreshing from the key source
    Refreshed(CachedKey),
    /// Still absent after one refresh
    Missing,
}

impl KeyLookup {
    pub fn key(&self) -> Option<&CachedKey> {
        match self {
            KeyLookup::Hit(k) | KeyLookup::Refreshed(k) => Some(k),
            KeyLookup::Missing => None,
        }
    }

    pub fn into_key(self) -> Option<CachedKey> {
        match self {
            KeyLookup::Hit(k) | KeyLookup::Refreshed(k) => Some(k),
            KeyLookup::Missing => None,
        }
    }
}

type EntryKey = (EntityIdentifier, String);
type FlightKey = (EntityIdentifier, Option<String>);
type Flight = Arc<OnceCell<Result<Option<CachedKey>, EnvelopeError>>>;

pub struct PublicKeyCache {
    entries: DashMap<EntryKey, CachedKey>,
    in_flight: DashMap<FlightKey, Flight>,
    fetcher: Arc<dyn KeyFetcher>,
}

impl fmt::Debug for PublicKeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKeyCache")
            .field("entries", &self.entries.len())
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl PublicKeyCache {
    pub fn new(fetcher: Arc<dyn KeyFetcher>) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            fetcher,
        }
    }

    /// Pure lookup; never fetches and ignores staleness.
    pub fn get(&self, entity: &EntityIdentifier, key_id: &str) -> Option<CachedKey> {
        self.entries
            .get(&(*entity, key_id.to_string()))
            .map(|e| e.value().clone())
    }

    /// Insert or replace. Last write wins.
    pub fn put(&self, key: CachedKey) {
        self.entries.insert((key.entity, key.key_id.clone()), key);
    }

    pub fn invalidate(&self, entity: &EntityIdentifier, key_id: &str) -> Option<CachedKey> {
        self.entries
            .remove(&(*entity, key_id.to_string()))
            .map(|(_, k)| k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// An entity other than `except` holding `key_id`, without I/O.
    pub fn holder_of(&self, key_id: &str, except: &EntityIdentifier) -> Option<EntityIdentifier> {
        self.entries
            .iter()
            .find(|e| e.key().1 == key_id && e.key().0 != *except)
            .map(|e| e.key().0)
    }

    /// Newest usable cached key of `entity`, without I/O.
    pub fn current_for(&self, entity: &EntityIdentifier, now: u64) -> Option<CachedKey> {
        self.entries
            .iter()
            .filter(|e| e.key().0 == *entity && e.value().is_usable(now))
            .max_by(|a, b| {
                (a.value().created, &a.value().key_id).cmp(&(b.value().created, &b.value().key_id))
            })
            .map(|e| e.value().clone())
    }

    /// Resolve a specific key, refreshing at most once.
    pub async fn resolve(
        &self,
        entity: &EntityIdentifier,
        key_id: &str,
        now: u64,
    ) -> Result<KeyLookup, EnvelopeError> {
        if let Some(key) = self.get(entity, key_id) {
            if key.is_usable(now) {
                return Ok(KeyLookup::Hit(key));
            }
            warn!(entity = %entity, key_id = %key_id, active = key.active, "cached key is stale, invalidating");
            self.invalidate(entity, key_id);
        }

        let refreshed = self.refresh(entity, Some(key_id), now).await?;
        Ok(refreshed.map_or(KeyLookup::Missing, KeyLookup::Refreshed))
    }

    /// Resolve any current key of `entity`, refreshing at most once.
    pub async fn resolve_current(
        &self,
        entity: &EntityIdentifier,
        now: u64,
    ) -> Result<KeyLookup, EnvelopeError> {
        if let Some(key) = self.current_for(entity, now) {
            return Ok(KeyLookup::Hit(key));
        }
        let refreshed = self.refresh(entity, None, now).await?;
        Ok(refreshed.map_or(KeyLookup::Missing, KeyLookup::Refreshed))
    }

    /// [`resolve`](Self::resolve), with `Missing` mapped to `NoKeyFound`.
    pub async fn require(
        &self,
        entity: &EntityIdentifier,
        key_id: &str,
        now: u64,
    ) -> Result<CachedKey, EnvelopeError> {
        self.resolve(entity, key_id, now)
            .await?
            .into_key()
            .ok_or_else(|| EnvelopeError::NoKeyFound {
                entity: *entity,
                key_id: Some(key_id.to_string()),
            })
    }

    /// [`resolve_current`](Self::resolve_current), with `Missing` mapped to
    /// `NoKeyFound`.
    pub async fn require_current(
        &self,
        entity: &EntityIdentifier,
        now: u64,
    ) -> Result<CachedKey, EnvelopeError> {
        self.resolve_current(entity, now)
            .await?
            .into_key()
            .ok_or(EnvelopeError::NoKeyFound {
                entity: *entity,
                key_id: None,
            })
    }

    fn lookup(&self, entity: &EntityIdentifier, key_id: Option<&str>, now: u64) -> Option<CachedKey> {
        match key_id {
            Some(id) => self.get(entity, id).filter(|k| k.is_usable(now)),
            None => self.current_for(entity, now),
        }
    }

    async fn refresh(
        &self,
        entity: &EntityIdentifier,
        key_id: Option<&str>,
        now: u64,
    ) -> Result<Option<CachedKey>, EnvelopeError> {
        let flight_key: FlightKey = (*entity, key_id.map(str::to_string));
        // The map guard must be released before awaiting.
        let flight = self
            .in_flight
            .entry(flight_key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        let outcome = flight
            .get_or_init(|| async {
                // An earlier flight may have landed between our miss and now.
                if let Some(key) = self.lookup(entity, key_id, now) {
                    return Ok(Some(key));
                }
                self.fetch_and_store(entity, key_id, now).await
            })
            .await
            .clone();

        self.in_flight
            .remove_if(&flight_key, |_, current| Arc::ptr_eq(current, &flight));
        outcome
    }

    async fn fetch_and_store(
        &self,
        entity: &EntityIdentifier,
        key_id: Option<&str>,
        now: u64,
    ) -> Result<Option<CachedKey>, EnvelopeError> {
        debug!(entity = %entity, key_id = ?key_id, "refreshing public keys");
        let records = self.fetcher.fetch_keys(entity, key_id).await.map_err(|e| {
            warn!(entity = %entity, error = %e, "key refresh failed");
            e
        })?;

        let mut stored = 0usize;
        for record in &records {
            match CachedKey::from_record(*entity, record) {
                Ok(key) => {
                    self.put(key);
                    stored += 1;
                }
                Err(e) => {
                    warn!(entity = %entity, key_id = %record.key_id, error = %e, "discarding malformed key record");
                }
            }
        }
        info!(entity = %entity, listed = records.len(), stored, "public keys refreshed");

        Ok(self.lookup(entity, key_id, now))
    }
}
