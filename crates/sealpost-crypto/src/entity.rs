//! Typed principal identifiers.
//!
//! An entity is written as `<kind>:<uuid>`, e.g. `svc:6f6e0a5c-...`. The
//! same text form is used in claims, configuration and cache keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum EntityParseError {
    #[error("missing kind prefix in entity identifier: {0}")]
    MissingPrefix(String),
    #[error("unknown entity kind: {0}")]
    UnknownKind(String),
    #[error("invalid entity id: {0}")]
    InvalidId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Organization,
    Directory,
    Service,
}

impl EntityKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityKind::Organization => "org",
            EntityKind::Directory => "dir",
            EntityKind::Service => "svc",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "org" => Some(EntityKind::Organization),
            "dir" => Some(EntityKind::Directory),
            "svc" => Some(EntityKind::Service),
            _ => None,
        }
    }
}

/// Who signed a message, or who should be able to decrypt it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityIdentifier {
    kind: EntityKind,
    id: Uuid,
}

impl EntityIdentifier {
    pub fn new(kind: EntityKind, id: Uuid) -> Self {
        Self { kind, id }
    }

    pub fn organization(id: Uuid) -> Self {
        Self::new(EntityKind::Organization, id)
    }

    pub fn directory(id: Uuid) -> Self {
        Self::new(EntityKind::Directory, id)
    }

    pub fn service(id: Uuid) -> Self {
        Self::new(EntityKind::Service, id)
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for EntityIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.prefix(), self.id)
    }
}

impl FromStr for EntityIdentifier {
    type Err = EntityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, id) = s
            .split_once(':')
            .ok_or_else(|| EntityParseError::MissingPrefix(s.to_string()))?;
        let kind = EntityKind::from_prefix(prefix)
            .ok_or_else(|| EntityParseError::UnknownKind(prefix.to_string()))?;
        let id = Uuid::parse_str(id).map_err(|_| EntityParseError::InvalidId(id.to_string()))?;
        Ok(Self { kind, id })
    }
}

impl Serialize for EntityIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
