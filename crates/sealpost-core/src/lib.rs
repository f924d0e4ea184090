//! sealpost core - key caching, envelope verification and webhook dispatch.
//!
//! This crate implements:
//! - Public key cache with single-flight refresh
//! - Envelope verification (signature, claims, key binding)
//! - Outbound envelope construction and the sealed call path
//! - Webhook verification and classification
//! - Error taxonomy and configuration

#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod context;
pub mod errors;
pub mod key_cache;
pub mod key_source;
pub mod outbound;
pub mod transport;
pub mod verifier;
pub mod webhook;

#[cfg(feature = "http")]
pub mod http;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, EnvelopeConfig, LoggingConfig};
pub use context::EnvelopeContext;
pub use errors::{CommunicationError, EnvelopeError};
pub use key_cache::{CachedKey, KeyLookup, PublicKeyCache};
pub use key_source::{KeyFetcher, KeyRecord, StaticKeySource};
pub use outbound::{OutboundBuilder, SealedRequest};
pub use transport::{
    header_value, EnvelopeClient, HeaderLookup, HttpKeyFetcher, HttpTransport, TransportRequest,
    TransportResponse, DEFAULT_TOKEN_HEADER,
};
pub use verifier::{EnvelopeVerifier, InboundCheck, OpenedEnvelope, VerifiedEnvelope};
pub use webhook::{
    AuthorizationReason, AuthorizationResponseType, AuthorizationResult, DeviceLinkCompletion,
    NotificationPayload, SessionEnd, WebhookDispatcher, WebhookStats, WebhookStatsSnapshot,
};

#[cfg(feature = "http")]
pub use http::ReqwestTransport;

pub use sealpost_crypto;
