#![forbid(unsafe_code)]

//! Cryptographic primitives for sealpost envelopes.
//!
//! Everything in this crate is synchronous and free of shared mutable
//! state. Key caching, refresh and the async verification flow live in
//! `sealpost-core`.

pub mod hash;
pub mod transcript;

pub mod entity;
pub mod keystore;

pub mod cipher;
pub mod claims;
pub mod token;
pub mod signer;

pub mod error;

#[cfg(test)]
mod proptests;

pub use cipher::{CipherError, PayloadCipher};
pub use claims::{BodyDigest, ClaimPolicy, ClaimViolation, Claims, Expectations, RequestBinding};
pub use entity::{EntityIdentifier, EntityKind, EntityParseError};
pub use error::CryptoError;
pub use keystore::{KeyError, KeyPair, KeyStore, PublicKeyBundle};
pub use signer::{EnvelopeSigner, SigningError, TokenScope};
pub use token::{Envelope, TokenError, TokenHeader, UnverifiedToken, TOKEN_ALGORITHM};
