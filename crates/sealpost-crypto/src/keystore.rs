//! Key material for the local principal and its counterparties.
//!
//! [`KeyPair`] is the caller's own Ed25519 signing key plus X25519
//! key-agreement secret. It never leaves the process: `Debug` is redacted
//! and the on-disk [`KeyFile`] is zeroized when dropped. [`PublicKeyBundle`]
//! is the public half, which is what counterparties publish and what the
//! key cache stores.

use std::fmt;
use std::path::Path;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::hash::fingerprint;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("no private key loaded")]
    Absent,
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid key encoding: {0}")]
    InvalidEncoding(String),
    #[error("key id {declared} does not match key material ({computed})")]
    KeyIdMismatch { declared: String, computed: String },
    #[error("key file error: {0}")]
    File(String),
}

fn to_array32(bytes: &[u8]) -> Result<[u8; 32], KeyError> {
    bytes.try_into().map_err(|_| KeyError::InvalidKeyLength {
        expected: 32,
        got: bytes.len(),
    })
}

/// Public key material of one principal key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKeyBundle {
    key_id: String,
    sign_pub: [u8; 32],
    kex_pub: [u8; 32],
}

impl PublicKeyBundle {
    /// Build a bundle from raw key bytes, deriving the key id.
    ///
    /// The signing key must be a valid Ed25519 point.
    pub fn from_parts(sign_pub: &[u8], kex_pub: &[u8]) -> Result<Self, KeyError> {
        let sign_pub = to_array32(sign_pub)?;
        let kex_pub = to_array32(kex_pub)?;
        VerifyingKey::from_bytes(&sign_pub).map_err(|_| KeyError::InvalidPublicKey)?;

        let mut material = [0u8; 64];
        material[..32].copy_from_slice(&sign_pub);
        material[32..].copy_from_slice(&kex_pub);

        Ok(Self {
            key_id: fingerprint(&material),
            sign_pub,
            kex_pub,
        })
    }

    /// Decode published material and check that it matches the declared key id.
    pub fn from_encoded(key_id: &str, encoded: &str) -> Result<Self, KeyError> {
        let raw = B64
            .decode(encoded)
            .map_err(|e| KeyError::InvalidEncoding(e.to_string()))?;
        if raw.len() != 64 {
            return Err(KeyError::InvalidKeyLength {
                expected: 64,
                got: raw.len(),
            });
        }
        let bundle = Self::from_parts(&raw[..32], &raw[32..])?;
        if bundle.key_id != key_id {
            return Err(KeyError::KeyIdMismatch {
                declared: key_id.to_string(),
                computed: bundle.key_id,
            });
        }
        Ok(bundle)
    }

    /// base64url(sign_pub || kex_pub)
    pub fn encode(&self) -> String {
        let mut material = [0u8; 64];
        material[..32].copy_from_slice(&self.sign_pub);
        material[32..].copy_from_slice(&self.kex_pub);
        B64.encode(material)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn sign_pub(&self) -> &[u8; 32] {
        &self.sign_pub
    }

    pub fn kex_pub(&self) -> &[u8; 32] {
        &self.kex_pub
    }

    /// Verify an Ed25519 signature made with the matching private key.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(vk) = VerifyingKey::from_bytes(&self.sign_pub) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
            return false;
        };
        vk.verify_strict(message, &Signature::from_bytes(&sig_bytes)).is_ok()
    }
}

impl fmt::Debug for PublicKeyBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKeyBundle")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// The caller's private key pair.
pub struct KeyPair {
    key_id: String,
    sign_key: SigningKey,
    kex_key: StaticSecret,
}

impl KeyPair {
    pub fn generate() -> Self {
        let sign_key = SigningKey::generate(&mut OsRng);
        let kex_key = StaticSecret::random_from_rng(OsRng);
        Self::from_keys(sign_key, kex_key)
    }

    /// `sign_seed` is the 32-byte Ed25519 seed, `kex_secret` the 32-byte
    /// X25519 scalar.
    pub fn from_bytes(sign_seed: &[u8; 32], kex_secret: &[u8; 32]) -> Self {
        Self::from_keys(SigningKey::from_bytes(sign_seed), StaticSecret::from(*kex_secret))
    }

    fn from_keys(sign_key: SigningKey, kex_key: StaticSecret) -> Self {
        let mut material = [0u8; 64];
        material[..32].copy_from_slice(&sign_key.verifying_key().to_bytes());
        material[32..].copy_from_slice(X25519PublicKey::from(&kex_key).as_bytes());
        Self {
            key_id: fingerprint(&material),
            sign_key,
            kex_key,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn public_bundle(&self) -> PublicKeyBundle {
        PublicKeyBundle {
            key_id: self.key_id.clone(),
            sign_pub: self.sign_key.verifying_key().to_bytes(),
            kex_pub: *X25519PublicKey::from(&self.kex_key).as_bytes(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.sign_key.sign(message).to_bytes()
    }

    pub(crate) fn kex_secret(&self) -> &StaticSecret {
        &self.kex_key
    }

    pub fn to_key_file(&self) -> KeyFile {
        KeyFile {
            key_id: self.key_id.clone(),
            sign_seed: hex::encode(self.sign_key.to_bytes()),
            kex_secret: hex::encode(self.kex_key.to_bytes()),
        }
    }

    pub fn from_key_file(file: &KeyFile) -> Result<Self, KeyError> {
        let sign_seed = Zeroizing::new(
            hex::decode(&file.sign_seed).map_err(|e| KeyError::InvalidEncoding(e.to_string()))?,
        );
        let kex_secret = Zeroizing::new(
            hex::decode(&file.kex_secret).map_err(|e| KeyError::InvalidEncoding(e.to_string()))?,
        );
        let sign_seed = Zeroizing::new(to_array32(&sign_seed)?);
        let kex_secret = Zeroizing::new(to_array32(&kex_secret)?);

        let pair = Self::from_bytes(&sign_seed, &kex_secret);
        if pair.key_id != file.key_id {
            return Err(KeyError::KeyIdMismatch {
                declared: file.key_id.clone(),
                computed: pair.key_id,
            });
        }
        Ok(pair)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// On-disk JSON form of a [`KeyPair`], hex encoded.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyFile {
    pub key_id: String,
    pub sign_seed: String,
    pub kex_secret: String,
}

/// Holder of the local key pair, shared read-only after startup.
#[derive(Debug, Default)]
pub struct KeyStore {
    pair: Option<KeyPair>,
}

impl KeyStore {
    pub fn new(pair: KeyPair) -> Self {
        Self { pair: Some(pair) }
    }

    pub fn empty() -> Self {
        Self { pair: None }
    }

    /// Load a JSON key file written by [`KeyStore::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let content = Zeroizing::new(
            std::fs::read_to_string(path.as_ref()).map_err(|e| KeyError::File(e.to_string()))?,
        );
        let file: KeyFile =
            serde_json::from_str(&content).map_err(|e| KeyError::File(e.to_string()))?;
        Ok(Self::new(KeyPair::from_key_file(&file)?))
    }

    pub fn save(pair: &KeyPair, path: impl AsRef<Path>) -> Result<(), KeyError> {
        let file = pair.to_key_file();
        let json = Zeroizing::new(
            serde_json::to_string_pretty(&file).map_err(|e| KeyError::File(e.to_string()))?,
        );
        std::fs::write(path.as_ref(), json.as_bytes()).map_err(|e| KeyError::File(e.to_string()))
    }

    pub fn key_pair(&self) -> Result<&KeyPair, KeyError> {
        self.pair.as_ref().ok_or(KeyError::Absent)
    }

    pub fn key_id(&self) -> Option<&str> {
        self.pair.as_ref().map(KeyPair::key_id)
    }

    pub fn is_loaded(&self) -> bool {
        self.pair.is_some()
    }
}
