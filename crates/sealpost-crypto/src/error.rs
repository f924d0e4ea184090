//! Umbrella error for cryptographic failures.

use crate::cipher::CipherError;
use crate::keystore::KeyError;
use crate::signer::SigningError;

/// Any failure of a cryptographic operation: signing, sealing, opening, or
/// the key material they use.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("decryption failed: {0}")]
    Decryption(String),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
}

impl From<CipherError> for CryptoError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::Encryption(msg) => CryptoError::Encryption(msg),
            CipherError::Decryption(msg) => CryptoError::Decryption(msg),
            CipherError::Key(e) => CryptoError::Key(e),
        }
    }
}

impl From<SigningError> for CryptoError {
    fn from(err: SigningError) -> Self {
        match err {
            SigningError::Key(e) => CryptoError::Key(e),
            other => CryptoError::Signing(other.to_string()),
        }
    }
}
