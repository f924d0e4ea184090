//! Hybrid payload encryption.
//!
//! Sealed-box construction using X25519 + HKDF-SHA256 + ChaCha20Poly1305: a
//! fresh ephemeral X25519 key agrees a secret with the recipient's published
//! kex key, HKDF turns it into a content key and nonce, and the body is
//! sealed under that key. The output is a compact dotted string:
//!
//! `b64url(header) . b64url(epk) . b64url(salt) . b64url(ciphertext || tag)`

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, SharedSecret};
use zeroize::Zeroizing;

use crate::keystore::{KeyError, KeyStore, PublicKeyBundle};
use crate::transcript::{Transcript, PAYLOAD_AAD_DOMAIN};

/// Key management algorithm. Local policy, never negotiated.
pub const PAYLOAD_ALGORITHM: &str = "ECDH-ES+HKDF-SHA256";
/// Content encryption algorithm.
pub const PAYLOAD_ENCRYPTION: &str = "C20P";

const PAYLOAD_FORMAT_VERSION: u64 = 1;
const SALT_LEN: usize = 24;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("decryption failed: {0}")]
    Decryption(String),
    #[error(transparent)]
    Key(#[from] KeyError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct PayloadHeader {
    alg: String,
    enc: String,
    kid: String,
}

fn payload_aad(header_segment: &str, epk: &[u8], salt: &[u8]) -> Vec<u8> {
    let mut t = Transcript::new(PAYLOAD_AAD_DOMAIN);
    t.append_u64(1, PAYLOAD_FORMAT_VERSION);
    t.append_bytes(2, header_segment.as_bytes());
    t.append_bytes(3, epk);
    t.append_bytes(4, salt);
    t.as_bytes().to_vec()
}

fn derive_content_key(
    shared: &SharedSecret,
    salt: &[u8],
) -> Result<(Zeroizing<[u8; 32]>, [u8; 12]), String> {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared.as_bytes());

    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(b"sealpost_payload_v1_key", &mut key[..])
        .map_err(|e| e.to_string())?;

    let mut nonce = [0u8; 12];
    hk.expand(b"sealpost_payload_v1_nonce", &mut nonce)
        .map_err(|e| e.to_string())?;

    Ok((key, nonce))
}

fn decode_segment(segment: &str, name: &str) -> Result<Vec<u8>, CipherError> {
    B64.decode(segment)
        .map_err(|_| CipherError::Decryption(format!("malformed {name} segment")))
}

/// Encrypts bodies for counterparties and decrypts bodies sent to us.
#[derive(Debug, Clone)]
pub struct PayloadCipher {
    keys: Arc<KeyStore>,
}

impl PayloadCipher {
    pub fn new(keys: Arc<KeyStore>) -> Self {
        Self { keys }
    }

    /// Seal `plaintext` to `recipient`.
    ///
    /// Only the recipient's public material is read; the local key store is
    /// not needed for encryption.
    pub fn encrypt(&self, plaintext: &[u8], recipient: &PublicKeyBundle) -> Result<String, CipherError> {
        let header = PayloadHeader {
            alg: PAYLOAD_ALGORITHM.to_string(),
            enc: PAYLOAD_ENCRYPTION.to_string(),
            kid: recipient.key_id().to_string(),
        };
        let header_json =
            serde_json::to_vec(&header).map_err(|e| CipherError::Encryption(e.to_string()))?;
        let header_segment = B64.encode(header_json);

        let mut salt = [0u8; SALT_LEN];
        getrandom::getrandom(&mut salt)
            .map_err(|e| CipherError::Encryption(format!("rng failure: {e}")))?;

        let eph = EphemeralSecret::random_from_rng(OsRng);
        let eph_pub = X25519PublicKey::from(&eph);
        let shared = eph.diffie_hellman(&X25519PublicKey::from(*recipient.kex_pub()));
        if !shared.was_contributory() {
            return Err(CipherError::Encryption(
                "recipient key is a low-order point".to_string(),
            ));
        }

        let (key, nonce) = derive_content_key(&shared, &salt).map_err(CipherError::Encryption)?;
        let aad = payload_aad(&header_segment, eph_pub.as_bytes(), &salt);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let ct = cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: &aad })
            .map_err(|_| CipherError::Encryption("aead seal failed".to_string()))?;

        Ok(format!(
            "{}.{}.{}.{}",
            header_segment,
            B64.encode(eph_pub.as_bytes()),
            B64.encode(salt),
            B64.encode(ct)
        ))
    }

    /// Open a payload sealed to the local key pair.
    pub fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, CipherError> {
        let pair = self.keys.key_pair()?;

        let segments: Vec<&str> = ciphertext.trim().split('.').collect();
        let &[header_segment, epk_segment, salt_segment, ct_segment] = segments.as_slice() else {
            return Err(CipherError::Decryption(format!(
                "expected 4 segments, got {}",
                segments.len()
            )));
        };

        let header: PayloadHeader = serde_json::from_slice(&decode_segment(header_segment, "header")?)
            .map_err(|_| CipherError::Decryption("malformed header".to_string()))?;
        if header.alg != PAYLOAD_ALGORITHM || header.enc != PAYLOAD_ENCRYPTION {
            return Err(CipherError::Decryption(format!(
                "unsupported algorithm {}/{}",
                header.alg, header.enc
            )));
        }
        if header.kid != pair.key_id() {
            return Err(CipherError::Decryption(format!(
                "payload sealed to key {}, local key is {}",
                header.kid,
                pair.key_id()
            )));
        }

        let epk: [u8; 32] = decode_segment(epk_segment, "epk")?
            .as_slice()
            .try_into()
            .map_err(|_| CipherError::Decryption("ephemeral key must be 32 bytes".to_string()))?;
        let salt = decode_segment(salt_segment, "salt")?;
        if salt.len() != SALT_LEN {
            return Err(CipherError::Decryption("bad salt length".to_string()));
        }
        let ct = decode_segment(ct_segment, "ciphertext")?;

        let shared = pair.kex_secret().diffie_hellman(&X25519PublicKey::from(epk));
        if !shared.was_contributory() {
            return Err(CipherError::Decryption(
                "ephemeral key is a low-order point".to_string(),
            ));
        }
        let (key, nonce) = derive_content_key(&shared, &salt).map_err(CipherError::Decryption)?;
        let aad = payload_aad(header_segment, &epk, &salt);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        cipher
            .decrypt(Nonce::from_slice(&nonce), Payload { msg: &ct, aad: &aad })
            .map_err(|_| CipherError::Decryption("integrity check failed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::KeyPair;

    fn cipher_with_key() -> (PayloadCipher, PublicKeyBundle) {
        let pair = KeyPair::generate();
        let bundle = pair.public_bundle();
        (PayloadCipher::new(Arc::new(KeyStore::new(pair))), bundle)
    }

    fn flip_ciphertext_bit(sealed: &str, byte: usize) -> String {
        let mut parts: Vec<String> = sealed.split('.').map(str::to_string).collect();
        let mut ct = B64.decode(&parts[3]).unwrap();
        let idx = byte % ct.len();
        ct[idx] ^= 0x01;
        parts[3] = B64.encode(ct);
        parts.join(".")
    }

    #[test]
    fn test_payload_round_trip() {
        let (cipher, bundle) = cipher_with_key();
        let plaintext = br#"{"test": "response"}"#;

        let sealed = cipher.encrypt(plaintext, &bundle).unwrap();
        assert_eq!(sealed.split('.').count(), 4);

        let opened = cipher.decrypt(&sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_each_seal_is_fresh() {
        let (cipher, bundle) = cipher_with_key();
        let a = cipher.encrypt(b"same", &bundle).unwrap();
        let b = cipher.encrypt(b"same", &bundle).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_plaintext() {
        let (cipher, bundle) = cipher_with_key();
        let sealed = cipher.encrypt(b"", &bundle).unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap(), b"");
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let (cipher, bundle) = cipher_with_key();
        let sealed = cipher.encrypt(b"attack at dawn", &bundle).unwrap();

        for byte in 0..30 {
            let tampered = flip_ciphertext_bit(&sealed, byte);
            assert!(matches!(cipher.decrypt(&tampered), Err(CipherError::Decryption(_))));
        }
    }

    #[test]
    fn test_tampered_salt_fails() {
        let (cipher, bundle) = cipher_with_key();
        let sealed = cipher.encrypt(b"payload", &bundle).unwrap();
        let mut parts: Vec<String> = sealed.split('.').map(str::to_string).collect();
        let mut salt = B64.decode(&parts[2]).unwrap();
        salt[0] ^= 0x80;
        parts[2] = B64.encode(salt);
        assert!(matches!(
            cipher.decrypt(&parts.join(".")),
            Err(CipherError::Decryption(_))
        ));
    }

    #[test]
    fn test_wrong_recipient_fails() {
        let (cipher, _) = cipher_with_key();
        let (other_cipher, other_bundle) = cipher_with_key();
        let sealed = other_cipher.encrypt(b"for someone else", &other_bundle).unwrap();

        let err = cipher.decrypt(&sealed).unwrap_err();
        assert!(matches!(err, CipherError::Decryption(msg) if msg.contains("sealed to key")));
    }

    #[test]
    fn test_malformed_input_fails() {
        let (cipher, _) = cipher_with_key();
        assert!(matches!(cipher.decrypt("kjsdhflskd"), Err(CipherError::Decryption(_))));
        assert!(matches!(cipher.decrypt("a.b.c.d"), Err(CipherError::Decryption(_))));
        assert!(matches!(cipher.decrypt(""), Err(CipherError::Decryption(_))));
    }

    #[test]
    fn test_low_order_recipient_key_rejected() {
        let (cipher, bundle) = cipher_with_key();
        let weak = PublicKeyBundle::from_parts(bundle.sign_pub(), &[0u8; 32]).unwrap();
        assert!(matches!(
            cipher.encrypt(b"data", &weak),
            Err(CipherError::Encryption(_))
        ));
    }

    #[test]
    fn test_decrypt_without_local_key() {
        let (sealer, bundle) = cipher_with_key();
        let sealed = sealer.encrypt(b"data", &bundle).unwrap();

        let keyless = PayloadCipher::new(Arc::new(KeyStore::empty()));
        assert!(matches!(
            keyless.decrypt(&sealed),
            Err(CipherError::Key(KeyError::Absent))
        ));
    }
}
