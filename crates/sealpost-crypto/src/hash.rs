use constant_time_eq::constant_time_eq;
use sha2::{Digest, Sha256};

/// Name of the digest function recorded next to body hashes.
pub const BODY_HASH_FUNC: &str = "S256";

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().into()
}

/// Hex SHA-256 of a message body, as carried in the `body` claim.
pub fn body_hash(body: &[u8]) -> String {
    hex::encode(sha256(body))
}

/// Key fingerprint: first 16 bytes of SHA-256 over the public material,
/// rendered as colon-separated lowercase hex.
pub fn fingerprint(public_material: &[u8]) -> String {
    let digest = sha256(public_material);
    digest[..16]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Constant-time equality for digests and other comparisons on attacker
/// supplied values.
pub fn digest_eq(a: &[u8], b: &[u8]) -> bool {
    constant_time_eq(a, b)
}
