//! Domain-separated transcripts.
//!
//! Values are appended as (tag, len, bytes) tuples so the same logical input
//! always produces the same byte string, and inputs from different contexts
//! can never collide.

use bytes::{BufMut, BytesMut};

use crate::hash::sha256;

/// Domain for the compact token signature input.
pub const TOKEN_SIGNATURE_DOMAIN: &str = "sealpost_token_sig_v1";
/// Domain for the payload cipher additional authenticated data.
pub const PAYLOAD_AAD_DOMAIN: &str = "sealpost_payload_aad_v1";

const DOMAIN_TAG: u32 = 0;

#[derive(Clone, Debug)]
pub struct Transcript {
    buf: BytesMut,
}

impl Transcript {
    pub fn new(domain: &'static str) -> Self {
        let mut t = Self { buf: BytesMut::with_capacity(256) };
        t.append_bytes(DOMAIN_TAG, domain.as_bytes());
        t
    }

    pub fn append_bytes(&mut self, tag: u32, data: &[u8]) -> &mut Self {
        self.buf.put_u32(tag);
        self.buf.put_u32(data.len() as u32);
        self.buf.extend_from_slice(data);
        self
    }

    pub fn append_u64(&mut self, tag: u32, v: u64) -> &mut Self {
        self.buf.put_u32(tag);
        self.buf.put_u32(8);
        self.buf.put_u64(v);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// SHA-256 over the transcript contents.
    pub fn digest(&self) -> [u8; 32] {
        sha256(&self.buf)
    }
}
