use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64, Engine as _};
use proptest::prelude::*;
use uuid::Uuid;

use crate::cipher::PayloadCipher;
use crate::claims::{ClaimPolicy, ClaimViolation, Expectations};
use crate::entity::EntityIdentifier;
use crate::keystore::{KeyPair, KeyStore, PublicKeyBundle};
use crate::signer::{EnvelopeSigner, TokenScope};
use crate::token::{TokenError, UnverifiedToken};
use crate::transcript::Transcript;

fn keyed_store(seed: [u8; 32], kex: [u8; 32]) -> (Arc<KeyStore>, PublicKeyBundle) {
    let pair = KeyPair::from_bytes(&seed, &kex);
    let bundle = pair.public_bundle();
    (Arc::new(KeyStore::new(pair)), bundle)
}

fn scope(ttl: u64) -> TokenScope {
    TokenScope::new(
        EntityIdentifier::organization(Uuid::nil()),
        EntityIdentifier::service(Uuid::nil()),
        "subject",
        ttl,
    )
}

proptest! {
    #[test]
    fn test_transcript_determinism(
        tag1 in any::<u32>(),
        data1 in any::<Vec<u8>>(),
        tag2 in any::<u32>(),
        data2 in any::<Vec<u8>>()
    ) {
        let mut t1 = Transcript::new("test");
        t1.append_bytes(tag1, &data1).append_bytes(tag2, &data2);

        let mut t2 = Transcript::new("test");
        t2.append_bytes(tag1, &data1).append_bytes(tag2, &data2);

        prop_assert_eq!(t1.digest(), t2.digest());
    }

    #[test]
    fn test_payload_round_trip(
        seed in any::<[u8; 32]>(),
        kex in any::<[u8; 32]>(),
        plaintext in proptest::collection::vec(any::<u8>(), 0..2048)
    ) {
        let (store, bundle) = keyed_store(seed, kex);
        let cipher = PayloadCipher::new(store);

        let sealed = cipher.encrypt(&plaintext, &bundle).unwrap();
        prop_assert_eq!(cipher.decrypt(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn test_sign_verify_round_trip(
        seed in any::<[u8; 32]>(),
        kex in any::<[u8; 32]>(),
        payload in "[A-Za-z0-9._-]{0,256}",
        now in 0u64..4_000_000_000,
        ttl in 1u64..86_400
    ) {
        let (store, bundle) = keyed_store(seed, kex);
        let signer = EnvelopeSigner::new(store);
        let scope = scope(ttl);

        let env = signer.sign(&payload, &scope, now).unwrap();
        let token = UnverifiedToken::parse(env.compact_token()).unwrap();
        prop_assert!(token.verify_signature(&bundle).is_ok());

        let expect = Expectations::for_audience(scope.audience).with_issuer(scope.issuer);
        prop_assert!(token.claims().validate(&expect, &ClaimPolicy::default(), now).is_ok());
        prop_assert_eq!(token.claims().ctx.as_deref(), Some(payload.as_str()));
    }

    #[test]
    fn test_expiry_is_exclusive(
        now in 1u64..4_000_000_000,
        ttl in 1u64..3_600,
        skew in 0u64..300
    ) {
        let (store, _) = keyed_store([7u8; 32], [9u8; 32]);
        let signer = EnvelopeSigner::new(store);
        let scope = scope(ttl);
        let policy = ClaimPolicy { clock_skew_secs: skew };
        let expect = Expectations::for_audience(scope.audience);

        let env = signer.sign("p", &scope, now).unwrap();
        let claims = UnverifiedToken::parse(env.compact_token()).unwrap().into_claims();

        let last_valid = claims.exp + skew - 1;
        prop_assert!(claims.validate(&expect, &policy, last_valid).is_ok());
        let expired = claims.validate(&expect, &policy, last_valid + 1);
        prop_assert!(
            matches!(expired, Err(ClaimViolation::Expired { .. })),
            "expected expiry, got {:?}",
            expired
        );
    }

    #[test]
    fn test_claims_bit_flip_never_verifies(
        seed in any::<[u8; 32]>(),
        byte in any::<usize>(),
        bit in 0u8..8
    ) {
        let (store, bundle) = keyed_store(seed, [3u8; 32]);
        let signer = EnvelopeSigner::new(store);
        let env = signer.sign("payload", &scope(60), 1_000).unwrap();

        let parts: Vec<&str> = env.compact_token().split('.').collect();
        let mut claims = B64.decode(parts[1]).unwrap();
        let idx = byte % claims.len();
        claims[idx] ^= 1 << bit;
        let tampered = format!("{}.{}.{}", parts[0], B64.encode(claims), parts[2]);

        match UnverifiedToken::parse(&tampered) {
            Ok(token) => prop_assert!(matches!(
                token.verify_signature(&bundle),
                Err(TokenError::BadSignature)
            )),
            Err(e) => prop_assert!(matches!(e, TokenError::Malformed(_))),
        }
    }
}
