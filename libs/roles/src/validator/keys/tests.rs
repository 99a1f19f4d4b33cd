use super::*;
use crate::validator::SignBytes;
use keel_concurrency::ctx;
use keel_crypto::{ByteFmt, Text, TextFmt};
use rand::Rng as _;

#[test]
fn test_signature_verify() {
    let ctx = ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();

    let msg1 = SignBytes(b"first".to_vec());
    let msg2 = SignBytes(b"second".to_vec());

    let key1: SecretKey = rng.gen();
    let key2: SecretKey = rng.gen();

    let sig1 = key1.sign(&msg1);

    // Matching key and message.
    key1.public().verify(&msg1, &sig1).unwrap();

    // Mismatching message.
    assert!(key1.public().verify(&msg2, &sig1).is_err());

    // Mismatching key.
    assert!(key2.public().verify(&msg1, &sig1).is_err());
}

#[test]
fn test_signing_is_deterministic() {
    let ctx = ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let key: SecretKey = rng.gen();
    let msg = SignBytes(b"vote".to_vec());
    assert_eq!(key.sign(&msg), key.sign(&msg));
}

#[test]
fn test_text_encoding() {
    let ctx = ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let key: SecretKey = rng.gen();

    let text = TextFmt::encode(&key);
    assert!(text.starts_with("validator:secret:ed25519:"));
    let got: SecretKey = Text::new(&text).decode().unwrap();
    assert_eq!(key.public(), got.public());

    let text = TextFmt::encode(&key.public());
    assert!(text.starts_with("validator:public:ed25519:"));
    let got: PublicKey = Text::new(&text).decode().unwrap();
    assert_eq!(key.public(), got);

    // Prefixes of different types don't collide.
    assert!(Text::new(&text).decode::<SecretKey>().is_err());
}

#[test]
fn test_address() {
    let ctx = ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let key1: SecretKey = rng.gen();
    let key2: SecretKey = rng.gen();
    assert_eq!(key1.public().address(), key1.public().address());
    assert_ne!(key1.public().address(), key2.public().address());

    let addr = key1.public().address();
    let json = serde_json::to_string(&addr).unwrap();
    assert_eq!(json, format!("\"{}\"", hex::encode_upper(addr.encode())));
    assert_eq!(addr, serde_json::from_str::<Address>(&json).unwrap());
}
