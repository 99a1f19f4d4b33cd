use super::{PublicKey, SecretKey, Signature};
use crate::ByteFmt;
use rand::SeedableRng as _;

#[test]
fn test_ed25519_rfc8032_vector() {
    // RFC 8032, section 7.1, TEST 2.
    let sk = SecretKey::decode(
        &hex::decode("4ccd089b28ff96da9db6c346ec114e0f5b8a319f35aba624da8cf6ed4fb8a6fb").unwrap(),
    )
    .unwrap();
    let pk = PublicKey::decode(
        &hex::decode("3d4017c3e843895a92b70aa74d1b7ebc9c982ccf2ec4968cc0cd55f12af4660c").unwrap(),
    )
    .unwrap();
    assert_eq!(sk.public(), pk);

    let msg = hex::decode("72").unwrap();
    let want = Signature::decode(&hex::decode("92a009a9f0d4cab8720e820b5f642540a2b27b5416503f8fb3762223ebdb69da085ac1e43e15996e458f3613d0f11d8c387b2eaeb4302aeeb00d291612bb0c00").unwrap()).unwrap();
    assert_eq!(sk.sign(&msg), want);
    pk.verify(&msg, &want).unwrap();
}

#[test]
fn test_signing_is_deterministic() {
    let rng = &mut rand::rngs::StdRng::seed_from_u64(29483920);
    let sk = SecretKey::generate_from(rng);
    assert_eq!(sk.sign(b"vote"), sk.sign(b"vote"));
    assert_ne!(sk.sign(b"vote"), sk.sign(b"other vote"));
}

#[test]
fn test_verify_rejects_other_message_and_key() {
    let rng = &mut rand::rngs::StdRng::seed_from_u64(1);
    let sk = SecretKey::generate_from(rng);
    let other = SecretKey::generate_from(rng);
    let sig = sk.sign(b"proposal");
    assert!(sk.public().verify(b"proposal", &sig).is_ok());
    assert!(sk.public().verify(b"proposal2", &sig).is_err());
    assert!(other.public().verify(b"proposal", &sig).is_err());
}

#[test]
fn test_byte_roundtrip() {
    let rng = &mut rand::rngs::StdRng::seed_from_u64(2);
    let sk = SecretKey::generate_from(rng);
    let sk2 = SecretKey::decode(&sk.encode()).unwrap();
    assert_eq!(sk.public(), sk2.public());
}
