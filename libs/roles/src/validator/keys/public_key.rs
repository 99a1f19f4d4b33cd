use super::{Address, InvalidSignatureError, Signature};
use crate::validator::SignBytes;
use keel_crypto::{ed25519, sha256::Sha256, ByteFmt, Text, TextFmt};
use std::fmt;

/// A public key for a validator.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(pub(crate) ed25519::PublicKey);

impl PublicKey {
    /// Verifies a signature over the given sign bytes.
    pub fn verify(&self, msg: &SignBytes, sig: &Signature) -> Result<(), InvalidSignatureError> {
        self.0.verify(&msg.0, &sig.0)
    }

    /// Address of the validator: the first 20 bytes of the key's sha256.
    pub fn address(&self) -> Address {
        let hash = Sha256::new(self.0.as_bytes());
        let mut addr = [0; 20];
        addr.copy_from_slice(&hash.as_bytes()[..20]);
        Address(addr)
    }
}

impl ByteFmt for PublicKey {
    fn encode(&self) -> Vec<u8> {
        ByteFmt::encode(&self.0)
    }
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        ByteFmt::decode(bytes).map(Self)
    }
}

impl TextFmt for PublicKey {
    fn encode(&self) -> String {
        format!(
            "validator:public:ed25519:{}",
            hex::encode(ByteFmt::encode(&self.0))
        )
    }
    fn decode(text: Text) -> anyhow::Result<Self> {
        text.strip("validator:public:ed25519:")?
            .decode_hex()
            .map(Self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&TextFmt::encode(self))
    }
}
