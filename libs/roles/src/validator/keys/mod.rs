//! Cryptographic keys representing the validator role.

mod address;
mod public_key;
mod secret_key;
mod signature;
#[cfg(test)]
mod tests;

pub use address::Address;
pub use keel_crypto::ed25519::InvalidSignatureError;
pub use public_key::PublicKey;
pub use secret_key::SecretKey;
pub use signature::Signature;
