//! Cryptographic primitives: ed25519 signatures and sha256 hashes, with
//! byte and text encodings.

pub use fmt::*;

pub mod ed25519;
mod fmt;
pub mod sha256;
