//! Serde adapters for binary values. Binary values are written to JSON as
//! upper-case hex strings, via their `ByteFmt` encoding.
use keel_crypto::ByteFmt;
use serde::{de::Error as _, Deserialize as _, Deserializer, Serializer};

/// Serializes a `ByteFmt` value as a hex string.
pub(crate) fn serialize_hex<T: ByteFmt, S: Serializer>(x: &T, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode_upper(x.encode()))
}

/// Deserializes a `ByteFmt` value from a hex string.
pub(crate) fn deserialize_hex<'de, T: ByteFmt, D: Deserializer<'de>>(d: D) -> Result<T, D::Error> {
    let s = String::deserialize(d)?;
    let raw = hex::decode(&s).map_err(D::Error::custom)?;
    T::decode(&raw).map_err(|err| D::Error::custom(format!("{err:#}")))
}

/// Implements `Serialize` and `Deserialize` for a `ByteFmt` type via hex strings.
macro_rules! impl_hex_serde {
    ($t:ty) => {
        impl serde::Serialize for $t {
            fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                $crate::serde_fmt::serialize_hex(self, s)
            }
        }

        impl<'de> serde::Deserialize<'de> for $t {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                $crate::serde_fmt::deserialize_hex(d)
            }
        }
    };
}

pub(crate) use impl_hex_serde;
