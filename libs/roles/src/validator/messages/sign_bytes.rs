//! Canonical chain-scoped encoding of signed content.
//!
//! Sign bytes are the JSON object `{"chain_id": <chain id>, <kind>: <content>}`
//! with keys sorted at every level, so that logically identical content always
//! encodes to identical bytes. Signatures and signer identity are never part of
//! the content.
use crate::serde_fmt::impl_hex_serde;
use keel_crypto::ByteFmt;
use serde::Serialize;
use serde_json::Value;
use std::{collections::BTreeMap, fmt};

use super::ChainId;

/// Bytes a validator signature is computed over.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct SignBytes(pub Vec<u8>);

impl SignBytes {
    /// Encodes `content` of the given kind, scoped to `chain_id`.
    pub(crate) fn new<T: Serialize>(chain_id: &ChainId, kind: &str, content: &T) -> Self {
        let mut doc = BTreeMap::new();
        doc.insert("chain_id".to_owned(), Value::from(chain_id.0.clone()));
        // Signed content has no maps with non-string keys, so conversion
        // cannot fail.
        doc.insert(
            kind.to_owned(),
            serde_json::to_value(content).expect("sign bytes content"),
        );
        let doc = sorted(Value::Object(doc.into_iter().collect()));
        Self(doc.to_string().into_bytes())
    }
}

/// Rebuilds every object of `v` with its keys inserted in sorted order.
/// `serde_json::Map` keeps insertion order when the `preserve_order` feature
/// is enabled anywhere in the dependency graph.
fn sorted(v: Value) -> Value {
    match v {
        Value::Object(m) => {
            let m: BTreeMap<String, Value> = m.into_iter().map(|(k, v)| (k, sorted(v))).collect();
            Value::Object(m.into_iter().collect())
        }
        Value::Array(a) => Value::Array(a.into_iter().map(sorted).collect()),
        v => v,
    }
}

impl fmt::Debug for SignBytes {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl ByteFmt for SignBytes {
    fn encode(&self) -> Vec<u8> {
        self.0.clone()
    }
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(Self(bytes.to_vec()))
    }
}

impl_hex_serde!(SignBytes);
