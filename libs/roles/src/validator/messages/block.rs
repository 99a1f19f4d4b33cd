//! Blocks and their identifiers.
use super::{BlockId, Height, PartSet, BLOCK_PART_SIZE};
use crate::serde_fmt::impl_hex_serde;
use anyhow::Context as _;
use keel_crypto::{sha256::Sha256, ByteFmt};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the chain. Part of every sign bytes, so signatures don't
/// carry over between chains.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub String);

impl fmt::Display for ChainId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

/// Application-defined content of a block.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Payload(pub Vec<u8>);

impl fmt::Debug for Payload {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Payload({} bytes)", self.0.len())
    }
}

impl ByteFmt for Payload {
    fn encode(&self) -> Vec<u8> {
        self.0.clone()
    }
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(Self(bytes.to_vec()))
    }
}

impl_hex_serde!(Payload);

/// Application state hash after executing a block.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct AppHash(pub Vec<u8>);

impl fmt::Debug for AppHash {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&hex::encode_upper(&self.0))
    }
}

impl ByteFmt for AppHash {
    fn encode(&self) -> Vec<u8> {
        self.0.clone()
    }
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(Self(bytes.to_vec()))
    }
}

impl_hex_serde!(AppHash);

/// Hash of a block's canonical encoding.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockHash(pub(crate) Sha256);

impl fmt::Debug for BlockHash {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.0, fmt)
    }
}

impl ByteFmt for BlockHash {
    fn encode(&self) -> Vec<u8> {
        ByteFmt::encode(&self.0)
    }
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        ByteFmt::decode(bytes).map(Self)
    }
}

impl_hex_serde!(BlockHash);

/// A block. Contains no wall clock time: a block proposed for the same
/// height, on top of the same chain and with the same payload is
/// byte-identical, which recovery relies on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Chain the block belongs to.
    pub chain_id: ChainId,
    /// Height of the block.
    pub height: Height,
    /// Id of the parent block. `None` for the first block of the chain.
    pub last_block_id: Option<BlockId>,
    /// Application state hash after the parent block.
    pub app_hash: AppHash,
    /// Application payload.
    pub payload: Payload,
}

impl Block {
    /// Canonical encoding of the block, which the parts are cut from.
    pub fn encode(&self) -> Vec<u8> {
        // A struct of strings and integers always serializes.
        serde_json::to_vec(self).expect("block encoding")
    }

    /// Decodes a block from its canonical encoding.
    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        serde_json::from_slice(bytes).context("decode block")
    }

    /// Hash of the block.
    pub fn hash(&self) -> BlockHash {
        BlockHash(Sha256::new(&self.encode()))
    }

    /// Splits the block into parts of `BLOCK_PART_SIZE`.
    pub fn make_part_set(&self) -> PartSet {
        PartSet::from_data(&self.encode(), BLOCK_PART_SIZE)
    }

    /// Id of the block, given its part set.
    pub fn id(&self, parts: &PartSet) -> BlockId {
        BlockId {
            hash: self.hash(),
            parts: parts.header().clone(),
        }
    }
}
