//! Blocks are gossiped as a set of fixed-size parts. Every part carries a
//! merkle proof against the root hash announced in the proposal, so parts can
//! be verified one by one, as they arrive.
use super::{BlockHash, Height, Round};
use crate::serde_fmt::impl_hex_serde;
use keel_crypto::{sha256::Sha256, ByteFmt};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of a block part in bytes.
pub const BLOCK_PART_SIZE: usize = 4096;

/// Node of the merkle tree over the parts.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MerkleHash(pub(crate) Sha256);

impl fmt::Debug for MerkleHash {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.0, fmt)
    }
}

impl ByteFmt for MerkleHash {
    fn encode(&self) -> Vec<u8> {
        ByteFmt::encode(&self.0)
    }
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        ByteFmt::decode(bytes).map(Self)
    }
}

impl_hex_serde!(MerkleHash);

/// Number of parts and their merkle root.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartSetHeader {
    /// Merkle root of the parts.
    pub hash: MerkleHash,
    /// Number of parts.
    pub total: u32,
}

/// Identifies a block together with the way it was split into parts.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    /// Hash of the block.
    pub hash: BlockHash,
    /// Header of the block's part set.
    pub parts: PartSetHeader,
}

/// Raw bytes of a part.
#[derive(Clone, PartialEq, Eq)]
pub struct PartBytes(pub Vec<u8>);

impl fmt::Debug for PartBytes {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "PartBytes({} bytes)", self.0.len())
    }
}

impl ByteFmt for PartBytes {
    fn encode(&self) -> Vec<u8> {
        self.0.clone()
    }
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(Self(bytes.to_vec()))
    }
}

impl_hex_serde!(PartBytes);

/// Merkle proof of a part: the sibling hashes on the path from the leaf to
/// the root, bottom-up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Sibling hashes.
    pub aunts: Vec<MerkleHash>,
}

/// A part of a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    /// Position of the part.
    pub index: u32,
    /// Content.
    pub bytes: PartBytes,
    /// Proof against the part set root.
    pub proof: MerkleProof,
}

/// Gossiped block part.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPartMsg {
    /// Height of the proposal.
    pub height: Height,
    /// Round of the proposal.
    pub round: Round,
    /// The part.
    pub part: Part,
}

/// Error of `PartSet::add_part()`.
#[derive(Debug, thiserror::Error)]
pub enum PartError {
    /// Index beyond the part count.
    #[error("part index {index} out of range, total {total}")]
    IndexOutOfRange {
        /// Index of the part.
        index: u32,
        /// Number of parts.
        total: u32,
    },
    /// Proof doesn't match the root.
    #[error("invalid merkle proof of part {index}")]
    InvalidProof {
        /// Index of the part.
        index: u32,
    },
}

/// Set of parts of a single block, possibly incomplete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartSet {
    header: PartSetHeader,
    parts: Vec<Option<Part>>,
    count: u32,
}

impl PartSet {
    /// Splits `data` into parts of `part_size` bytes.
    pub fn from_data(data: &[u8], part_size: usize) -> Self {
        let chunks: Vec<&[u8]> = data.chunks(part_size.max(1)).collect();
        let leaves: Vec<MerkleHash> = chunks
            .iter()
            .map(|c| MerkleHash(Sha256::new(c)))
            .collect();
        let total = chunks.len() as u32;
        let parts = chunks
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                Some(Part {
                    index: i as u32,
                    bytes: PartBytes(c.to_vec()),
                    proof: MerkleProof {
                        aunts: merkle_aunts(&leaves, i),
                    },
                })
            })
            .collect();
        Self {
            header: PartSetHeader {
                hash: merkle_root(&leaves),
                total,
            },
            parts,
            count: total,
        }
    }

    /// Empty part set, to be filled with parts received from the network.
    pub fn from_header(header: PartSetHeader) -> Self {
        Self {
            parts: vec![None; header.total as usize],
            header,
            count: 0,
        }
    }

    /// Header of the part set.
    pub fn header(&self) -> &PartSetHeader {
        &self.header
    }

    /// Whether all parts are present.
    pub fn is_complete(&self) -> bool {
        self.count == self.header.total
    }

    /// Number of parts present.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Part at the given index, if present.
    pub fn get(&self, index: u32) -> Option<&Part> {
        self.parts.get(index as usize)?.as_ref()
    }

    /// Iterates over the present parts.
    pub fn parts(&self) -> impl Iterator<Item = &Part> {
        self.parts.iter().flatten()
    }

    /// Verifies and adds a part. Returns `false` if the part was already there.
    pub fn add_part(&mut self, part: Part) -> Result<bool, PartError> {
        let total = self.header.total;
        let Some(slot) = self.parts.get_mut(part.index as usize) else {
            return Err(PartError::IndexOutOfRange {
                index: part.index,
                total,
            });
        };
        if slot.is_some() {
            return Ok(false);
        }
        let leaf = MerkleHash(Sha256::new(&part.bytes.0));
        let root = compute_from_aunts(part.index as usize, total as usize, leaf, &part.proof.aunts);
        if root != Some(self.header.hash) {
            return Err(PartError::InvalidProof { index: part.index });
        }
        *slot = Some(part);
        self.count += 1;
        Ok(true)
    }

    /// Concatenated content of the parts. `None` if incomplete.
    pub fn assemble(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let mut data = vec![];
        for p in self.parts() {
            data.extend_from_slice(&p.bytes.0);
        }
        Some(data)
    }
}

/// The tree splits `n` leaves into the first `(n+1)/2` and the rest.
fn split_point(n: usize) -> usize {
    (n + 1) / 2
}

fn merkle_root(leaves: &[MerkleHash]) -> MerkleHash {
    match leaves.len() {
        0 => MerkleHash(Sha256::new(&[])),
        1 => leaves[0],
        n => {
            let k = split_point(n);
            MerkleHash(Sha256::combine(
                &merkle_root(&leaves[..k]).0,
                &merkle_root(&leaves[k..]).0,
            ))
        }
    }
}

fn merkle_aunts(leaves: &[MerkleHash], index: usize) -> Vec<MerkleHash> {
    let n = leaves.len();
    if n <= 1 {
        return vec![];
    }
    let k = split_point(n);
    let (mut aunts, sibling) = if index < k {
        (merkle_aunts(&leaves[..k], index), merkle_root(&leaves[k..]))
    } else {
        (merkle_aunts(&leaves[k..], index - k), merkle_root(&leaves[..k]))
    };
    aunts.push(sibling);
    aunts
}

fn compute_from_aunts(
    index: usize,
    total: usize,
    leaf: MerkleHash,
    aunts: &[MerkleHash],
) -> Option<MerkleHash> {
    if index >= total {
        return None;
    }
    if total == 1 {
        return aunts.is_empty().then_some(leaf);
    }
    let (sibling, rest) = aunts.split_last()?;
    let k = split_point(total);
    Some(if index < k {
        let left = compute_from_aunts(index, k, leaf, rest)?;
        MerkleHash(Sha256::combine(&left.0, &sibling.0))
    } else {
        let right = compute_from_aunts(index - k, total - k, leaf, rest)?;
        MerkleHash(Sha256::combine(&sibling.0, &right.0))
    })
}
