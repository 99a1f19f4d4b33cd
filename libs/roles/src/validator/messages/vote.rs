use super::{BlockId, ChainId, Committee, Height, Round, SignBytes};
use crate::validator::{Address, InvalidSignatureError, SecretKey, Signature};
use serde::{Deserialize, Serialize};

/// Type of a vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteType {
    /// First round of voting.
    Prevote,
    /// Second round of voting.
    Precommit,
}

/// Votable content. A vote without a block id is a vote for nil.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vote {
    /// Type of the vote.
    #[serde(rename = "type")]
    pub vote_type: VoteType,
    /// Height.
    pub height: Height,
    /// Round.
    pub round: Round,
    /// Block voted for, `None` for nil.
    pub block_id: Option<BlockId>,
}

impl Vote {
    /// Canonical bytes to sign.
    pub fn sign_bytes(&self, chain_id: &ChainId) -> SignBytes {
        SignBytes::new(chain_id, "vote", self)
    }

    /// Signs the vote directly with the key, bypassing any guard.
    pub fn sign(self, chain_id: &ChainId, committee: &Committee, key: &SecretKey) -> SignedVote {
        let address = key.public().address();
        SignedVote {
            signature: key.sign(&self.sign_bytes(chain_id)),
            validator_index: committee.index(&address).map_or(u32::MAX, |i| i as u32),
            validator_address: address,
            vote: self,
        }
    }
}

/// Signed vote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedVote {
    /// Vote.
    pub vote: Vote,
    /// Address of the signer.
    pub validator_address: Address,
    /// Index of the signer in the committee.
    pub validator_index: u32,
    /// Signature.
    pub signature: Signature,
}

/// Error of `SignedVote::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum VoteVerifyError {
    /// Signer is not a committee member.
    #[error("validator {0} not in committee")]
    UnknownValidator(Address),
    /// Index doesn't match the address.
    #[error("validator {address} has index {expected}, got {got}")]
    IndexMismatch {
        /// Address of the signer.
        address: Address,
        /// Index in the committee.
        expected: u32,
        /// Index in the vote.
        got: u32,
    },
    /// Negative round.
    #[error("negative round {0}")]
    BadRound(Round),
    /// Bad signature.
    #[error(transparent)]
    Signature(#[from] InvalidSignatureError),
}

impl SignedVote {
    /// Verifies the vote against the committee.
    pub fn verify(&self, chain_id: &ChainId, committee: &Committee) -> Result<(), VoteVerifyError> {
        if !self.vote.round.is_some() {
            return Err(VoteVerifyError::BadRound(self.vote.round));
        }
        let unknown = || VoteVerifyError::UnknownValidator(self.validator_address);
        let index = committee.index(&self.validator_address).ok_or_else(unknown)?;
        let validator = committee.get(index).ok_or_else(unknown)?;
        if index as u32 != self.validator_index {
            return Err(VoteVerifyError::IndexMismatch {
                address: self.validator_address,
                expected: index as u32,
                got: self.validator_index,
            });
        }
        validator
            .key
            .verify(&self.vote.sign_bytes(chain_id), &self.signature)?;
        Ok(())
    }
}
