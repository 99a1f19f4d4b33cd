use super::{ChainId, Committee, Height, PartSetHeader, Round, SignBytes};
use crate::validator::{InvalidSignatureError, PublicKey, SecretKey, Signature};
use serde::{Deserialize, Serialize};

/// Proposal of a block for a round. The block itself is gossiped separately,
/// in parts matching `block_parts_header`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Height of the proposed block.
    pub height: Height,
    /// Round of the proposal.
    pub round: Round,
    /// Header of the proposed block's part set.
    pub block_parts_header: PartSetHeader,
    /// Round in which the proposed block got a polka, or `Round::NONE`.
    pub pol_round: Round,
}

impl Proposal {
    /// Canonical bytes to sign.
    pub fn sign_bytes(&self, chain_id: &ChainId) -> SignBytes {
        SignBytes::new(chain_id, "proposal", self)
    }

    /// Signs the proposal directly with the key, bypassing any guard.
    pub fn sign(self, chain_id: &ChainId, key: &SecretKey) -> SignedProposal {
        SignedProposal {
            signature: key.sign(&self.sign_bytes(chain_id)),
            proposal: self,
        }
    }
}

/// Signed proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProposal {
    /// Proposal.
    pub proposal: Proposal,
    /// Signature of the round's proposer.
    pub signature: Signature,
}

/// Error of `SignedProposal::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum ProposalVerifyError {
    /// `pol_round` is not within `[-1, round)`.
    #[error("pol_round {pol_round} not in [-1, {round})")]
    BadPolRound {
        /// Proposal round.
        round: Round,
        /// Proof-of-lock round.
        pol_round: Round,
    },
    /// Negative round.
    #[error("negative round {0}")]
    BadRound(Round),
    /// Signature is not of the round's proposer.
    #[error(transparent)]
    Signature(#[from] InvalidSignatureError),
}

impl SignedProposal {
    /// Verifies the proposal, given the key of the round's proposer.
    pub fn verify(&self, chain_id: &ChainId, proposer: &PublicKey) -> Result<(), ProposalVerifyError> {
        let p = &self.proposal;
        if !p.round.is_some() {
            return Err(ProposalVerifyError::BadRound(p.round));
        }
        if p.pol_round < Round::NONE || p.pol_round >= p.round {
            return Err(ProposalVerifyError::BadPolRound {
                round: p.round,
                pol_round: p.pol_round,
            });
        }
        proposer.verify(&p.sign_bytes(chain_id), &self.signature)?;
        Ok(())
    }

    /// Key of the proposer expected for this proposal.
    pub fn expected_proposer<'a>(&self, committee: &'a Committee) -> &'a PublicKey {
        &committee
            .proposer(self.proposal.height, self.proposal.round)
            .key
    }
}
