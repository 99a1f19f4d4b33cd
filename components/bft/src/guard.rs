//! Signing guard: the only path by which a validator key signs consensus
//! messages.
//!
//! The guard keeps a durable record of the last signature. A request below
//! the record is refused, a request at the record is answered from the
//! record (if the content is identical) or refused (if it differs), and only
//! a request above the record reaches the key. The record is persisted before
//! the signature is returned, so a crash can never release a signature that
//! the record doesn't know about.
use crate::metrics;
use keel_roles::validator;
use keel_storage::{SignRecordStore, SigningRecord};

/// Signing request.
#[derive(Clone, Copy, Debug)]
pub enum Candidate<'a> {
    /// Proposal.
    Proposal(&'a validator::Proposal),
    /// Prevote or precommit.
    Vote(&'a validator::Vote),
}

impl Candidate<'_> {
    fn position(&self) -> (validator::Height, validator::Round, validator::SignStep) {
        match self {
            Self::Proposal(p) => (p.height, p.round, validator::SignStep::Propose),
            Self::Vote(v) => (
                v.height,
                v.round,
                match v.vote_type {
                    validator::VoteType::Prevote => validator::SignStep::Prevote,
                    validator::VoteType::Precommit => validator::SignStep::Precommit,
                },
            ),
        }
    }

    fn sign_bytes(&self, chain_id: &validator::ChainId) -> validator::SignBytes {
        match self {
            Self::Proposal(p) => p.sign_bytes(chain_id),
            Self::Vote(v) => v.sign_bytes(chain_id),
        }
    }
}

/// Error returned by the guard.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request below the last signature. The record is unchanged.
    #[error(
        "regression: {height}/{round}/{step:?} is below the last signature at \
         {last_height}/{last_round}/{last_step:?}"
    )]
    Regression {
        /// Requested height.
        height: validator::Height,
        /// Requested round.
        round: validator::Round,
        /// Requested step.
        step: validator::SignStep,
        /// Height of the last signature.
        last_height: validator::Height,
        /// Round of the last signature.
        last_round: validator::Round,
        /// Step of the last signature.
        last_step: validator::SignStep,
    },
    /// Request at the position of the last signature, with different content.
    #[error("equivocation at {height}/{round}/{step:?}")]
    Equivocation {
        /// Height.
        height: validator::Height,
        /// Round.
        round: validator::Round,
        /// Step.
        step: validator::SignStep,
    },
    /// Position which can never be signed: a negative round or the `None` step.
    #[error("invalid signing position {height}/{round}/{step:?}")]
    InvalidPosition {
        /// Height.
        height: validator::Height,
        /// Round.
        round: validator::Round,
        /// Step.
        step: validator::SignStep,
    },
    /// Persisting the record failed. The signature was not released.
    #[error("persist signing record: {0:#}")]
    Persist(#[source] anyhow::Error),
}

/// Signing key guarded by a durable signing record.
#[derive(Debug)]
pub struct SigningGuard {
    key: validator::SecretKey,
    chain_id: validator::ChainId,
    store: Box<dyn SignRecordStore>,
    record: SigningRecord,
}

impl SigningGuard {
    /// Loads the signing record from `store`.
    pub fn new(
        key: validator::SecretKey,
        chain_id: validator::ChainId,
        store: Box<dyn SignRecordStore>,
    ) -> anyhow::Result<Self> {
        let record = store.load()?;
        Ok(Self {
            key,
            chain_id,
            store,
            record,
        })
    }

    /// Public key of the guarded key.
    pub fn public_key(&self) -> validator::PublicKey {
        self.key.public()
    }

    /// Last signature.
    pub fn record(&self) -> &SigningRecord {
        &self.record
    }

    /// Signs the candidate, unless that could equivocate.
    pub fn sign(&mut self, candidate: Candidate) -> Result<validator::Signature, Error> {
        let (height, round, step) = candidate.position();
        if !round.is_some() || step == validator::SignStep::None {
            return Err(Error::InvalidPosition {
                height,
                round,
                step,
            });
        }
        let sign_bytes = candidate.sign_bytes(&self.chain_id);
        match (height, round, step).cmp(&self.record.position()) {
            std::cmp::Ordering::Less => Err(Error::Regression {
                height,
                round,
                step,
                last_height: self.record.height,
                last_round: self.record.round,
                last_step: self.record.step,
            }),
            std::cmp::Ordering::Equal => match &self.record.signature {
                Some(sig) if sign_bytes == self.record.sign_bytes => {
                    tracing::debug!(%height, %round, ?step, "signature served from the signing record");
                    Ok(sig.clone())
                }
                _ => Err(Error::Equivocation {
                    height,
                    round,
                    step,
                }),
            },
            std::cmp::Ordering::Greater => {
                let t = metrics::METRICS.sign_latency.start();
                let signature = self.key.sign(&sign_bytes);
                let record = SigningRecord {
                    height,
                    round,
                    step,
                    sign_bytes,
                    signature: Some(signature.clone()),
                };
                self.store.persist(&record).map_err(Error::Persist)?;
                self.record = record;
                t.observe();
                Ok(signature)
            }
        }
    }

    /// Signs a proposal.
    pub fn sign_proposal(
        &mut self,
        proposal: validator::Proposal,
    ) -> Result<validator::SignedProposal, Error> {
        let signature = self.sign(Candidate::Proposal(&proposal))?;
        Ok(validator::SignedProposal {
            proposal,
            signature,
        })
    }

    /// Signs a vote as the committee member at `validator_index`.
    pub fn sign_vote(
        &mut self,
        vote: validator::Vote,
        validator_index: u32,
    ) -> Result<validator::SignedVote, Error> {
        let signature = self.sign(Candidate::Vote(&vote))?;
        Ok(validator::SignedVote {
            vote,
            validator_address: self.key.public().address(),
            validator_index,
            signature,
        })
    }
}
