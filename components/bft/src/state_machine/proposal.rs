use super::StateMachine;
use crate::guard;
use anyhow::Context as _;
use keel_concurrency::{ctx, error::Wrap};
use keel_roles::validator;

/// Errors that can occur when processing a Proposal message.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Proposal for a past height or round.
    #[error("proposal for a past round (current: {current_height}/{current_round})")]
    Old {
        /// Current height.
        current_height: validator::Height,
        /// Current round.
        current_round: validator::Round,
    },
    /// Proposal for a future height or round.
    #[error("proposal for a future round {height}/{round}")]
    Future {
        /// Height of the proposal.
        height: validator::Height,
        /// Round of the proposal.
        round: validator::Round,
    },
    /// A proposal for the round was received already.
    #[error("proposal for round {round} already received")]
    Duplicate {
        /// Round of the proposal.
        round: validator::Round,
    },
    /// Proof-of-lock round outside of `[-1, round)`.
    #[error("invalid pol_round {pol_round} for round {round}")]
    InvalidPolRound {
        /// Proof-of-lock round of the proposal.
        pol_round: validator::Round,
        /// Round of the proposal.
        round: validator::Round,
    },
    /// Invalid proposal.
    #[error("invalid proposal: {0:#}")]
    InvalidMessage(#[source] validator::ProposalVerifyError),
    /// Internal error. Unlike other error types, this one isn't supposed to be easily recoverable.
    #[error(transparent)]
    Internal(#[from] ctx::Error),
}

impl Wrap for Error {
    fn with_wrap<C: std::fmt::Display + Send + Sync + 'static, F: FnOnce() -> C>(
        self,
        f: F,
    ) -> Self {
        match self {
            Error::Internal(err) => Error::Internal(err.with_wrap(f)),
            err => err,
        }
    }
}

impl StateMachine {
    /// Processes a proposal of the current round.
    pub(crate) fn on_proposal(
        &mut self,
        _ctx: &ctx::Ctx,
        signed: validator::SignedProposal,
    ) -> Result<(), Error> {
        let proposal = &signed.proposal;
        let pos = (proposal.height, proposal.round);
        if pos < (self.height, self.round) {
            return Err(Error::Old {
                current_height: self.height,
                current_round: self.round,
            });
        }
        if pos > (self.height, self.round) {
            return Err(Error::Future {
                height: proposal.height,
                round: proposal.round,
            });
        }
        if self.proposal.is_some() {
            return Err(Error::Duplicate {
                round: proposal.round,
            });
        }
        if proposal.pol_round < validator::Round::NONE || proposal.pol_round >= proposal.round {
            return Err(Error::InvalidPolRound {
                pol_round: proposal.pol_round,
                round: proposal.round,
            });
        }
        signed
            .verify(&self.chain_id, signed.expected_proposer(&self.committee))
            .map_err(Error::InvalidMessage)?;

        tracing::debug!(
            height = %proposal.height,
            round = %proposal.round,
            parts = proposal.block_parts_header.total,
            pol_round = %proposal.pol_round,
            "received proposal"
        );
        self.proposal_block = None;
        self.proposal_block_parts = Some(validator::PartSet::from_header(
            proposal.block_parts_header.clone(),
        ));
        self.proposal = Some(signed.proposal);
        Ok(())
    }

    /// Produces the proposal of the current round: the locked block if
    /// locked, a new block otherwise.
    pub(crate) fn decide_proposal(&mut self) -> ctx::Result<()> {
        let (block, parts, pol_round) = match &self.locked_block {
            Some((block, parts)) => (block.clone(), parts.clone(), self.locked_round),
            None => {
                let payload = self
                    .application
                    .propose(self.height)
                    .context("application.propose()")?;
                let block = validator::Block {
                    chain_id: self.chain_id.clone(),
                    height: self.height,
                    last_block_id: self.last_block_id.clone(),
                    app_hash: self.app_hash.clone(),
                    payload,
                };
                let parts = block.make_part_set();
                (block, parts, validator::Round::NONE)
            }
        };
        let proposal = validator::Proposal {
            height: self.height,
            round: self.round,
            block_parts_header: parts.header().clone(),
            pol_round,
        };
        let signed = match self.guard.sign_proposal(proposal) {
            Ok(signed) => signed,
            Err(err @ guard::Error::Regression { .. }) => {
                tracing::debug!("proposal not produced: {err:#}");
                return Ok(());
            }
            Err(err) => return Err(anyhow::Error::from(err).context("sign_proposal()").into()),
        };
        tracing::info!(
            height = %self.height,
            round = %self.round,
            block = ?block.hash(),
            "proposing block"
        );
        self.internal_queue
            .push_back(validator::ConsensusMsg::Proposal(signed));
        for part in parts.parts() {
            self.internal_queue
                .push_back(validator::ConsensusMsg::BlockPart(validator::BlockPartMsg {
                    height: self.height,
                    round: self.round,
                    part: part.clone(),
                }));
        }
        Ok(())
    }
}
