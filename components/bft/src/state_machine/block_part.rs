use super::StateMachine;
use crate::events::Event;
use keel_concurrency::{ctx, error::Wrap};
use keel_roles::validator;

/// Errors that can occur when processing a BlockPart message.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Part of a block of a past height.
    #[error("block part for a past height (current height: {current_height})")]
    Old {
        /// Current height.
        current_height: validator::Height,
    },
    /// Part of a block of a future height.
    #[error("block part for a future height {height}")]
    Future {
        /// Height of the part.
        height: validator::Height,
    },
    /// No block is expected: there is no proposal yet.
    #[error("unexpected block part: no proposal")]
    Unexpected,
    /// The part doesn't belong to the expected block.
    #[error("invalid block part: {0:#}")]
    InvalidPart(#[source] validator::PartError),
    /// The parts assembled into an invalid block.
    #[error("invalid block: {0:#}")]
    InvalidBlock(#[source] anyhow::Error),
    /// The application rejected the payload.
    #[error("invalid payload: {0:#}")]
    InvalidPayload(#[source] anyhow::Error),
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
    /// Processes a part of the expected block: the current proposal's block,
    /// or the block being committed.
    pub(crate) fn on_block_part(
        &mut self,
        ctx: &ctx::Ctx,
        msg: validator::BlockPartMsg,
    ) -> Result<(), Error> {
        if msg.height < self.height {
            return Err(Error::Old {
                current_height: self.height,
            });
        }
        if msg.height > self.height {
            return Err(Error::Future { height: msg.height });
        }
        let Some(parts) = &mut self.proposal_block_parts else {
            return Err(Error::Unexpected);
        };
        if !parts.add_part(msg.part).map_err(Error::InvalidPart)? {
            return Ok(());
        }
        let Some(data) = parts.assemble() else {
            return Ok(());
        };
        let block = validator::Block::decode(&data).map_err(Error::InvalidBlock)?;
        let block_id = block.id(parts);
        self.verify_block(&block)?;
        tracing::debug!(height = %block.height, hash = ?block_id.hash, "received complete block");
        self.proposal_block = Some(block);
        self.publish(Event::CompleteProposal {
            state: self.round_state(),
            block_id,
        });
        self.handle_complete_proposal(ctx)?;
        Ok(())
    }

    fn verify_block(&self, block: &validator::Block) -> Result<(), Error> {
        if block.chain_id != self.chain_id {
            return Err(Error::InvalidBlock(anyhow::format_err!(
                "chain id {}, want {}",
                block.chain_id,
                self.chain_id
            )));
        }
        if block.height != self.height {
            return Err(Error::InvalidBlock(anyhow::format_err!(
                "height {}, want {}",
                block.height,
                self.height
            )));
        }
        if block.last_block_id != self.last_block_id {
            return Err(Error::InvalidBlock(anyhow::format_err!(
                "last block id {:?}, want {:?}",
                block.last_block_id,
                self.last_block_id
            )));
        }
        if block.app_hash != self.app_hash {
            return Err(Error::InvalidBlock(anyhow::format_err!(
                "app hash {:?}, want {:?}",
                block.app_hash,
                self.app_hash
            )));
        }
        self.application
            .verify(block.height, &block.payload)
            .map_err(Error::InvalidPayload)
    }

    fn handle_complete_proposal(&mut self, ctx: &ctx::Ctx) -> ctx::Result<()> {
        let round = self.round;
        match self.step {
            // The round hasn't started yet: `enter_propose()` prevotes for
            // the complete proposal.
            validator::RoundStep::NewHeight => return Ok(()),
            validator::RoundStep::Propose if self.is_proposal_complete() => {
                return self.enter_prevote(ctx, round);
            }
            validator::RoundStep::Commit => return self.try_finalize_commit(),
            _ => {}
        }
        // A polka for the block may have been collected while the parts
        // were still missing.
        if let Some(Some(polka)) = self
            .votes
            .two_thirds_majority(round, validator::VoteType::Prevote)
        {
            if self.step < validator::RoundStep::Precommit
                && Some(polka) == self.proposal_block_id()
            {
                return self.enter_precommit(ctx, round);
            }
        }
        Ok(())
    }
}
