use super::StateMachine;
use crate::{events::Event, vote_set::ConflictingVotes};
use keel_concurrency::{ctx, error::Wrap};
use keel_roles::validator;

/// Errors that can occur when processing a Vote message.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Vote for a past height.
    #[error("vote for a past height (current height: {current_height})")]
    Old {
        /// Current height.
        current_height: validator::Height,
    },
    /// Vote for a future height.
    #[error("vote for a future height {height}")]
    Future {
        /// Height of the vote.
        height: validator::Height,
    },
    /// Invalid vote.
    #[error("invalid vote: {0:#}")]
    InvalidMessage(#[source] validator::VoteVerifyError),
    /// The signer already voted differently at the same height, round and
    /// vote type. The pair is evidence of equivocation.
    #[error("equivocation evidence: {0:#}")]
    Conflicting(#[source] ConflictingVotes),
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
    /// Processes a prevote or precommit of the current height.
    pub(crate) fn on_vote(
        &mut self,
        ctx: &ctx::Ctx,
        signed: validator::SignedVote,
    ) -> Result<(), Error> {
        let vote = &signed.vote;
        if vote.height < self.height {
            return Err(Error::Old {
                current_height: self.height,
            });
        }
        if vote.height > self.height {
            return Err(Error::Future {
                height: vote.height,
            });
        }
        signed
            .verify(&self.chain_id, &self.committee)
            .map_err(Error::InvalidMessage)?;
        let weight = self
            .committee
            .get(signed.validator_index as usize)
            .map_or(0, |v| v.weight);

        let (round, vote_type) = (vote.round, vote.vote_type);
        let had_majority = self.votes.two_thirds_majority(round, vote_type).is_some();
        if !self
            .votes
            .add(&signed, weight)
            .map_err(Error::Conflicting)?
        {
            tracing::debug!(validator = %signed.validator_address, %round, ?vote_type, "duplicate vote");
            return Ok(());
        }
        tracing::debug!(
            validator = %signed.validator_address,
            %round,
            ?vote_type,
            block = ?vote.block_id.as_ref().map(|id| &id.hash),
            "added vote"
        );
        let majority = self.votes.two_thirds_majority(round, vote_type);
        self.publish(Event::Vote(Box::new(signed)));

        match vote_type {
            validator::VoteType::Prevote => {
                if let (false, Some(block_id)) = (had_majority, &majority) {
                    self.publish(Event::Polka {
                        state: validator::RoundState {
                            height: self.height,
                            round,
                            step: self.step,
                        },
                        block_id: block_id.clone(),
                    });
                }
                self.on_prevotes(ctx, round, majority)?;
            }
            validator::VoteType::Precommit => self.on_precommits(ctx, round, majority)?,
        }
        Ok(())
    }

    fn on_prevotes(
        &mut self,
        ctx: &ctx::Ctx,
        round: validator::Round,
        majority: Option<Option<validator::BlockId>>,
    ) -> ctx::Result<()> {
        let prevote = validator::VoteType::Prevote;
        if self.round < round && self.votes.has_two_thirds_any(round, prevote) {
            // Skip to the round the others are in.
            return self.enter_new_round(ctx, round);
        }
        if self.round == round && self.step >= validator::RoundStep::Prevote {
            match majority {
                Some(block_id) if block_id.is_none() || self.is_proposal_complete() => {
                    return self.enter_precommit(ctx, round);
                }
                _ => {
                    if self.votes.has_two_thirds_any(round, prevote) {
                        self.enter_prevote_wait(round);
                    }
                }
            }
            return Ok(());
        }
        // The polka backing the proof-of-lock round of the proposal may
        // complete it.
        if self
            .proposal
            .as_ref()
            .map_or(false, |p| p.pol_round.is_some() && p.pol_round == round)
            && self.is_proposal_complete()
        {
            let current = self.round;
            return self.enter_prevote(ctx, current);
        }
        Ok(())
    }

    fn on_precommits(
        &mut self,
        ctx: &ctx::Ctx,
        round: validator::Round,
        majority: Option<Option<validator::BlockId>>,
    ) -> ctx::Result<()> {
        match majority {
            Some(Some(_)) => {
                self.enter_new_round(ctx, round)?;
                self.enter_precommit(ctx, round)?;
                self.enter_commit(round)
            }
            Some(None) => {
                self.enter_new_round(ctx, round)?;
                self.enter_precommit(ctx, round)?;
                self.enter_new_round(ctx, round.next())
            }
            None => {
                if self.round <= round
                    && self
                        .votes
                        .has_two_thirds_any(round, validator::VoteType::Precommit)
                {
                    self.enter_new_round(ctx, round)?;
                    self.enter_precommit_wait(round);
                }
                Ok(())
            }
        }
    }
}
