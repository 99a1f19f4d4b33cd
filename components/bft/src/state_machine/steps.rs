//! Round step transitions. Each `enter_*` is a no-op unless the machine is
//! in the given round at an earlier step.
use super::StateMachine;
use crate::{
    events::Event,
    guard, metrics,
    policy::{LockChange, Polka},
};
use keel_concurrency::{ctx, time};
use keel_roles::validator;

impl StateMachine {
    /// Moves to `(round, step)` of the current height.
    pub(crate) fn update_round_step(&mut self, round: validator::Round, step: validator::RoundStep) {
        self.round = round;
        self.step = step;
        let state = self.round_state();
        tracing::debug!(%state, "entering round step");
        self.transitions.push_back(state);
        self.round_state_watch.send_replace(state);
        metrics::METRICS.height.set(self.height.0);
        metrics::METRICS
            .round
            .set(u64::try_from(round.0).unwrap_or_default());
        self.publish(Event::NewRoundStep(state));
    }

    /// Schedules a timeout for the current round and the given step,
    /// replacing any scheduled before.
    pub(crate) fn schedule_timeout(&mut self, duration: time::Duration, step: validator::RoundStep) {
        self.scheduled = Some(validator::TimeoutInfo {
            duration_ms: duration.whole_milliseconds().try_into().unwrap_or(u64::MAX),
            height: self.height,
            round: self.round,
            step,
        });
    }

    pub(crate) fn enter_new_round(
        &mut self,
        ctx: &ctx::Ctx,
        round: validator::Round,
    ) -> ctx::Result<()> {
        if self.round > round
            || (self.round == round && self.step != validator::RoundStep::NewHeight)
        {
            return Ok(());
        }
        if self.round != round {
            self.proposal = None;
            self.proposal_block = None;
            self.proposal_block_parts = None;
        }
        tracing::debug!(height = %self.height, %round, "entering new round");
        self.publish(Event::NewRound(validator::RoundState {
            height: self.height,
            round,
            step: validator::RoundStep::Propose,
        }));
        self.enter_propose(ctx, round)
    }

    pub(crate) fn enter_propose(
        &mut self,
        ctx: &ctx::Ctx,
        round: validator::Round,
    ) -> ctx::Result<()> {
        if self.round > round
            || (self.round == round && self.step >= validator::RoundStep::Propose)
        {
            return Ok(());
        }
        self.update_round_step(round, validator::RoundStep::Propose);
        self.schedule_timeout(self.timeouts.propose(round), validator::RoundStep::Propose);
        if self.is_proposer() {
            self.decide_proposal()?;
        }
        if self.is_proposal_complete() {
            self.enter_prevote(ctx, round)?;
        }
        Ok(())
    }

    pub(crate) fn enter_prevote(
        &mut self,
        _ctx: &ctx::Ctx,
        round: validator::Round,
    ) -> ctx::Result<()> {
        if self.round != round || self.step >= validator::RoundStep::Prevote {
            return Ok(());
        }
        self.update_round_step(round, validator::RoundStep::Prevote);
        let block_id = self.policy.prevote(
            self.locked_block_id().as_ref(),
            self.proposal_block_id().as_ref(),
        );
        self.sign_vote(validator::VoteType::Prevote, block_id)
    }

    pub(crate) fn enter_prevote_wait(&mut self, round: validator::Round) {
        if self.round != round || self.step >= validator::RoundStep::PrevoteWait {
            return;
        }
        self.update_round_step(round, validator::RoundStep::PrevoteWait);
        self.schedule_timeout(self.timeouts.prevote(round), validator::RoundStep::PrevoteWait);
    }

    pub(crate) fn enter_precommit(
        &mut self,
        _ctx: &ctx::Ctx,
        round: validator::Round,
    ) -> ctx::Result<()> {
        if self.round != round || self.step >= validator::RoundStep::Precommit {
            return Ok(());
        }
        self.update_round_step(round, validator::RoundStep::Precommit);
        let polka = match self
            .votes
            .two_thirds_majority(round, validator::VoteType::Prevote)
        {
            None => Polka::None,
            Some(None) => Polka::Nil,
            Some(Some(block_id)) => Polka::Block(block_id),
        };
        let locked = self.locked_block_id();
        let proposal = self.proposal_block_id();
        let mut decision = self
            .policy
            .precommit(locked.as_ref(), proposal.as_ref(), &polka);
        match decision.lock {
            LockChange::Keep => {}
            LockChange::Unlock => self.unlock(),
            LockChange::Lock => {
                let target = decision.block_id.clone();
                if target.is_some() && target == locked {
                    self.locked_round = round;
                    self.publish_lock(target);
                } else if target.is_some() && target == proposal {
                    self.locked_round = round;
                    self.locked_block = self
                        .proposal_block
                        .clone()
                        .zip(self.proposal_block_parts.clone());
                    self.publish_lock(target);
                } else {
                    tracing::warn!(
                        ?target,
                        "vote policy asked to lock on a block we don't have, precommitting nil"
                    );
                    decision.block_id = None;
                }
            }
        }
        self.sign_vote(validator::VoteType::Precommit, decision.block_id)
    }

    pub(crate) fn enter_precommit_wait(&mut self, round: validator::Round) {
        if self.round != round || self.step >= validator::RoundStep::PrecommitWait {
            return;
        }
        self.update_round_step(round, validator::RoundStep::PrecommitWait);
        self.schedule_timeout(
            self.timeouts.precommit(round),
            validator::RoundStep::PrecommitWait,
        );
    }

    fn unlock(&mut self) {
        if self.locked_block.take().is_none() {
            return;
        }
        self.locked_round = validator::Round::NONE;
        self.publish(Event::Unlock(self.round_state()));
    }

    fn publish_lock(&self, block_id: Option<validator::BlockId>) {
        if let Some(block_id) = block_id {
            self.publish(Event::Lock {
                state: self.round_state(),
                block_id,
            });
        }
    }

    fn is_proposer(&self) -> bool {
        self.validator_index.is_some()
            && self.committee.proposer(self.height, self.round).key == self.guard.public_key()
    }

    /// Signs and queues a vote for the current round. Positions the guard
    /// already moved past are skipped: the vote was produced and logged
    /// before.
    pub(crate) fn sign_vote(
        &mut self,
        vote_type: validator::VoteType,
        block_id: Option<validator::BlockId>,
    ) -> ctx::Result<()> {
        let Some(index) = self.validator_index else {
            return Ok(());
        };
        let vote = validator::Vote {
            vote_type,
            height: self.height,
            round: self.round,
            block_id,
        };
        match self.guard.sign_vote(vote, index) {
            Ok(vote) => {
                self.internal_queue
                    .push_back(validator::ConsensusMsg::Vote(vote));
                Ok(())
            }
            Err(err @ guard::Error::Regression { .. }) => {
                tracing::debug!("vote not produced: {err:#}");
                Ok(())
            }
            Err(err) => Err(anyhow::Error::from(err).context("sign_vote()").into()),
        }
    }
}
