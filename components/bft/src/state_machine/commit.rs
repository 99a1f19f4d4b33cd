use super::StateMachine;
use crate::{events::Event, metrics, vote_set::HeightVoteSet};
use anyhow::Context as _;
use keel_concurrency::ctx;
use keel_roles::validator;

impl StateMachine {
    /// Enters the commit step for the block which got +2/3 precommits in
    /// `commit_round`. Finalizes right away if the block is at hand;
    /// otherwise waits for its parts.
    pub(crate) fn enter_commit(&mut self, commit_round: validator::Round) -> ctx::Result<()> {
        if self.step >= validator::RoundStep::Commit {
            return Ok(());
        }
        let Some(Some(block_id)) = self
            .votes
            .two_thirds_majority(commit_round, validator::VoteType::Precommit)
        else {
            return Err(anyhow::format_err!(
                "entering commit without +2/3 precommits for a block in round {commit_round}"
            )
            .into());
        };
        let round = self.round;
        self.update_round_step(round, validator::RoundStep::Commit);
        self.commit_round = commit_round;

        if self.locked_block_id().as_ref() == Some(&block_id) {
            tracing::debug!("committing the locked block");
            let (block, parts) = self.locked_block.clone().context("locked block")?;
            self.proposal_block = Some(block);
            self.proposal_block_parts = Some(parts);
        }
        if self.proposal_block_id().as_ref() != Some(&block_id) {
            let parts_match = self
                .proposal_block_parts
                .as_ref()
                .map_or(false, |p| *p.header() == block_id.parts);
            if !parts_match {
                tracing::info!(
                    hash = ?block_id.hash,
                    "committing a block we don't have, waiting for its parts"
                );
                self.proposal_block = None;
                self.proposal_block_parts = Some(validator::PartSet::from_header(block_id.parts));
            }
        }
        self.try_finalize_commit()
    }

    /// Finalizes the commit if the committed block is complete.
    pub(crate) fn try_finalize_commit(&mut self) -> ctx::Result<()> {
        if self.step != validator::RoundStep::Commit {
            return Ok(());
        }
        let Some(Some(block_id)) = self
            .votes
            .two_thirds_majority(self.commit_round, validator::VoteType::Precommit)
        else {
            return Ok(());
        };
        if self.proposal_block_id().as_ref() != Some(&block_id) {
            return Ok(());
        }
        let block = self.proposal_block.take().context("proposal block")?;
        self.finalize_commit(block, block_id)
    }

    fn finalize_commit(
        &mut self,
        block: validator::Block,
        block_id: validator::BlockId,
    ) -> ctx::Result<()> {
        let app_hash = self
            .application
            .commit(&block)
            .with_context(|| format!("application.commit({})", block.height))?;
        tracing::info!(
            height = %block.height,
            round = %self.commit_round,
            hash = ?block_id.hash,
            "committed block"
        );
        metrics::METRICS.committed_blocks.inc();
        let height = block.height;
        self.publish(Event::NewBlock {
            block: Box::new(block),
            block_id: block_id.clone(),
        });
        self.committed_watch.send_replace(Some(height));
        self.update_to_next_height(block_id, app_hash);
        Ok(())
    }

    fn update_to_next_height(&mut self, block_id: validator::BlockId, app_hash: validator::AppHash) {
        self.height = self.height.next();
        self.last_block_id = Some(block_id);
        self.app_hash = app_hash;
        self.votes = HeightVoteSet::new(self.committee.quorum_threshold());
        self.proposal = None;
        self.proposal_block = None;
        self.proposal_block_parts = None;
        self.locked_round = validator::Round::NONE;
        self.locked_block = None;
        self.commit_round = validator::Round::NONE;
        self.update_round_step(validator::Round(0), validator::RoundStep::NewHeight);
        self.schedule_timeout(self.timeouts.commit, validator::RoundStep::NewHeight);
    }
}
