//! Votes of a height, collected per round and vote type.
use keel_roles::validator;
use std::collections::{BTreeMap, HashMap};

/// A validator signed two different votes for the same (height, round, type).
#[derive(Debug, thiserror::Error)]
#[error("conflicting votes from {}: {:?} and {:?}", .existing.validator_address, .existing.vote.block_id, .new.vote.block_id)]
pub(crate) struct ConflictingVotes {
    pub(crate) existing: Box<validator::SignedVote>,
    pub(crate) new: Box<validator::SignedVote>,
}

/// Votes of a single (height, round, type).
#[derive(Debug)]
pub(crate) struct VoteSet {
    quorum: u64,
    votes: BTreeMap<u32, validator::SignedVote>,
    sum: u64,
    by_block: HashMap<Option<validator::BlockId>, u64>,
    /// First value which reached the quorum.
    maj23: Option<Option<validator::BlockId>>,
}

impl VoteSet {
    fn new(quorum: u64) -> Self {
        Self {
            quorum,
            votes: BTreeMap::new(),
            sum: 0,
            by_block: HashMap::new(),
            maj23: None,
        }
    }

    /// Adds a verified vote of the given weight. Returns `false` for a duplicate.
    fn add(&mut self, vote: &validator::SignedVote, weight: u64) -> Result<bool, ConflictingVotes> {
        if let Some(existing) = self.votes.get(&vote.validator_index) {
            if existing.vote.block_id == vote.vote.block_id {
                return Ok(false);
            }
            return Err(ConflictingVotes {
                existing: Box::new(existing.clone()),
                new: Box::new(vote.clone()),
            });
        }
        self.votes.insert(vote.validator_index, vote.clone());
        self.sum += weight;
        let w = self.by_block.entry(vote.vote.block_id.clone()).or_default();
        *w += weight;
        if self.maj23.is_none() && *w >= self.quorum {
            self.maj23 = Some(vote.vote.block_id.clone());
        }
        Ok(true)
    }

    /// Whether +2/3 voted, for anything.
    pub(crate) fn has_two_thirds_any(&self) -> bool {
        self.sum >= self.quorum
    }

    /// The value with +2/3 votes, if any. `Some(None)` is +2/3 for nil.
    pub(crate) fn two_thirds_majority(&self) -> Option<&Option<validator::BlockId>> {
        self.maj23.as_ref()
    }
}

/// All the votes of a height.
#[derive(Debug)]
pub(crate) struct HeightVoteSet {
    quorum: u64,
    sets: BTreeMap<(validator::Round, validator::VoteType), VoteSet>,
}

impl HeightVoteSet {
    pub(crate) fn new(quorum: u64) -> Self {
        Self {
            quorum,
            sets: BTreeMap::new(),
        }
    }

    /// Adds a verified vote.
    pub(crate) fn add(
        &mut self,
        vote: &validator::SignedVote,
        weight: u64,
    ) -> Result<bool, ConflictingVotes> {
        self.sets
            .entry((vote.vote.round, vote.vote.vote_type))
            .or_insert_with(|| VoteSet::new(self.quorum))
            .add(vote, weight)
    }

    /// Votes of the given round and type, if any were received.
    pub(crate) fn get(
        &self,
        round: validator::Round,
        vote_type: validator::VoteType,
    ) -> Option<&VoteSet> {
        self.sets.get(&(round, vote_type))
    }

    /// Whether +2/3 voted for anything in the given round.
    pub(crate) fn has_two_thirds_any(
        &self,
        round: validator::Round,
        vote_type: validator::VoteType,
    ) -> bool {
        self.get(round, vote_type)
            .map_or(false, VoteSet::has_two_thirds_any)
    }

    /// The value with +2/3 votes in the given round, if any.
    pub(crate) fn two_thirds_majority(
        &self,
        round: validator::Round,
        vote_type: validator::VoteType,
    ) -> Option<Option<validator::BlockId>> {
        self.get(round, vote_type)?.two_thirds_majority().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use keel_concurrency::ctx;
    use keel_roles::validator::testonly::Setup;

    fn vote(
        setup: &Setup,
        signer: usize,
        vote_type: validator::VoteType,
        block_id: Option<validator::BlockId>,
    ) -> validator::SignedVote {
        validator::Vote {
            vote_type,
            height: validator::Height(1),
            round: validator::Round(0),
            block_id,
        }
        .sign(
            &setup.genesis.chain_id,
            &setup.genesis.committee,
            &setup.validator_keys[signer],
        )
    }

    #[test]
    fn test_quorum() {
        let ctx = ctx::test_root(&ctx::RealClock);
        let setup = Setup::new(&mut ctx.rng(), 4);
        let block = setup.make_block(
            validator::Height(1),
            None,
            validator::AppHash::default(),
            validator::Payload(vec![1, 2, 3]),
        );
        let id = block.id(&block.make_part_set());
        let prevote = validator::VoteType::Prevote;
        let round = validator::Round(0);
        let mut votes = HeightVoteSet::new(setup.genesis.committee.quorum_threshold());

        assert!(votes.add(&vote(&setup, 0, prevote, Some(id.clone())), 1).unwrap());
        assert!(votes.add(&vote(&setup, 1, prevote, None), 1).unwrap());
        // Duplicate.
        assert!(!votes.add(&vote(&setup, 1, prevote, None), 1).unwrap());
        assert!(!votes.has_two_thirds_any(round, prevote));

        assert!(votes.add(&vote(&setup, 2, prevote, Some(id.clone())), 1).unwrap());
        assert!(votes.has_two_thirds_any(round, prevote));
        assert_eq!(None, votes.two_thirds_majority(round, prevote));

        assert!(votes.add(&vote(&setup, 3, prevote, Some(id.clone())), 1).unwrap());
        assert_eq!(Some(Some(id.clone())), votes.two_thirds_majority(round, prevote));
        // Precommits are counted separately.
        assert!(!votes.has_two_thirds_any(round, validator::VoteType::Precommit));

        assert_matches!(
            votes.add(&vote(&setup, 0, prevote, None), 1),
            Err(ConflictingVotes { .. })
        );
    }
}
