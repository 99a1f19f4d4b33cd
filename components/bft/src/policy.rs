//! Vote locking policy.
//!
//! The state machine decides *when* to vote; the policy decides *what* to
//! vote for. The policy only sees block ids; the state machine owns the
//! blocks and applies the lock changes the policy asks for.
use keel_roles::validator;
use std::fmt;

/// +2/3 prevotes observed in a round, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Polka {
    /// No +2/3 majority for a single value.
    None,
    /// +2/3 prevotes for nil.
    Nil,
    /// +2/3 prevotes for the block.
    Block(validator::BlockId),
}

/// Change of the lock requested by the policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockChange {
    /// Keep the current lock, if any.
    Keep,
    /// Lock on the precommitted block at the current round.
    Lock,
    /// Release the lock.
    Unlock,
}

/// Precommit decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Precommit {
    /// Block to precommit, `None` for nil.
    pub block_id: Option<validator::BlockId>,
    /// Lock change to apply. `Lock` requires `block_id` to be set.
    pub lock: LockChange,
}

/// Vote locking policy.
pub trait VotePolicy: fmt::Debug + Send + Sync {
    /// Chooses the block to prevote for. `locked` is the block the node is
    /// locked on, `proposal` the complete and valid proposal of the round.
    fn prevote(
        &self,
        locked: Option<&validator::BlockId>,
        proposal: Option<&validator::BlockId>,
    ) -> Option<validator::BlockId>;

    /// Chooses the precommit, given the polka of the round.
    fn precommit(
        &self,
        locked: Option<&validator::BlockId>,
        proposal: Option<&validator::BlockId>,
        polka: &Polka,
    ) -> Precommit;
}

/// Tendermint locking rules:
/// - prevote the locked block if locked, else the proposal, else nil;
/// - on a polka for a block we have, lock on it and precommit it;
/// - on a polka for nil, unlock and precommit nil;
/// - without a polka, precommit nil and keep the lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct TendermintPolicy;

impl VotePolicy for TendermintPolicy {
    fn prevote(
        &self,
        locked: Option<&validator::BlockId>,
        proposal: Option<&validator::BlockId>,
    ) -> Option<validator::BlockId> {
        locked.or(proposal).cloned()
    }

    fn precommit(
        &self,
        locked: Option<&validator::BlockId>,
        proposal: Option<&validator::BlockId>,
        polka: &Polka,
    ) -> Precommit {
        match polka {
            Polka::None => Precommit {
                block_id: None,
                lock: LockChange::Keep,
            },
            Polka::Nil => Precommit {
                block_id: None,
                lock: LockChange::Unlock,
            },
            Polka::Block(id) if locked == Some(id) || proposal == Some(id) => Precommit {
                block_id: Some(id.clone()),
                lock: LockChange::Lock,
            },
            // Polka for a block we don't have: it can't be precommitted, and
            // the lock is stale.
            Polka::Block(_) => Precommit {
                block_id: None,
                lock: LockChange::Unlock,
            },
        }
    }
}
