//! Configuration of the bft component.
use crate::{events::EventBus, policy::VotePolicy, Application};
use keel_concurrency::time;
use keel_roles::validator;
use keel_storage::SignRecordStore;
use std::{path::PathBuf, sync::Arc};

/// Durations of the consensus timeouts. Timeouts of later rounds grow
/// linearly by the corresponding delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Wait for the proposal, in round 0.
    pub propose: time::Duration,
    /// Increment of `propose` per round.
    pub propose_delta: time::Duration,
    /// Wait for more prevotes after +2/3 of any prevotes, in round 0.
    pub prevote: time::Duration,
    /// Increment of `prevote` per round.
    pub prevote_delta: time::Duration,
    /// Wait for more precommits after +2/3 of any precommits, in round 0.
    pub precommit: time::Duration,
    /// Increment of `precommit` per round.
    pub precommit_delta: time::Duration,
    /// Wait after a commit, before starting the next height.
    pub commit: time::Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            propose: time::Duration::milliseconds(3000),
            propose_delta: time::Duration::milliseconds(500),
            prevote: time::Duration::milliseconds(1000),
            prevote_delta: time::Duration::milliseconds(500),
            precommit: time::Duration::milliseconds(1000),
            precommit_delta: time::Duration::milliseconds(500),
            commit: time::Duration::milliseconds(1000),
        }
    }
}

impl Timeouts {
    /// Propose timeout of the round.
    pub fn propose(&self, round: validator::Round) -> time::Duration {
        self.propose + self.propose_delta * round.0.max(0)
    }

    /// Prevote-wait timeout of the round.
    pub fn prevote(&self, round: validator::Round) -> time::Duration {
        self.prevote + self.prevote_delta * round.0.max(0)
    }

    /// Precommit-wait timeout of the round.
    pub fn precommit(&self, round: validator::Round) -> time::Duration {
        self.precommit + self.precommit_delta * round.0.max(0)
    }
}

/// Configuration of the bft component.
#[derive(Debug)]
pub struct Config {
    /// The validator's secret key. Used only through the signing guard.
    pub secret_key: validator::SecretKey,
    /// Genesis of the chain.
    pub genesis: validator::Genesis,
    /// Path of the consensus write-ahead log.
    pub wal_path: PathBuf,
    /// Storage of the signing record of `secret_key`.
    pub sign_record_store: Box<dyn SignRecordStore>,
    /// Bus on which consensus events are published.
    pub event_bus: Arc<EventBus>,
    /// Application proposing, verifying and executing blocks.
    pub application: Arc<dyn Application>,
    /// Consensus timeouts.
    pub timeouts: Timeouts,
    /// Vote locking policy.
    pub policy: Box<dyn VotePolicy>,
}
