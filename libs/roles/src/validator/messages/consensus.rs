//! Round state and the messages driving it.
use super::{BlockPartMsg, SignedProposal, SignedVote};
use keel_concurrency::time;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Height of a block in the chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Height(pub u64);

impl Height {
    /// Returns the next height.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Height {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, fmt)
    }
}

/// Round within a height. Rounds start at 0; `Round::NONE` (-1) marks the
/// absence of a round, e.g. a proposal without a proof-of-lock round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Round(pub i32);

impl Round {
    /// No round.
    pub const NONE: Self = Self(-1);

    /// Returns the next round.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Whether this is an actual round rather than `NONE`.
    pub fn is_some(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for Round {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, fmt)
    }
}

/// Step within a round. Ordered in the sequence the steps are entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStep {
    /// Waiting for the start of the height.
    NewHeight,
    /// Waiting for the proposal.
    Propose,
    /// Prevoted, collecting prevotes.
    Prevote,
    /// Saw +2/3 prevotes for anything, waiting for more.
    PrevoteWait,
    /// Precommitted, collecting precommits.
    Precommit,
    /// Saw +2/3 precommits for anything, waiting for more.
    PrecommitWait,
    /// Committing the block.
    Commit,
}

/// Position of the state machine. The derived ordering is lexicographic on
/// (height, round, step).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoundState {
    /// Height.
    pub height: Height,
    /// Round.
    pub round: Round,
    /// Step.
    pub step: RoundStep,
}

impl fmt::Display for RoundState {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}/{}/{:?}", self.height, self.round, self.step)
    }
}

/// A scheduled timeout. Logged when it fires; `duration_ms` is the configured
/// delay that elapsed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutInfo {
    /// Delay in milliseconds.
    pub duration_ms: u64,
    /// Height the timeout was scheduled at.
    pub height: Height,
    /// Round the timeout was scheduled at.
    pub round: Round,
    /// Step the timeout was scheduled at.
    pub step: RoundStep,
}

impl TimeoutInfo {
    /// Delay as a duration.
    pub fn duration(&self) -> time::Duration {
        time::Duration::milliseconds(self.duration_ms.try_into().unwrap_or(i64::MAX))
    }

    /// Round state the timeout belongs to.
    pub fn round_state(&self) -> RoundState {
        RoundState {
            height: self.height,
            round: self.round,
            step: self.step,
        }
    }
}

/// Step of a signature, as tracked by the signing guard.
/// `None` is below any actual signing step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignStep {
    /// Nothing signed yet.
    #[default]
    None,
    /// Proposal.
    Propose,
    /// Prevote.
    Prevote,
    /// Precommit.
    Precommit,
}

/// Consensus message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMsg {
    /// Signed proposal of a block.
    Proposal(SignedProposal),
    /// Signed prevote or precommit.
    Vote(SignedVote),
    /// Part of the proposed block.
    BlockPart(BlockPartMsg),
}

impl ConsensusMsg {
    /// Height the message refers to.
    pub fn height(&self) -> Height {
        match self {
            Self::Proposal(m) => m.proposal.height,
            Self::Vote(m) => m.vote.height,
            Self::BlockPart(m) => m.height,
        }
    }

    /// Round the message refers to.
    pub fn round(&self) -> Round {
        match self {
            Self::Proposal(m) => m.proposal.round,
            Self::Vote(m) => m.vote.round,
            Self::BlockPart(m) => m.round,
        }
    }

    /// Short label of the message type, for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Proposal(_) => "proposal",
            Self::Vote(_) => "vote",
            Self::BlockPart(_) => "block_part",
        }
    }
}

/// Identifier of a network peer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

/// Consensus message together with its origin. `peer` is `None` for messages
/// this node produced itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMessage {
    /// Sender.
    pub peer: Option<PeerId>,
    /// Message.
    pub msg: ConsensusMsg,
}

impl PeerMessage {
    /// Message produced by this node.
    pub fn internal(msg: ConsensusMsg) -> Self {
        Self { peer: None, msg }
    }
}
