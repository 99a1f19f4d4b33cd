use crate::{
    replay::{self, ReplayOutcome},
    state_machine::{Input, StateMachine},
    testonly::{self, InMemoryApplication},
    OutboundMessage,
};
use anyhow::Context as _;
use keel_concurrency::ctx;
use keel_roles::validator::{self, testonly::Setup};
use keel_storage::{testonly::InMemorySignRecordStore, wal, SigningRecord};
use std::{path::PathBuf, sync::Arc};

mod state_machine;

/// A validator's state machine, recovered from a WAL in a temporary
/// directory, driven input by input.
pub(crate) struct TestNode {
    pub(crate) machine: StateMachine,
    pub(crate) outbound: ctx::channel::UnboundedReceiver<OutboundMessage>,
    pub(crate) app: Arc<InMemoryApplication>,
    pub(crate) outcome: ReplayOutcome,
    pub(crate) setup: Setup,
}

impl std::fmt::Debug for TestNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestNode")
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

impl TestNode {
    /// Recovers validator `index` of `setup` from the WAL at `wal_path`,
    /// with the signing record held by `store`.
    pub(crate) fn recover(
        ctx: &ctx::Ctx,
        setup: &Setup,
        index: usize,
        wal_path: PathBuf,
        store: InMemorySignRecordStore,
    ) -> Result<Self, replay::Error> {
        let app = Arc::new(InMemoryApplication::default());
        let cfg = testonly::make_config(
            setup.genesis.clone(),
            setup.validator_keys[index].clone(),
            wal_path.clone(),
            store,
            app.clone(),
        );
        let writer = wal::Wal::open(&wal_path)?;
        let reader = wal::WalReader::open(&wal_path)?;
        let (send, outbound) = ctx::channel::unbounded();
        let mut machine = StateMachine::new(cfg, writer, send).context("StateMachine::new()")?;
        let outcome = replay::replay(ctx, &mut machine, reader)?;
        Ok(Self {
            machine,
            outbound,
            app,
            outcome,
            setup: setup.clone(),
        })
    }

    /// Fresh validator `index` of `setup`, with an empty WAL in `dir`.
    pub(crate) fn new(ctx: &ctx::Ctx, setup: &Setup, index: usize, dir: &tempfile::TempDir) -> Self {
        Self::recover(
            ctx,
            setup,
            index,
            dir.path().join("cs.wal"),
            InMemorySignRecordStore::default(),
        )
        .unwrap()
    }

    /// Fires the scheduled timeout.
    pub(crate) fn fire_timeout(&mut self, ctx: &ctx::Ctx) {
        let timeout = self.machine.scheduled.clone().expect("no timeout scheduled");
        self.machine.process(ctx, Input::Timeout(timeout)).unwrap();
    }

    /// Delivers a message from a peer.
    pub(crate) fn deliver(&mut self, ctx: &ctx::Ctx, msg: validator::ConsensusMsg) {
        let msg = validator::PeerMessage {
            peer: Some(validator::PeerId("peer".to_owned())),
            msg,
        };
        self.machine.process(ctx, Input::Message(msg)).unwrap();
    }

    /// Vote of validator `index` for the current height.
    pub(crate) fn peer_vote(
        &self,
        index: usize,
        vote_type: validator::VoteType,
        round: validator::Round,
        block_id: Option<validator::BlockId>,
    ) -> validator::ConsensusMsg {
        let vote = validator::Vote {
            vote_type,
            height: self.machine.height,
            round,
            block_id,
        };
        validator::ConsensusMsg::Vote(vote.sign(
            &self.setup.genesis.chain_id,
            &self.setup.genesis.committee,
            &self.setup.validator_keys[index],
        ))
    }

    /// Messages broadcast since the last call.
    pub(crate) fn take_outbound(&mut self) -> Vec<OutboundMessage> {
        std::iter::from_fn(|| self.outbound.try_recv()).collect()
    }

    pub(crate) fn round_state(&self) -> validator::RoundState {
        self.machine.round_state()
    }
}

/// Payloads of the WAL at `path`.
pub(crate) fn read_payloads(path: &std::path::Path) -> Vec<wal::Payload> {
    wal::Wal::read_all(path)
        .unwrap()
        .into_iter()
        .map(|e| e.payload)
        .collect()
}

/// Writes `payloads` to a new WAL at `path`.
pub(crate) fn write_payloads(ctx: &ctx::Ctx, path: &std::path::Path, payloads: &[wal::Payload]) {
    let mut wal = wal::Wal::open(path).unwrap();
    for payload in payloads {
        wal.append(wal::Entry {
            time: ctx.now_utc(),
            payload: payload.clone(),
        })
        .unwrap();
    }
}

/// Signing record the guard holds right after signing `msg`, if `msg` is
/// signed.
pub(crate) fn record_for(
    chain_id: &validator::ChainId,
    msg: &validator::ConsensusMsg,
) -> Option<SigningRecord> {
    match msg {
        validator::ConsensusMsg::Proposal(p) => Some(SigningRecord {
            height: p.proposal.height,
            round: p.proposal.round,
            step: validator::SignStep::Propose,
            sign_bytes: p.proposal.sign_bytes(chain_id),
            signature: Some(p.signature.clone()),
        }),
        validator::ConsensusMsg::Vote(v) => Some(SigningRecord {
            height: v.vote.height,
            round: v.vote.round,
            step: match v.vote.vote_type {
                validator::VoteType::Prevote => validator::SignStep::Prevote,
                validator::VoteType::Precommit => validator::SignStep::Precommit,
            },
            sign_bytes: v.vote.sign_bytes(chain_id),
            signature: Some(v.signature.clone()),
        }),
        validator::ConsensusMsg::BlockPart(_) => None,
    }
}

/// Signing record after the last message this node signed among `payloads`.
pub(crate) fn last_record(chain_id: &validator::ChainId, payloads: &[wal::Payload]) -> SigningRecord {
    payloads
        .iter()
        .rev()
        .find_map(|p| match p {
            wal::Payload::Message(validator::PeerMessage { peer: None, msg }) => {
                record_for(chain_id, msg)
            }
            _ => None,
        })
        .unwrap_or_default()
}

pub(crate) fn marker(height: u64, round: i32, step: validator::RoundStep) -> wal::Payload {
    wal::Payload::RoundStep(validator::RoundState {
        height: validator::Height(height),
        round: validator::Round(round),
        step,
    })
}
