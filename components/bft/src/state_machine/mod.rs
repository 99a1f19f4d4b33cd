//! Height/round/step state machine.
//!
//! The machine consumes one input at a time. Every input is logged to the WAL
//! before it is handled, and every round step the handling enters is logged
//! right after it, as a marker. Messages the machine produces itself are
//! signed through the guard, queued, and then processed exactly like inputs
//! from the network, before the next external input.
//!
//! Handling never touches the WAL, so the same handlers serve both live
//! operation (through `process()`) and recovery (driven by `crate::replay`).
use crate::{
    config::Timeouts,
    events::{Event, EventBus},
    guard::SigningGuard,
    metrics,
    policy::VotePolicy,
    vote_set::HeightVoteSet,
    Application, Config, OutboundMessage,
};
use anyhow::Context as _;
use keel_concurrency::{ctx, error::Wrap as _, metrics::LatencyHistogramExt as _, sync};
use keel_roles::validator;
use keel_storage::wal;
use std::{collections::VecDeque, sync::Arc};

pub(crate) mod block_part;
mod commit;
pub(crate) mod proposal;
mod steps;
pub(crate) mod timeout;
pub(crate) mod vote;

/// Input of the state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Input {
    /// Consensus message, from a peer or from this node.
    Message(validator::PeerMessage),
    /// Fired timeout.
    Timeout(validator::TimeoutInfo),
}

impl Input {
    fn into_payload(self) -> wal::Payload {
        match self {
            Self::Message(m) => wal::Payload::Message(m),
            Self::Timeout(t) => wal::Payload::Timeout(t),
        }
    }
}

/// The StateMachine struct contains the consensus state of a validator and
/// implements the round-based voting logic.
#[derive(Debug)]
pub(crate) struct StateMachine {
    pub(crate) chain_id: validator::ChainId,
    pub(crate) committee: validator::Committee,
    /// Index of this node in the committee, if it is a member.
    pub(crate) validator_index: Option<u32>,
    pub(crate) timeouts: Timeouts,
    pub(crate) application: Arc<dyn Application>,
    pub(crate) policy: Box<dyn VotePolicy>,
    pub(crate) events: Arc<EventBus>,

    /// Signs every message this node produces.
    pub(crate) guard: SigningGuard,
    pub(crate) wal: wal::Wal,
    /// Channel through which produced messages are broadcast.
    pub(crate) outbound_channel: ctx::channel::UnboundedSender<OutboundMessage>,
    /// Last scheduled timeout, as seen by the ticker.
    pub(crate) ticker: sync::watch::Sender<Option<validator::TimeoutInfo>>,
    pub(crate) round_state_watch: sync::watch::Sender<validator::RoundState>,
    pub(crate) committed_watch: sync::watch::Sender<Option<validator::Height>>,

    pub(crate) height: validator::Height,
    pub(crate) round: validator::Round,
    pub(crate) step: validator::RoundStep,
    /// Proposal of the current round.
    pub(crate) proposal: Option<validator::Proposal>,
    /// Block of the current proposal (or of the block being committed),
    /// once all its parts arrived and it got validated.
    pub(crate) proposal_block: Option<validator::Block>,
    pub(crate) proposal_block_parts: Option<validator::PartSet>,
    /// Round of the last lock, or `Round::NONE`.
    pub(crate) locked_round: validator::Round,
    pub(crate) locked_block: Option<(validator::Block, validator::PartSet)>,
    pub(crate) votes: HeightVoteSet,
    /// Round in which the block being committed got +2/3 precommits.
    pub(crate) commit_round: validator::Round,
    pub(crate) last_block_id: Option<validator::BlockId>,
    pub(crate) app_hash: validator::AppHash,

    /// Messages produced by this node, not processed yet.
    pub(crate) internal_queue: VecDeque<validator::ConsensusMsg>,
    /// Round states entered since the last input, not logged yet.
    pub(crate) transitions: VecDeque<validator::RoundState>,
    /// Timeout to fire next, if any.
    pub(crate) scheduled: Option<validator::TimeoutInfo>,
}

impl StateMachine {
    /// Constructs the machine at the start of the genesis height, with
    /// the immediate `NewHeight` timeout scheduled.
    pub(crate) fn new(
        cfg: Config,
        wal: wal::Wal,
        outbound_channel: ctx::channel::UnboundedSender<OutboundMessage>,
    ) -> anyhow::Result<Self> {
        let guard = SigningGuard::new(
            cfg.secret_key,
            cfg.genesis.chain_id.clone(),
            cfg.sign_record_store,
        )
        .context("SigningGuard::new()")?;
        let height = cfg.genesis.initial_height;
        let committee = cfg.genesis.committee;
        let validator_index = committee
            .index(&guard.public_key().address())
            .map(|i| i as u32);
        let state = validator::RoundState {
            height,
            round: validator::Round(0),
            step: validator::RoundStep::NewHeight,
        };
        let scheduled = validator::TimeoutInfo {
            duration_ms: 0,
            height,
            round: state.round,
            step: state.step,
        };
        Ok(Self {
            chain_id: cfg.genesis.chain_id,
            votes: HeightVoteSet::new(committee.quorum_threshold()),
            committee,
            validator_index,
            timeouts: cfg.timeouts,
            application: cfg.application,
            policy: cfg.policy,
            events: cfg.event_bus,
            guard,
            wal,
            outbound_channel,
            ticker: sync::watch::channel(None).0,
            round_state_watch: sync::watch::channel(state).0,
            committed_watch: sync::watch::channel(None).0,
            height,
            round: state.round,
            step: state.step,
            proposal: None,
            proposal_block: None,
            proposal_block_parts: None,
            locked_round: validator::Round::NONE,
            locked_block: None,
            commit_round: validator::Round::NONE,
            last_block_id: None,
            app_hash: validator::AppHash::default(),
            internal_queue: VecDeque::new(),
            transitions: VecDeque::new(),
            scheduled: Some(scheduled),
        })
    }

    /// Current round state.
    pub(crate) fn round_state(&self) -> validator::RoundState {
        validator::RoundState {
            height: self.height,
            round: self.round,
            step: self.step,
        }
    }

    /// Runs the main loop, processing inputs until `ctx` is canceled or
    /// processing fails.
    pub(crate) async fn run(
        mut self,
        ctx: &ctx::Ctx,
        mut inputs: ctx::channel::UnboundedReceiver<Input>,
    ) -> ctx::Result<()> {
        tracing::info!(state = %self.round_state(), "starting consensus state machine");
        loop {
            let input = inputs.recv(ctx).await?;
            self.process(ctx, input)?;
        }
    }

    /// Logs and handles an input, then processes everything the machine
    /// produced in response.
    pub(crate) fn process(&mut self, ctx: &ctx::Ctx, input: Input) -> ctx::Result<()> {
        self.append(ctx, input.clone().into_payload())?;
        self.handle(ctx, input)?;
        self.log_transitions(ctx)?;
        self.drain_internal_queue(ctx)?;
        self.update_ticker();
        Ok(())
    }

    /// Processes the messages produced by this node: each is logged,
    /// broadcast and handled in turn.
    pub(crate) fn drain_internal_queue(&mut self, ctx: &ctx::Ctx) -> ctx::Result<u64> {
        let mut n = 0;
        while let Some(msg) = self.internal_queue.pop_front() {
            let msg = validator::PeerMessage::internal(msg);
            self.append(ctx, wal::Payload::Message(msg.clone()))?;
            self.outbound_channel.send(msg.msg.clone());
            self.handle(ctx, Input::Message(msg))?;
            self.log_transitions(ctx)?;
            n += 1;
        }
        Ok(n)
    }

    /// Logs the round states entered since the last call.
    pub(crate) fn log_transitions(&mut self, ctx: &ctx::Ctx) -> ctx::Result<()> {
        while let Some(state) = self.transitions.pop_front() {
            self.append(ctx, wal::Payload::RoundStep(state))?;
        }
        Ok(())
    }

    /// Hands the scheduled timeout to the ticker.
    pub(crate) fn update_ticker(&self) {
        self.ticker.send_if_modified(|t| {
            if *t == self.scheduled {
                return false;
            }
            t.clone_from(&self.scheduled);
            true
        });
    }

    fn append(&mut self, ctx: &ctx::Ctx, payload: wal::Payload) -> ctx::Result<()> {
        self.wal
            .append(wal::Entry {
                time: ctx.now_utc(),
                payload,
            })
            .context("wal.append()")?;
        Ok(())
    }

    /// Handles an input, without logging it. Invalid inputs are logged and
    /// dropped; only internal errors are returned.
    pub(crate) fn handle(&mut self, ctx: &ctx::Ctx, input: Input) -> ctx::Result<()> {
        let now = ctx.now();
        let label = match input {
            Input::Timeout(timeout) => {
                let res = match self.on_timeout(ctx, timeout).wrap("on_timeout()") {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        match err {
                            timeout::Error::Internal(err) => {
                                tracing::error!("on_timeout: internal error: {err:#}");
                                return Err(err);
                            }
                            timeout::Error::Old { .. } => {
                                tracing::debug!("on_timeout: {err:#}");
                            }
                            _ => {
                                tracing::warn!("on_timeout: {err:#}");
                            }
                        }
                        Err(())
                    }
                };
                metrics::InputLabel::Timeout.with_result(&res)
            }
            Input::Message(validator::PeerMessage { peer, msg }) => match msg {
                validator::ConsensusMsg::Proposal(m) => {
                    let res = match self.on_proposal(ctx, m).wrap("on_proposal()") {
                        Ok(()) => Ok(()),
                        Err(err) => {
                            match err {
                                proposal::Error::Internal(err) => {
                                    tracing::error!("on_proposal: internal error: {err:#}");
                                    return Err(err);
                                }
                                proposal::Error::Old { .. } => {
                                    tracing::debug!(?peer, "on_proposal: {err:#}");
                                }
                                _ => {
                                    tracing::warn!(?peer, "on_proposal: {err:#}");
                                }
                            }
                            Err(())
                        }
                    };
                    metrics::InputLabel::Proposal.with_result(&res)
                }
                validator::ConsensusMsg::BlockPart(m) => {
                    let res = match self.on_block_part(ctx, m).wrap("on_block_part()") {
                        Ok(()) => Ok(()),
                        Err(err) => {
                            match err {
                                block_part::Error::Internal(err) => {
                                    tracing::error!("on_block_part: internal error: {err:#}");
                                    return Err(err);
                                }
                                block_part::Error::Old { .. } => {
                                    tracing::debug!(?peer, "on_block_part: {err:#}");
                                }
                                _ => {
                                    tracing::warn!(?peer, "on_block_part: {err:#}");
                                }
                            }
                            Err(())
                        }
                    };
                    metrics::InputLabel::BlockPart.with_result(&res)
                }
                validator::ConsensusMsg::Vote(m) => {
                    let res = match self.on_vote(ctx, m).wrap("on_vote()") {
                        Ok(()) => Ok(()),
                        Err(err) => {
                            match err {
                                vote::Error::Internal(err) => {
                                    tracing::error!("on_vote: internal error: {err:#}");
                                    return Err(err);
                                }
                                vote::Error::Old { .. } => {
                                    tracing::debug!(?peer, "on_vote: {err:#}");
                                }
                                _ => {
                                    tracing::warn!(?peer, "on_vote: {err:#}");
                                }
                            }
                            Err(())
                        }
                    };
                    metrics::InputLabel::Vote.with_result(&res)
                }
            },
        };
        metrics::METRICS.input_processing_latency[&label].observe_latency(ctx.now() - now);
        Ok(())
    }

    /// Id of the complete and validated proposal block, if any.
    pub(crate) fn proposal_block_id(&self) -> Option<validator::BlockId> {
        let block = self.proposal_block.as_ref()?;
        let parts = self.proposal_block_parts.as_ref()?;
        Some(block.id(parts))
    }

    /// Id of the locked block, if any.
    pub(crate) fn locked_block_id(&self) -> Option<validator::BlockId> {
        let (block, parts) = self.locked_block.as_ref()?;
        Some(block.id(parts))
    }

    /// Whether the proposal and its block are complete, and its proof-of-lock
    /// round (if any) is backed by a polka we have seen.
    pub(crate) fn is_proposal_complete(&self) -> bool {
        let Some(proposal) = &self.proposal else {
            return false;
        };
        if self.proposal_block.is_none() {
            return false;
        }
        !proposal.pol_round.is_some()
            || self
                .votes
                .two_thirds_majority(proposal.pol_round, validator::VoteType::Prevote)
                .is_some()
    }

    /// Publishes an event.
    pub(crate) fn publish(&self, event: Event) {
        self.events.publish(&event);
    }
}
