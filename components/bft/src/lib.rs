//! This crate contains the consensus component: a Tendermint-style
//! height/round/step state machine which survives crashes.
//!
//! Everything the machine consumes is logged to a write-ahead log before it
//! is handled, and everything it signs goes through a signing guard which
//! durably records the last signature. On startup the log is replayed from
//! the start, which restores the state the machine was in before the crash.

use anyhow::Context as _;
pub use config::{Config, Timeouts};
use keel_concurrency::{ctx, error::Wrap as _, sync};
use keel_roles::validator;
use keel_storage::wal;
use state_machine::{Input, StateMachine};

mod config;
pub mod events;
pub mod guard;
mod metrics;
pub mod policy;
pub mod replay;
mod state_machine;
pub mod testonly;
#[cfg(test)]
mod tests;
mod ticker;
mod vote_set;

/// Messages the component asks the network to broadcast.
pub type OutboundMessage = validator::ConsensusMsg;

/// Application on top of the consensus: proposes, verifies and executes
/// block payloads.
///
/// Recovery replays the WAL from genesis, so the application sees
/// every commit again after a restart, and it is asked to propose again for
/// heights it proposed for before. Both have to be deterministic.
pub trait Application: std::fmt::Debug + Send + Sync {
    /// Payload of a new block at `height`.
    fn propose(&self, height: validator::Height) -> anyhow::Result<validator::Payload>;
    /// Verifies the payload of a proposed block.
    fn verify(&self, height: validator::Height, payload: &validator::Payload) -> anyhow::Result<()>;
    /// Executes a committed block. Returns the application state hash, which
    /// the next block carries.
    fn commit(&self, block: &validator::Block) -> anyhow::Result<validator::AppHash>;
}

impl Config {
    /// Restores the consensus state from the WAL and the signing record.
    ///
    /// Returns a handle for feeding network messages and observing progress,
    /// and the runner which drives the live operation.
    #[tracing::instrument(level = "info", name = "recover", skip_all, fields(wal = %self.wal_path.display()))]
    pub fn recover(
        self,
        ctx: &ctx::Ctx,
        network: ctx::channel::UnboundedSender<OutboundMessage>,
    ) -> Result<(Handle, Runner), replay::Error> {
        self.genesis.verify().context("genesis.verify()")?;
        tracing::info!(validator = %self.secret_key.public().address(), "recovering consensus state");
        // Opening the writer first truncates an unterminated tail.
        let writer = wal::Wal::open(&self.wal_path)?;
        let reader = wal::WalReader::open(&self.wal_path)?;
        let events = self.event_bus.clone();
        let mut machine = StateMachine::new(self, writer, network).context("StateMachine::new()")?;
        let outcome = replay::replay(ctx, &mut machine, reader)?;
        tracing::info!(
            entries = outcome.entries,
            recovered = outcome.recovered,
            state = %outcome.state,
            "consensus state recovered"
        );
        let (inputs_send, inputs_recv) = ctx::channel::unbounded();
        let handle = Handle {
            inputs: inputs_send.clone(),
            round_state: machine.round_state_watch.subscribe(),
            committed: machine.committed_watch.subscribe(),
            events,
        };
        let runner = Runner {
            ticker: machine.ticker.subscribe(),
            machine,
            inputs_send,
            inputs_recv,
        };
        Ok((handle, runner))
    }
}

/// Handle of a recovered consensus component.
#[derive(Debug, Clone)]
pub struct Handle {
    inputs: ctx::channel::UnboundedSender<Input>,
    round_state: sync::watch::Receiver<validator::RoundState>,
    committed: sync::watch::Receiver<Option<validator::Height>>,
    events: std::sync::Arc<events::EventBus>,
}

impl Handle {
    /// Delivers a message received from the network.
    pub fn send(&self, msg: validator::PeerMessage) {
        self.inputs.send(Input::Message(msg));
    }

    /// Current round state.
    pub fn round_state(&self) -> validator::RoundState {
        *self.round_state.borrow()
    }

    /// Waits until the block at `height` is committed.
    pub async fn wait_for_block(
        &self,
        ctx: &ctx::Ctx,
        height: validator::Height,
    ) -> ctx::OrCanceled<()> {
        let mut committed = self.committed.clone();
        sync::wait_for(ctx, &mut committed, |h| h.map_or(false, |h| h >= height)).await?;
        Ok(())
    }

    /// Bus on which consensus events are published.
    pub fn events(&self) -> &events::EventBus {
        &self.events
    }
}

/// Drives a recovered consensus component.
#[derive(Debug)]
pub struct Runner {
    machine: StateMachine,
    ticker: sync::watch::Receiver<Option<validator::TimeoutInfo>>,
    inputs_send: ctx::channel::UnboundedSender<Input>,
    inputs_recv: ctx::channel::UnboundedReceiver<Input>,
}

impl Runner {
    /// Runs the component until `ctx` is canceled. Fails if an input
    /// couldn't be logged or a signature couldn't be recorded: the node has
    /// to stop then.
    pub async fn run(self, ctx: &ctx::Ctx) -> anyhow::Result<()> {
        let Self {
            machine,
            ticker,
            inputs_send,
            inputs_recv,
        } = self;
        let res = tokio::select! {
            res = ticker::run(ctx, ticker, inputs_send) => res.wrap("ticker::run()"),
            res = machine.run(ctx, inputs_recv) => res.wrap("machine.run()"),
        };
        match res {
            Ok(()) | Err(ctx::Error::Canceled(_)) => Ok(()),
            Err(ctx::Error::Internal(err)) => Err(err),
        }
    }
}
