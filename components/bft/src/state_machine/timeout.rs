use super::StateMachine;
use crate::events::Event;
use keel_concurrency::{ctx, error::Wrap};
use keel_roles::validator;

/// Errors that can occur when processing a fired timeout.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Timeout of a round state the machine already left.
    #[error("stale timeout {timeout} (current: {current})")]
    Old {
        /// Round state of the timeout.
        timeout: validator::RoundState,
        /// Current round state.
        current: validator::RoundState,
    },
    /// Timeout of a step which doesn't schedule timeouts.
    #[error("unexpected timeout step {0:?}")]
    InvalidStep(validator::RoundStep),
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
    /// Processes a fired timeout.
    pub(crate) fn on_timeout(
        &mut self,
        ctx: &ctx::Ctx,
        timeout: validator::TimeoutInfo,
    ) -> Result<(), Error> {
        if self.scheduled.as_ref() == Some(&timeout) {
            self.scheduled = None;
        }
        let ts = timeout.round_state();
        if ts.height != self.height
            || ts.round < self.round
            || (ts.round == self.round && ts.step < self.step)
        {
            return Err(Error::Old {
                timeout: ts,
                current: self.round_state(),
            });
        }
        tracing::debug!(timeout = %ts, duration_ms = timeout.duration_ms, "timeout fired");
        match ts.step {
            validator::RoundStep::NewHeight => self.enter_new_round(ctx, ts.round)?,
            validator::RoundStep::Propose => {
                self.publish(Event::TimeoutPropose(ts));
                self.enter_prevote(ctx, ts.round)?;
            }
            validator::RoundStep::PrevoteWait => {
                self.publish(Event::TimeoutWait(ts));
                self.enter_precommit(ctx, ts.round)?;
            }
            validator::RoundStep::PrecommitWait => {
                self.publish(Event::TimeoutWait(ts));
                self.enter_precommit(ctx, ts.round)?;
                self.enter_new_round(ctx, ts.round.next())?;
            }
            step => return Err(Error::InvalidStep(step)),
        }
        Ok(())
    }
}
