//! Recovery of the state machine from the WAL.
//!
//! The log is replayed from the start into a freshly constructed machine.
//! Inputs are handled exactly as in live operation, but nothing gets logged
//! or broadcast:
//! - a round step marker has to match the next round state the machine
//!   entered since the previous input;
//! - a logged message of this node has to match the next message the
//!   machine produced. If the machine produced nothing (the guard refused a
//!   signature it had already released), the logged message is handled as is;
//! - before a timeout or a peer message, everything produced in response to
//!   the previous input must have been matched.
//!
//! What remains at the end of the log was produced before the crash but
//! never logged. It is logged and processed live, as if the crash never
//! happened.
use crate::{
    metrics,
    state_machine::{Input, StateMachine},
};
use keel_concurrency::ctx;
use keel_roles::validator;
use keel_storage::wal;

/// Error of the recovery.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The WAL couldn't be read or written.
    #[error(transparent)]
    Wal(#[from] wal::Error),
    /// The WAL doesn't match what the state machine does.
    #[error("wal inconsistent with the state machine at line {line}: {reason}")]
    Consistency {
        /// 1-based line of the offending entry.
        line: usize,
        /// What didn't match.
        reason: String,
    },
    /// Internal error.
    #[error(transparent)]
    Internal(#[from] ctx::Error),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.into())
    }
}

/// Summary of a recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Number of entries replayed.
    pub entries: u64,
    /// Number of messages produced before the crash which were missing from
    /// the log.
    pub recovered: u64,
    /// Round state after the recovery.
    pub state: validator::RoundState,
}

/// Replays the log read by `reader` into `machine`, then completes what the
/// crash interrupted.
pub(crate) fn replay(
    ctx: &ctx::Ctx,
    machine: &mut StateMachine,
    reader: wal::WalReader,
) -> Result<ReplayOutcome, Error> {
    let mut entries = 0;
    for (i, entry) in reader.enumerate() {
        let line = i + 1;
        let entry = entry?;
        let inconsistent = |reason: String| Error::Consistency { line, reason };
        match entry.payload {
            wal::Payload::RoundStep(marker) => match machine.transitions.pop_front() {
                Some(state) if state == marker => {}
                Some(state) => {
                    return Err(inconsistent(format!(
                        "marker {marker}, but the machine entered {state}"
                    )))
                }
                None => {
                    return Err(inconsistent(format!(
                        "marker {marker}, but the machine entered no round state"
                    )))
                }
            },
            wal::Payload::Message(validator::PeerMessage { peer: None, msg }) => {
                if let Some(state) = machine.transitions.front() {
                    return Err(inconsistent(format!(
                        "own {} before the marker of {state}",
                        msg.label()
                    )));
                }
                match machine.internal_queue.front() {
                    Some(pending) if *pending == msg => {
                        machine.internal_queue.pop_front();
                    }
                    Some(pending) => {
                        return Err(inconsistent(format!(
                            "own {} at {}/{} differs from the produced {} at {}/{}",
                            msg.label(),
                            msg.height(),
                            msg.round(),
                            pending.label(),
                            pending.height(),
                            pending.round(),
                        )))
                    }
                    None => {
                        tracing::debug!(line, msg = msg.label(), "replaying own message");
                    }
                }
                machine.handle(ctx, Input::Message(validator::PeerMessage::internal(msg)))?;
            }
            wal::Payload::Timeout(timeout) => {
                if let Some(reason) = unmatched(machine, "timeout") {
                    return Err(inconsistent(reason));
                }
                machine.handle(ctx, Input::Timeout(timeout))?;
            }
            wal::Payload::Message(msg) => {
                if let Some(reason) = unmatched(machine, "peer message") {
                    return Err(inconsistent(reason));
                }
                machine.handle(ctx, Input::Message(msg))?;
            }
        }
        entries += 1;
        metrics::METRICS.replayed_entries.inc();
    }
    tracing::info!(entries, state = %machine.round_state(), "wal replayed");

    // Back to live operation.
    machine.log_transitions(ctx)?;
    let recovered = machine.drain_internal_queue(ctx)?;
    if recovered > 0 {
        tracing::info!(recovered, "logged messages produced before the crash");
        metrics::METRICS.recovered_messages.inc_by(recovered);
    }
    machine.update_ticker();
    Ok(ReplayOutcome {
        entries,
        recovered,
        state: machine.round_state(),
    })
}

/// Describes what the machine produced in response to the previous input
/// and the log doesn't hold, if anything.
fn unmatched(machine: &StateMachine, what: &str) -> Option<String> {
    if let Some(state) = machine.transitions.front() {
        return Some(format!("{what} before the marker of {state}"));
    }
    let pending = machine.internal_queue.front()?;
    Some(format!(
        "{what} before the own {} at {}/{}",
        pending.label(),
        pending.height(),
        pending.round(),
    ))
}
