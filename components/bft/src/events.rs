//! In-process event bus announcing consensus milestones.
//!
//! Publishing is synchronous: callbacks run inline, on the state machine's
//! processing context, in subscription order. A failing or panicking callback
//! is logged and skipped; it never affects the publisher or other
//! subscribers.
use keel_concurrency::ctx;
use keel_roles::validator;
use std::{
    collections::BTreeMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
};

/// Kind of an [`Event`]. Subscriptions are per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    /// A block got committed.
    NewBlock,
    /// The proposal of the current round became complete.
    CompleteProposal,
    /// +2/3 prevotes for a single block (or nil) were observed.
    Polka,
    /// The state machine moved to a new round state.
    NewRoundStep,
    /// A new round started.
    NewRound,
    /// The node locked on a block.
    Lock,
    /// The node released its lock.
    Unlock,
    /// A vote was added to the vote sets.
    Vote,
    /// The propose timeout fired.
    TimeoutPropose,
    /// A prevote-wait or precommit-wait timeout fired.
    TimeoutWait,
}

/// Consensus event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A block got committed.
    NewBlock {
        /// The block.
        block: Box<validator::Block>,
        /// Id of the block.
        block_id: validator::BlockId,
    },
    /// The proposal became complete.
    CompleteProposal {
        /// Round state.
        state: validator::RoundState,
        /// Id of the proposed block.
        block_id: validator::BlockId,
    },
    /// Polka. `block_id` is `None` for a polka for nil.
    Polka {
        /// Round state.
        state: validator::RoundState,
        /// Block with +2/3 prevotes.
        block_id: Option<validator::BlockId>,
    },
    /// New round state.
    NewRoundStep(validator::RoundState),
    /// New round.
    NewRound(validator::RoundState),
    /// Locked on a block.
    Lock {
        /// Round state.
        state: validator::RoundState,
        /// Locked block.
        block_id: validator::BlockId,
    },
    /// Lock released.
    Unlock(validator::RoundState),
    /// Vote added.
    Vote(Box<validator::SignedVote>),
    /// Propose timeout.
    TimeoutPropose(validator::RoundState),
    /// Wait timeout.
    TimeoutWait(validator::RoundState),
}

impl Event {
    /// Kind of the event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::NewBlock { .. } => EventKind::NewBlock,
            Self::CompleteProposal { .. } => EventKind::CompleteProposal,
            Self::Polka { .. } => EventKind::Polka,
            Self::NewRoundStep(_) => EventKind::NewRoundStep,
            Self::NewRound(_) => EventKind::NewRound,
            Self::Lock { .. } => EventKind::Lock,
            Self::Unlock(_) => EventKind::Unlock,
            Self::Vote(_) => EventKind::Vote,
            Self::TimeoutPropose(_) => EventKind::TimeoutPropose,
            Self::TimeoutWait(_) => EventKind::TimeoutWait,
        }
    }
}

/// Event callback.
pub type Callback = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Identifies a subscription, for `unsubscribe()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Subscriptions {
    next_id: u64,
    by_kind: BTreeMap<EventKind, Vec<(SubscriptionId, Callback)>>,
}

/// Synchronous publish/subscribe bus.
#[derive(Default)]
pub struct EventBus(Mutex<Subscriptions>);

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl EventBus {
    /// Constructs an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    fn subs(&self) -> std::sync::MutexGuard<'_, Subscriptions> {
        // Callbacks run outside of the lock, so it cannot get poisoned by them.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers `callback` for events of `kind`.
    pub fn subscribe(
        &self,
        kind: EventKind,
        callback: impl Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> SubscriptionId {
        let mut subs = self.subs();
        let id = SubscriptionId(subs.next_id);
        subs.next_id += 1;
        subs.by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Forwards events of `kind` to an unbounded channel, decoupling the
    /// subscriber from the publisher.
    pub fn subscribe_channel(
        &self,
        kind: EventKind,
    ) -> (SubscriptionId, ctx::channel::UnboundedReceiver<Event>) {
        let (send, recv) = ctx::channel::unbounded();
        let id = self.subscribe(kind, move |event| {
            send.send(event.clone());
            Ok(())
        });
        (id, recv)
    }

    /// Removes a subscription. Returns `false` if it didn't exist.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subs();
        for list in subs.by_kind.values_mut() {
            if let Some(i) = list.iter().position(|(x, _)| *x == id) {
                list.remove(i);
                return true;
            }
        }
        false
    }

    /// Invokes the callbacks subscribed to the event's kind.
    pub fn publish(&self, event: &Event) {
        // Cloned out, so that callbacks can (un)subscribe.
        let callbacks: Vec<_> = self
            .subs()
            .by_kind
            .get(&event.kind())
            .map(|list| list.iter().map(|(id, cb)| (*id, cb.clone())).collect())
            .unwrap_or_default();
        for (id, cb) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| cb(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(?id, kind = ?event.kind(), "event subscriber failed: {err:#}");
                }
                Err(_) => {
                    tracing::error!(?id, kind = ?event.kind(), "event subscriber panicked");
                }
            }
        }
    }
}
