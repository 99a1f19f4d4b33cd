//! Request context, modeled after golang's `context.Context`.
//!
//! A `Ctx` is a cancellation token plus a clock. Every blocking call should
//! race against `ctx` cancellation, so that a whole tree of tasks can be
//! stopped by canceling its root. A child context can only shorten the
//! lifetime granted by its parent, never extend it.
use crate::{signal, time};
use std::{fmt, future::Future, sync::Arc};

pub mod channel;
mod clock;
mod rng;
mod testonly;

pub use clock::*;
pub use testonly::*;

/// Context handle. Cheap to clone within this crate; outside the crate it is
/// passed by reference.
pub struct Ctx(Arc<Inner>);

struct Inner {
    clock: Clock,
    rng_provider: Arc<rng::Provider>,
    /// Sent once this context is canceled.
    canceled: Arc<signal::Once>,
    /// `parent.deadline <= deadline` holds for every child.
    deadline: time::Deadline,
    _parent: Option<Arc<Inner>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Wakes up the task propagating parent cancellation, so it doesn't leak.
        self.canceled.send();
    }
}

/// The blocking operation was interrupted because the context got canceled.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("canceled")]
pub struct Canceled;

/// Result of an operation which can only fail by cancellation.
pub type OrCanceled<T> = std::result::Result<T, Canceled>;

/// Constructs the root context. Call it once, at the start of `main()`.
pub fn root() -> Ctx {
    Ctx(Arc::new(Inner {
        clock: RealClock.into(),
        rng_provider: Arc::new(rng::Provider::from_entropy()),
        canceled: Arc::new(signal::Once::new()),
        deadline: time::Deadline::Infinite,
        _parent: None,
    }))
}

impl fmt::Debug for Ctx {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("Ctx").finish_non_exhaustive()
    }
}

impl Ctx {
    fn child(&self, deadline: time::Deadline) -> Self {
        let deadline = std::cmp::min(self.0.deadline, deadline);
        let clock = self.0.clock.clone();
        let parent_canceled = self.0.canceled.clone();
        let child_canceled = Arc::new(signal::Once::new());
        let child = Self(Arc::new(Inner {
            clock: clock.clone(),
            rng_provider: self.0.rng_provider.clone(),
            canceled: child_canceled.clone(),
            deadline,
            _parent: Some(self.0.clone()),
        }));
        // The propagation task holds only the signals, not the contexts,
        // so dropping the child terminates it.
        tokio::spawn(async move {
            tokio::select! {
                () = clock.sleep_until(deadline) => child_canceled.send(),
                () = parent_canceled.cancel_safe_recv() => child_canceled.send(),
                () = child_canceled.cancel_safe_recv() => {}
            }
        });
        child
    }

    /// Constructs a child context canceled at deadline `d`.
    pub fn with_deadline(&self, d: time::Deadline) -> Self {
        self.child(d)
    }

    /// Constructs a child context canceled after `d`.
    pub fn with_timeout(&self, d: time::Duration) -> Self {
        self.child((self.now() + d).into())
    }

    /// Cancels this context and, transitively, all its children.
    pub fn cancel(&self) {
        self.0.canceled.send();
    }

    /// Checks whether this context is still active.
    pub fn is_active(&self) -> bool {
        !self.0.canceled.try_recv()
    }

    /// Waits until this context gets canceled. The returned future doesn't
    /// borrow the context.
    pub fn canceled(&self) -> impl Future<Output = ()> + Send + 'static {
        let canceled = self.0.canceled.clone();
        async move { canceled.cancel_safe_recv().await }
    }

    /// Deadline of this context.
    pub fn deadline(&self) -> time::Deadline {
        self.0.deadline
    }

    /// Awaits `fut`, unless the context gets canceled first.
    /// `fut` has to be cancel-safe.
    pub async fn wait<F: Future>(&self, fut: F) -> OrCanceled<F::Output> {
        tokio::select! {
            output = fut => std::result::Result::Ok(output),
            () = self.0.canceled.cancel_safe_recv() => Err(Canceled),
        }
    }

    /// Monotonic time.
    pub fn now(&self) -> time::Instant {
        self.0.clock.now()
    }

    /// Wall clock time.
    pub fn now_utc(&self) -> time::Utc {
        self.0.clock.now_utc()
    }

    /// Fresh rng, split off the context's rng provider. Deterministic under
    /// `test_root`.
    pub fn rng(&self) -> rand::rngs::StdRng {
        self.0.rng_provider.split()
    }

    /// Sleeps for `d`.
    pub async fn sleep(&self, d: time::Duration) -> OrCanceled<()> {
        let t = self.now() + d;
        self.wait(self.0.clock.sleep_until(t.into())).await
    }

    /// Sleeps until deadline `t`.
    pub async fn sleep_until(&self, t: time::Deadline) -> OrCanceled<()> {
        self.wait(self.0.clock.sleep_until(t)).await
    }
}

/// `anyhow::Error` extended with an explicit cancellation variant.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The context was canceled before the call completed.
    #[error(transparent)]
    Canceled(#[from] Canceled),
    /// Any other error.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result with [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Shorthand for `Ok::<_, ctx::Error>(v)`, useful in async blocks.
#[allow(non_snake_case)]
pub fn Ok<T>(v: T) -> Result<T> {
    Result::Ok(v)
}

impl crate::error::Wrap for Error {
    fn with_wrap<C: std::fmt::Display + Send + Sync + 'static, F: FnOnce() -> C>(
        self,
        f: F,
    ) -> Self {
        match self {
            Error::Internal(err) => Error::Internal(err.context(f())),
            err => err,
        }
    }
}
