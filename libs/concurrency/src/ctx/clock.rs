//! Clocks owned by `ctx::Ctx`. Code reading time through the context rather
//! than the system clock stays deterministic under test.
//!
//! * `now()` is monotonic; use it for timers and latency measurements.
//! * `now_utc()` approximates the wall clock; use it for timestamps that are
//!   stored or sent over the network. It is not guaranteed to be monotonic.
use crate::time;
use once_cell::sync::Lazy;
use std::{
    fmt,
    sync::{Arc, Mutex},
};
use tokio::sync::watch;

// `Instant` has no deterministic constructor, so the fake monotonic clock
// starts at the first observed `Instant::now()`.
static FAKE_CLOCK_MONO_START: Lazy<time::Instant> = Lazy::new(time::Instant::now);

// Fixed starting point of the fake wall clock, so that tests are reproducible.
const FAKE_CLOCK_UTC_START: time::Utc = time::Utc(time::Duration::new(1_471_654_744, 481_000_000));

/// System clock.
#[derive(Debug, Clone)]
pub struct RealClock;

impl RealClock {
    /// Monotonic time. Read through tokio, so that `tokio::time::pause()`
    /// affects it in tests.
    pub fn now(&self) -> time::Instant {
        tokio::time::Instant::now().into_std().into()
    }

    /// Wall clock time.
    pub fn now_utc(&self) -> time::Utc {
        time::Utc::from_datetime(::time::OffsetDateTime::now_utc())
    }
}

struct ManualState {
    mono: watch::Sender<time::Instant>,
    utc: time::Utc,
    /// Keeps `mono.send()` infallible.
    _mono_recv: watch::Receiver<time::Instant>,
}

/// Fake clock which moves only when told to.
#[derive(Clone)]
pub struct ManualClock(Arc<Mutex<ManualState>>);

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock").finish_non_exhaustive()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Constructs a manual clock at the fixed fake starting point.
    pub fn new() -> Self {
        let (mono, _mono_recv) = watch::channel(*FAKE_CLOCK_MONO_START);
        Self(Arc::new(Mutex::new(ManualState {
            mono,
            utc: FAKE_CLOCK_UTC_START,
            _mono_recv,
        })))
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ManualState> {
        // The lock is never held across a panic point.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Monotonic time.
    pub fn now(&self) -> time::Instant {
        *self.state().mono.borrow()
    }

    /// Wall clock time.
    pub fn now_utc(&self) -> time::Utc {
        self.state().utc
    }

    /// Advances both clocks by `d`. Negative durations are ignored.
    pub fn advance(&self, d: time::Duration) {
        if d <= time::Duration::ZERO {
            return;
        }
        let mut this = self.state();
        let now = *this.mono.borrow();
        this.mono.send_replace(now + d);
        this.utc += d;
    }
}

/// Clock used by a context. An enum rather than a trait object, so that the
/// calls are static.
#[derive(Clone, Debug)]
pub enum Clock {
    /// System clock.
    Real(RealClock),
    /// Manually driven clock.
    Manual(ManualClock),
}

impl From<RealClock> for Clock {
    fn from(c: RealClock) -> Self {
        Self::Real(c)
    }
}

impl From<ManualClock> for Clock {
    fn from(c: ManualClock) -> Self {
        Self::Manual(c)
    }
}

impl Clock {
    /// Monotonic time.
    pub fn now(&self) -> time::Instant {
        match self {
            Self::Real(c) => c.now(),
            Self::Manual(c) => c.now(),
        }
    }

    /// Wall clock time.
    pub fn now_utc(&self) -> time::Utc {
        match self {
            Self::Real(c) => c.now_utc(),
            Self::Manual(c) => c.now_utc(),
        }
    }

    /// Blocks until `t`. Cancel-safe.
    pub(crate) async fn sleep_until(&self, t: time::Deadline) {
        let time::Deadline::Finite(t) = t else {
            return std::future::pending().await;
        };
        match self {
            Self::Real(_) => tokio::time::sleep_until(t.into_inner().into()).await,
            Self::Manual(manual) => {
                let mut watch = manual.state().mono.subscribe();
                while *watch.borrow_and_update() < t {
                    if watch.changed().await.is_err() {
                        return std::future::pending().await;
                    }
                }
            }
        }
    }
}
