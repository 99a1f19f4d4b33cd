//! Time types used across the node: a signed `Duration`, a monotonic
//! `Instant`, a UTC timestamp and an optional `Deadline`.

/// A signed duration.
pub type Duration = time::Duration;

/// Monotonic clock time.
pub type Instant = time::Instant;

/// UTC time with nanosecond precision, represented as the offset from the
/// unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Utc(pub(crate) Duration);

impl std::fmt::Debug for Utc {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.to_datetime().fmt(f)
    }
}

/// Start of the unix epoch.
pub const UNIX_EPOCH: Utc = Utc(Duration::ZERO);

impl Utc {
    /// Converts to a calendar timestamp in the UTC offset.
    pub fn to_datetime(self) -> time::OffsetDateTime {
        time::OffsetDateTime::UNIX_EPOCH + self.0
    }

    /// Converts from a calendar timestamp (any offset).
    pub fn from_datetime(t: time::OffsetDateTime) -> Self {
        Self(t - time::OffsetDateTime::UNIX_EPOCH)
    }
}

impl std::ops::Add<Duration> for Utc {
    type Output = Self;

    fn add(self, d: Duration) -> Self {
        Self(self.0 + d)
    }
}

impl std::ops::AddAssign<Duration> for Utc {
    fn add_assign(&mut self, d: Duration) {
        self.0 += d;
    }
}

impl std::ops::Sub<Utc> for Utc {
    type Output = Duration;

    fn sub(self, b: Self) -> Duration {
        self.0 - b.0
    }
}

/// An optional deadline. `Finite(_) < Infinite` by construction of the
/// derived ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Deadline {
    /// Finite deadline.
    Finite(Instant),
    /// No deadline.
    Infinite,
}

impl From<Instant> for Deadline {
    fn from(t: Instant) -> Self {
        Self::Finite(t)
    }
}
