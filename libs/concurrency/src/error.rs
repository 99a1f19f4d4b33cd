//! Adding context to structured errors.
use std::fmt::Display;

/// Counterpart of `anyhow::Context` for error enums which carry an
/// `anyhow::Error` in one of their variants.
///
/// Prefer `wrap()` over `context()` for such types: `context()` converts the
/// whole error into `anyhow::Error` and the structure is lost.
pub trait Wrap: Sized {
    /// Appends context `c` to the error.
    fn wrap<C: Display + Send + Sync + 'static>(self, c: C) -> Self {
        self.with_wrap(|| c)
    }
    /// Appends lazily computed context `f()` to the error.
    fn with_wrap<C: Display + Send + Sync + 'static, F: FnOnce() -> C>(self, f: F) -> Self;
}

impl<T, E: Wrap> Wrap for Result<T, E> {
    fn with_wrap<C: Display + Send + Sync + 'static, F: FnOnce() -> C>(self, f: F) -> Self {
        self.map_err(|err| err.with_wrap(f))
    }
}
