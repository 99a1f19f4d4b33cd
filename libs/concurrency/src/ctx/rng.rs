use rand::{Rng as _, SeedableRng as _};
use std::sync::Mutex;

/// Source of rngs for a context tree.
pub(super) struct Provider(Mutex<rand::rngs::StdRng>);

impl Provider {
    pub(super) fn from_entropy() -> Self {
        Self(Mutex::new(rand::rngs::StdRng::from_entropy()))
    }

    /// Fixed seed, so that tests are reproducible.
    pub(super) fn test() -> Self {
        Self(Mutex::new(rand::rngs::StdRng::seed_from_u64(
            0x6b65_656c_7465_7374,
        )))
    }

    pub(super) fn split(&self) -> rand::rngs::StdRng {
        let mut rng = self.0.lock().unwrap_or_else(|err| err.into_inner());
        rand::rngs::StdRng::from_seed(rng.gen())
    }
}
