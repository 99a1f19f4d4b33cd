use super::{rng, Clock, Ctx, Inner};
use crate::{signal, time};
use std::sync::Arc;

/// Root context for tests, driven by `clock`, with a deterministic rng.
pub fn test_root<C: Clone + Into<Clock>>(clock: &C) -> Ctx {
    Ctx(Arc::new(Inner {
        clock: clock.clone().into(),
        rng_provider: Arc::new(rng::Provider::test()),
        canceled: Arc::new(signal::Once::new()),
        deadline: time::Deadline::Infinite,
        _parent: None,
    }))
}
