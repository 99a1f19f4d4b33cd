//! One-shot broadcast signal. Used to implement `Ctx` cancellation.
use crate::ctx;

/// A signal which can be sent at most once and observed by any number of
/// waiters.
#[derive(Debug)]
pub struct Once(tokio::sync::Semaphore);

impl Default for Once {
    fn default() -> Self {
        Self::new()
    }
}

impl Once {
    /// Constructs a signal which has not been sent yet.
    pub fn new() -> Self {
        Self(tokio::sync::Semaphore::new(0))
    }

    /// Sends the signal. Subsequent calls are no-ops.
    pub fn send(&self) {
        // A closed semaphore with no permits is our "sent" state.
        self.0.close();
    }

    /// Waits for the signal. Cancel-safe.
    pub(crate) async fn cancel_safe_recv(&self) {
        let res = self.0.acquire().await;
        debug_assert!(res.is_err());
    }

    /// Waits for the signal, or until `ctx` is canceled.
    pub async fn recv(&self, ctx: &ctx::Ctx) -> ctx::OrCanceled<()> {
        ctx.wait(self.cancel_safe_recv()).await
    }

    /// Checks whether the signal has been sent.
    pub fn try_recv(&self) -> bool {
        self.0.is_closed()
    }
}
