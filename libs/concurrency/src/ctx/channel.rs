//! Context-aware unbounded mpsc channel on top of `tokio::sync::mpsc`.
//!
//! Disconnection is deliberately not observable: `send()` drops the value if
//! the receiver is gone and `recv()` waits for cancellation if all senders are
//! gone. Tasks are expected to terminate through context cancellation rather
//! than through channel errors.
use crate::ctx;
use std::fmt;
use tokio::sync::mpsc;

/// Sender end of the unbounded channel.
pub struct UnboundedSender<T>(mpsc::UnboundedSender<T>);

/// Receiver end of the unbounded channel.
pub struct UnboundedReceiver<T>(mpsc::UnboundedReceiver<T>);

// Sender is cloneable regardless of `T`, so no derive.
impl<T> Clone for UnboundedSender<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> fmt::Debug for UnboundedSender<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("UnboundedSender").finish()
    }
}

impl<T> fmt::Debug for UnboundedReceiver<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("UnboundedReceiver").finish()
    }
}

/// Constructs a new unbounded channel.
pub fn unbounded<T>() -> (UnboundedSender<T>, UnboundedReceiver<T>) {
    let (send, recv) = mpsc::unbounded_channel();
    (UnboundedSender(send), UnboundedReceiver(recv))
}

impl<T> UnboundedSender<T> {
    /// Sends a message. Never blocks.
    pub fn send(&self, v: T) {
        let _ = self.0.send(v);
    }
}

impl<T> UnboundedReceiver<T> {
    /// Awaits the next message.
    pub async fn recv(&mut self, ctx: &ctx::Ctx) -> ctx::OrCanceled<T> {
        ctx.wait(async {
            match self.0.recv().await {
                Some(v) => v,
                None => std::future::pending().await,
            }
        })
        .await
    }

    /// Pops a message iff one is available.
    pub fn try_recv(&mut self) -> Option<T> {
        self.0.try_recv().ok()
    }
}
