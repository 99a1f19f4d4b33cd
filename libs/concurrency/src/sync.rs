//! Context-aware helpers for `tokio::sync` primitives.
pub use tokio::sync::watch;

use crate::ctx;

/// Waits for a change of the watched value and borrows the new value.
pub async fn changed<'a, T>(
    ctx: &ctx::Ctx,
    recv: &'a mut watch::Receiver<T>,
) -> ctx::OrCanceled<watch::Ref<'a, T>> {
    ctx.wait(async {
        if recv.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        recv.borrow_and_update()
    })
    .await
}

/// Waits until the watched value satisfies `pred`.
pub async fn wait_for<'a, T>(
    ctx: &ctx::Ctx,
    recv: &'a mut watch::Receiver<T>,
    pred: impl Fn(&T) -> bool,
) -> ctx::OrCanceled<watch::Ref<'a, T>> {
    if let Ok(res) = ctx.wait(recv.wait_for(pred)).await? {
        return Ok(res);
    }
    // The sender is gone, the value will never change.
    ctx.canceled().await;
    Err(ctx::Canceled)
}
