//! Timeout ticker: turns the timeout scheduled by the state machine into a
//! `Timeout` input once its duration elapses. A newer schedule replaces the
//! pending one.
use crate::state_machine::Input;
use keel_concurrency::{ctx, sync};
use keel_roles::validator;

pub(crate) async fn run(
    ctx: &ctx::Ctx,
    mut schedule: sync::watch::Receiver<Option<validator::TimeoutInfo>>,
    inputs: ctx::channel::UnboundedSender<Input>,
) -> ctx::Result<()> {
    loop {
        let timeout = schedule.borrow_and_update().clone();
        let Some(timeout) = timeout else {
            sync::changed(ctx, &mut schedule).await?;
            continue;
        };
        let deadline = ctx.now() + timeout.duration();
        if sync::changed(&ctx.with_deadline(deadline.into()), &mut schedule)
            .await
            .is_ok()
        {
            // Rescheduled.
            continue;
        }
        if !ctx.is_active() {
            return Err(ctx::Canceled.into());
        }
        tracing::trace!(timeout = %timeout.round_state(), "firing timeout");
        inputs.send(Input::Timeout(timeout));
        sync::changed(ctx, &mut schedule).await?;
    }
}
