use crate::{context::Context, event::*, plugin::*, vc::reconcile};
use anyhow::Result;

/// Rebuilds voice channel state from the store once the gateway is up.
pub struct Ready;

#[serenity::async_trait]
impl Plugin for Ready {
    fn name(&self) -> &'static str {
        "ready"
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        let Event::Ready(_) = event else {
            return Ok(EventHandled::No);
        };

        reconcile::run(ctx).await?;
        Ok(EventHandled::Yes)
    }
}
