use crate::{context::Context, event::*, log_event, logging::*, plugin::*};
use anyhow::Result;

/// Prints debug information about event to stdout
pub struct Debug;

#[serenity::async_trait]
impl Plugin for Debug {
    fn name(&self) -> &'static str {
        "debug"
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        match event {
            Event::Ready(ready) => {
                log_event!(
                    "Connected to {} server(s) as {}",
                    ready.guilds.len(),
                    ctx.cache.current_user().color(),
                );
            }
            Event::VoiceStateUpdate { old, new } => match (old, new.channel_id) {
                (Some(old), Some(new_id)) if old.channel_id == Some(new_id) => {
                    // State change within same channel, e.g. mute/unmute
                    // Not currently debug logging this
                }
                (Some(old), Some(_)) => log_event!(
                    "{} moved VC channel from \"{}\" to \"{}\"",
                    new.user_id.color(ctx.http).await,
                    old.channel_id.color(ctx.http).await,
                    new.channel_id.color(ctx.http).await,
                ),
                (Some(old), None) => log_event!(
                    "{} left VC channel \"{}\"",
                    new.user_id.color(ctx.http).await,
                    old.channel_id.color(ctx.http).await,
                ),
                (None, Some(_)) => log_event!(
                    "{} joined VC channel \"{}\"",
                    new.user_id.color(ctx.http).await,
                    new.channel_id.color(ctx.http).await,
                ),
                (None, None) => log_event!("Unknown voice state update"),
            },
            Event::ChannelDelete(channel) => {
                log_event!(
                    "{}{}Channel \"{}\" deleted",
                    Some(channel.guild_id).color(ctx.http).await,
                    Glue {}.color(),
                    channel.name,
                );
            }
        }

        Ok(EventHandled::No)
    }
}
