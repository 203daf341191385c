use crate::{
    context::Context,
    event::*,
    log_event, log_internal,
    plugin::*,
    vc::{lifecycle, provision},
};
use anyhow::Result;
use serenity::all::{ChannelId, GuildChannel, GuildId, UserId, VoiceState};
use std::time::Duration;

/// Drives the hub voice channel subsystem from voice state updates.
pub struct VcLifecycle;

#[serenity::async_trait]
impl Plugin for VcLifecycle {
    fn name(&self) -> &'static str {
        "vc-lifecycle"
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        match event {
            Event::VoiceStateUpdate { old, new } => handle_voice_state(ctx, old, new).await,
            Event::ChannelDelete(channel) => handle_channel_delete(ctx, channel).await,
            _ => Ok(EventHandled::No),
        }
    }
}

/// A voice state update is a leave, a join, or a move (both at once).  The
/// leave side runs first so a move settles the source channel's books
/// before the destination's.
async fn handle_voice_state(
    ctx: &Context<'_>,
    old: &Option<VoiceState>,
    new: &VoiceState,
) -> Result<EventHandled> {
    let user_id = new.user_id;
    let old_channel = old.as_ref().and_then(|o| o.channel_id);
    let new_channel = new.channel_id;
    if old_channel == new_channel {
        // Mute, deafen, stream toggles.
        return Ok(EventHandled::No);
    }

    // The update's own member payload knows bot-ness even when the member
    // cache does not.
    let bot_hint = new
        .member
        .as_ref()
        .or_else(|| old.as_ref().and_then(|o| o.member.as_ref()))
        .map(|m| m.user.bot);

    if let Some(left) = old_channel {
        let guild_id = old.as_ref().and_then(|o| o.guild_id).or(new.guild_id);
        if let Some(guild_id) = guild_id {
            let is_bot = lifecycle::resolve_is_bot(ctx.cache, guild_id, user_id, bot_hint);
            lifecycle::member_left(ctx, guild_id, left, user_id, is_bot).await?;
        }
    }

    if let Some(joined) = new_channel {
        if let Some(guild_id) = new.guild_id {
            let is_bot = lifecycle::resolve_is_bot(ctx.cache, guild_id, user_id, bot_hint);
            handle_join(ctx, guild_id, joined, user_id, is_bot).await?;
        }
    }

    // A move can leave the source looking occupied until both half-events
    // settle in the cache; give it a beat and look again.
    if let (Some(left), Some(_)) = (old_channel, new_channel) {
        if let Some(guild_id) = old.as_ref().and_then(|o| o.guild_id).or(new.guild_id) {
            let delay = { ctx.app.cfg.read().await.vc.move_recheck_delay_ms };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            lifecycle::maybe_delete_if_empty(ctx, guild_id, left).await?;
        }
    }

    Ok(EventHandled::Yes)
}

async fn handle_join(
    ctx: &Context<'_>,
    guild_id: GuildId,
    channel_id: ChannelId,
    user_id: UserId,
    is_bot: bool,
) -> Result<()> {
    let hub_config = {
        let registry = ctx.app.vc.read().await;
        registry.system_for_hub(channel_id).cloned()
    };

    let Some(config) = hub_config else {
        return lifecycle::member_joined(ctx, guild_id, channel_id, user_id, is_bot).await;
    };

    // Bots sitting in the hub do not get channels.
    if is_bot {
        return Ok(());
    }

    let member = guild_id.member(ctx.cache_http, user_id).await?;
    if let Err(e) = provision::provision(ctx, &member, &config).await {
        log_internal!("Provisioning for {} failed: {}", user_id, e);
    }
    Ok(())
}

async fn handle_channel_delete(
    ctx: &Context<'_>,
    channel: &GuildChannel,
) -> Result<EventHandled> {
    let removed_hub = {
        let mut registry = ctx.app.vc.write().await;
        registry.remove_system(channel.id)
    };
    if removed_hub.is_some() {
        ctx.app.store.delete_system(channel.id).await?;
        log_event!("Hub {} deleted, dropped its provisioning rule", channel.id);
        return Ok(EventHandled::Yes);
    }

    let is_active = { ctx.app.vc.read().await.get_active(channel.id).is_some() };
    if is_active {
        lifecycle::cleanup_externally_deleted(ctx, channel.id).await?;
        return Ok(EventHandled::Yes);
    }

    Ok(EventHandled::No)
}
