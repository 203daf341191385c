//! Lifecycle coordination for active channels: membership-driven deletion,
//! bot-driven limit adjustment, full/not-full visibility, ownership
//! transfer, and idempotent teardown.

use crate::{
    context::Context,
    log_event, log_internal,
    vc::{
        active::now_unix,
        options::{CapacityMode, VcOption},
        panel, permissions,
    },
};
use anyhow::{bail, Result};
use serenity::all::{Cache, ChannelId, EditChannel, EditMember, GuildId, UserId};
use std::collections::BTreeSet;

/// Who currently sits in a voice channel, split by bot flag.  Humans are
/// sorted by id so downstream decisions are deterministic.
#[derive(Debug, Default)]
pub struct Occupants {
    pub humans: Vec<UserId>,
    pub bots: u16,
}

impl Occupants {
    pub fn has_humans(&self) -> bool {
        !self.humans.is_empty()
    }

    pub fn total(&self) -> usize {
        self.humans.len() + usize::from(self.bots)
    }
}

pub fn occupants(cache: &Cache, guild_id: GuildId, channel_id: ChannelId) -> Occupants {
    let Some(guild) = cache.guild(guild_id) else {
        return Occupants::default();
    };

    let mut result = Occupants::default();
    for (user_id, state) in &guild.voice_states {
        if state.channel_id != Some(channel_id) {
            continue;
        }
        let is_bot = guild.members.get(user_id).map(|m| m.user.bot).unwrap_or(false);
        if is_bot {
            result.bots += 1;
        } else {
            result.humans.push(*user_id);
        }
    }
    result.humans.sort();
    result
}

pub fn channel_exists(cache: &Cache, guild_id: GuildId, channel_id: ChannelId) -> bool {
    cache
        .guild(guild_id)
        .map(|guild| guild.channels.contains_key(&channel_id))
        .unwrap_or(false)
}

pub fn cached_channel_name(
    cache: &Cache,
    guild_id: GuildId,
    channel_id: ChannelId,
) -> Option<String> {
    let guild = cache.guild(guild_id)?;
    guild.channels.get(&channel_id).map(|c| c.name.clone())
}

pub fn is_bot_user(cache: &Cache, guild_id: GuildId, user_id: UserId) -> bool {
    cache
        .guild(guild_id)
        .and_then(|guild| guild.members.get(&user_id).map(|m| m.user.bot))
        .unwrap_or(false)
}

/// Whether a voice-state actor is a bot.  The gateway ships member info on
/// guild voice updates; that beats the cache, which can miss members and
/// would then miscount bot occupants.
pub fn resolve_is_bot(
    cache: &Cache,
    guild_id: GuildId,
    user_id: UserId,
    state_hint: Option<bool>,
) -> bool {
    state_hint.unwrap_or_else(|| is_bot_user(cache, guild_id, user_id))
}

/// Present members the incoming owner's ban list applies to.
pub fn disconnect_targets(present: &[UserId], banned: &BTreeSet<UserId>) -> Vec<UserId> {
    present
        .iter()
        .copied()
        .filter(|user_id| banned.contains(user_id))
        .collect()
}

/// Deterministic successor rule for ownership transfer: the remaining human
/// with the lowest user id.
pub fn pick_successor(humans: &[UserId]) -> Option<UserId> {
    humans.iter().copied().min()
}

// -- membership events ------------------------------------------------------

/// A member appeared in an active (non-hub) channel.
pub async fn member_joined(
    ctx: &Context<'_>,
    guild_id: GuildId,
    channel_id: ChannelId,
    user_id: UserId,
    is_bot: bool,
) -> Result<()> {
    if is_bot {
        return bot_count_changed(ctx, channel_id, BotDelta::Joined).await;
    }

    let (suppress_log, log_suppressed, text_channel_id) = {
        let mut registry = ctx.app.vc.write().await;
        let Some(vc) = registry.get_active_mut(channel_id) else {
            return Ok(());
        };
        let suppress = std::mem::take(&mut vc.suppress_next_join_log);
        let out = (
            suppress,
            vc.options.contains(VcOption::NoJoinLeaveLog),
            vc.text_channel_id,
        );
        if suppress {
            let record = vc.clone();
            if let Err(e) = ctx.app.store.put_active(record).await {
                log_internal!("Store write failed for {}: {}", channel_id, e);
            }
        }
        out
    };

    if !suppress_log && !log_suppressed {
        panel::log_membership(ctx, channel_id, user_id, true).await;
    }

    set_text_access(ctx, guild_id, text_channel_id, user_id, true).await;
    recheck_full_visibility(ctx, guild_id, channel_id).await;
    Ok(())
}

/// A member disappeared from an active channel.
pub async fn member_left(
    ctx: &Context<'_>,
    guild_id: GuildId,
    channel_id: ChannelId,
    user_id: UserId,
    is_bot: bool,
) -> Result<()> {
    if is_bot {
        bot_count_changed(ctx, channel_id, BotDelta::Left).await?;
        return maybe_delete_if_empty(ctx, guild_id, channel_id).await;
    }

    let (was_owner, log_suppressed, text_channel_id) = {
        let registry = ctx.app.vc.read().await;
        let Some(vc) = registry.get_active(channel_id) else {
            return Ok(());
        };
        (
            vc.owner_id == user_id,
            vc.options.contains(VcOption::NoJoinLeaveLog),
            vc.text_channel_id,
        )
    };

    if !log_suppressed {
        panel::log_membership(ctx, channel_id, user_id, false).await;
    }

    set_text_access(ctx, guild_id, text_channel_id, user_id, false).await;

    if was_owner {
        transfer_ownership_on_leave(ctx, guild_id, channel_id).await?;
    }

    recheck_full_visibility(ctx, guild_id, channel_id).await;
    maybe_delete_if_empty(ctx, guild_id, channel_id).await
}

enum BotDelta {
    Joined,
    Left,
}

/// Fixed-capacity channels absorb bots by widening the live limit, so a bot
/// never eats a human slot.  The configured cap is kept separately and the
/// live limit is always `cap + bots`, clamped to the platform ceiling.
async fn bot_count_changed(
    ctx: &Context<'_>,
    channel_id: ChannelId,
    delta: BotDelta,
) -> Result<()> {
    let new_limit = {
        let mut registry = ctx.app.vc.write().await;
        let Some(vc) = registry.get_active_mut(channel_id) else {
            return Ok(());
        };
        let new_limit = match delta {
            BotDelta::Joined => vc.note_bot_joined(),
            BotDelta::Left => vc.note_bot_left(),
        };
        let fixed = matches!(vc.capacity, CapacityMode::Fixed(_));
        let record = vc.clone();
        if let Err(e) = ctx.app.store.put_active(record).await {
            log_internal!("Store write failed for {}: {}", channel_id, e);
        }
        if !fixed {
            return Ok(());
        }
        new_limit
    };

    channel_id
        .edit(ctx.http, EditChannel::new().user_limit(u32::from(new_limit)))
        .await?;
    Ok(())
}

/// Grants or revokes a human member's access to the companion text channel.
async fn set_text_access(
    ctx: &Context<'_>,
    guild_id: GuildId,
    text_channel_id: Option<ChannelId>,
    user_id: UserId,
    joined: bool,
) {
    let Some(text_channel_id) = text_channel_id else {
        return;
    };
    let Some(mut overwrites) = permissions::cached_overwrites(ctx.cache, guild_id, text_channel_id)
    else {
        return;
    };

    if joined {
        permissions::grant_member_text(&mut overwrites, user_id);
    } else {
        permissions::clear_member(&mut overwrites, user_id);
    }

    if let Err(e) = text_channel_id
        .edit(ctx.http, EditChannel::new().permissions(overwrites))
        .await
    {
        log_internal!(
            "Could not update text channel access for {}: {}",
            text_channel_id,
            e
        );
    }
}

/// Hide-when-full: at or above the live limit the channel disappears for
/// everyone (the bot keeps its own overwrite); below it, it reappears.
async fn recheck_full_visibility(ctx: &Context<'_>, guild_id: GuildId, channel_id: ChannelId) {
    let live_limit = {
        let registry = ctx.app.vc.read().await;
        let Some(vc) = registry.get_active(channel_id) else {
            return;
        };
        if !vc.options.contains(VcOption::HideWhenFull) {
            return;
        }
        vc.live_limit()
    };
    if live_limit == 0 {
        return;
    }

    let visible = occupants(ctx.cache, guild_id, channel_id).total() < usize::from(live_limit);
    let Some(mut overwrites) = permissions::cached_overwrites(ctx.cache, guild_id, channel_id)
    else {
        return;
    };
    permissions::set_everyone_visible(&mut overwrites, guild_id, visible);

    if let Err(e) = channel_id
        .edit(ctx.http, EditChannel::new().permissions(overwrites))
        .await
    {
        log_internal!("Visibility toggle failed for {}: {}", channel_id, e);
    }
}

// -- ownership transfer -----------------------------------------------------

pub async fn transfer_ownership_on_leave(
    ctx: &Context<'_>,
    guild_id: GuildId,
    channel_id: ChannelId,
) -> Result<()> {
    {
        let registry = ctx.app.vc.read().await;
        let Some(vc) = registry.get_active(channel_id) else {
            return Ok(());
        };
        if vc.options.contains(VcOption::NoOwnershipTransfer) {
            return Ok(());
        }
    }

    // Nobody left: the emptiness check deletes the channel instead.
    let humans = occupants(ctx.cache, guild_id, channel_id).humans;
    let Some(successor) = pick_successor(&humans) else {
        return Ok(());
    };

    transfer_ownership_to(ctx, channel_id, successor).await
}

/// Makes `new_owner` the owner: their personal ban list replaces the old
/// owner's on the channel (present banned members get disconnected), and the
/// control channel is rebuilt scoped to them.
pub async fn transfer_ownership_to(
    ctx: &Context<'_>,
    channel_id: ChannelId,
    new_owner: UserId,
) -> Result<()> {
    let bans = ctx.app.store.ban_list(new_owner).await;

    let (guild_id, old_control, record) = {
        let mut registry = ctx.app.vc.write().await;
        let Some(vc) = registry.get_active_mut(channel_id) else {
            bail!("no active record for channel {}", channel_id);
        };
        vc.owner_id = new_owner;
        vc.banned_users = bans.clone();
        let old_control = vc.control_channel_id.take();
        let record = vc.clone();
        if let Err(e) = ctx.app.store.put_active(record.clone()).await {
            log_internal!("Store write failed for {}: {}", channel_id, e);
        }
        (record.guild_id, old_control, record)
    };

    let present = occupants(ctx.cache, guild_id, channel_id).humans;
    for user_id in disconnect_targets(&present, &bans) {
        if let Err(e) = guild_id
            .edit_member(ctx.http, user_id, EditMember::new().disconnect_member())
            .await
        {
            log_internal!("Could not disconnect banned user {}: {}", user_id, e);
        }
    }

    if let Some(mut overwrites) = permissions::cached_overwrites(ctx.cache, guild_id, channel_id) {
        for user_id in &bans {
            permissions::deny_member_connect(&mut overwrites, *user_id);
        }
        if let Err(e) = channel_id
            .edit(ctx.http, EditChannel::new().permissions(overwrites))
            .await
        {
            log_internal!("Could not apply ban overwrites to {}: {}", channel_id, e);
        }
    }

    if !record.options.contains(VcOption::NoControlPanel) {
        if let Some(old_control) = old_control {
            if let Err(e) = old_control.delete(ctx.http).await {
                log_internal!("Old control channel {} already gone: {}", old_control, e);
            }
        }

        let vc_name = cached_channel_name(ctx.cache, guild_id, channel_id)
            .unwrap_or_else(|| "vc".to_string());
        let max_attempts = { ctx.app.cfg.read().await.vc.rate_limit_max_attempts };
        match panel::create_control_channel(
            ctx,
            guild_id,
            &vc_name,
            record.control_category_id,
            record.category_id,
            new_owner,
            max_attempts,
        )
        .await
        {
            Ok(control_channel_id) => {
                let snapshot = {
                    let mut registry = ctx.app.vc.write().await;
                    let Some(vc) = registry.get_active_mut(channel_id) else {
                        return Ok(());
                    };
                    vc.control_channel_id = Some(control_channel_id);
                    let record = vc.clone();
                    if let Err(e) = ctx.app.store.put_active(record.clone()).await {
                        log_internal!("Store write failed for {}: {}", channel_id, e);
                    }
                    record
                };
                panel::post_control_panel(ctx, &snapshot, control_channel_id, new_owner).await;
            }
            Err(e) => {
                log_internal!("Could not rebuild control channel for {}: {}", channel_id, e);
            }
        }
    }

    log_event!(
        "Ownership of {} transferred to {}",
        channel_id,
        new_owner,
    );
    Ok(())
}

// -- deletion ---------------------------------------------------------------

/// Deletes the channel if no humans remain and the deferred-deletion guard
/// has expired.
pub async fn maybe_delete_if_empty(
    ctx: &Context<'_>,
    guild_id: GuildId,
    channel_id: ChannelId,
) -> Result<()> {
    {
        let registry = ctx.app.vc.read().await;
        let Some(vc) = registry.get_active(channel_id) else {
            return Ok(());
        };
        if !vc.deletable_at(now_unix()) {
            return Ok(());
        }
    }

    if occupants(ctx.cache, guild_id, channel_id).has_humans() {
        return Ok(());
    }

    delete_active_vc(ctx, channel_id).await
}

/// Tears down an active channel: companion channels, the voice channel
/// itself, the persisted record, and any pending timer.  Idempotent; the
/// registry entry is claimed first, so a second concurrent call sees no
/// record and does nothing.
pub async fn delete_active_vc(ctx: &Context<'_>, channel_id: ChannelId) -> Result<()> {
    let record = { ctx.app.vc.write().await.remove_active(channel_id) };
    let Some(record) = record else {
        return Ok(());
    };

    ctx.app.timers.cancel(channel_id);

    for companion in [record.text_channel_id, record.control_channel_id]
        .into_iter()
        .flatten()
    {
        if let Err(e) = companion.delete(ctx.http).await {
            log_internal!("Companion channel {} already gone: {}", companion, e);
        }
    }

    if let Err(e) = channel_id.delete(ctx.http).await {
        log_internal!("Voice channel {} already gone: {}", channel_id, e);
    }

    if let Err(e) = ctx.app.store.delete_active(channel_id).await {
        log_internal!("Store delete failed for {}: {}", channel_id, e);
    }

    log_event!("Deleted VC {}", channel_id);
    Ok(())
}

/// An active channel's platform object was deleted externally; drop the
/// record and companions without touching the (gone) voice channel.
pub async fn cleanup_externally_deleted(ctx: &Context<'_>, channel_id: ChannelId) -> Result<()> {
    delete_active_vc(ctx, channel_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successor_is_the_lowest_remaining_user_id() {
        let humans = vec![UserId::new(30), UserId::new(12), UserId::new(25)];
        assert_eq!(pick_successor(&humans), Some(UserId::new(12)));
        assert_eq!(pick_successor(&[]), None);
    }

    #[test]
    fn transfer_disconnects_exactly_the_new_owners_banned_present_members() {
        let present = vec![UserId::new(1), UserId::new(2), UserId::new(3)];
        let banned: BTreeSet<UserId> =
            [UserId::new(2), UserId::new(9)].into_iter().collect();

        // Only present-and-banned members get kicked; absent bans wait for
        // the connect overwrite to keep them out.
        assert_eq!(disconnect_targets(&present, &banned), vec![UserId::new(2)]);
        assert!(disconnect_targets(&present, &BTreeSet::new()).is_empty());
        assert!(disconnect_targets(&[], &banned).is_empty());
    }

    #[test]
    fn voice_state_member_info_outranks_the_cache() {
        let cache = Cache::new();
        let guild = GuildId::new(1);
        let user = UserId::new(2);

        assert!(resolve_is_bot(&cache, guild, user, Some(true)));
        assert!(!resolve_is_bot(&cache, guild, user, Some(false)));
        // No hint and not in the cache: treated as human.
        assert!(!resolve_is_bot(&cache, guild, user, None));
    }

    #[test]
    fn occupant_totals_count_bots() {
        let occ = Occupants {
            humans: vec![UserId::new(1), UserId::new(2)],
            bots: 3,
        };
        assert_eq!(occ.total(), 5);
        assert!(occ.has_humans());
        assert!(!Occupants::default().has_humans());
    }
}
