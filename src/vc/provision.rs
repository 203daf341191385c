//! Provisioning: turning a hub join into a live, owned voice channel.
//!
//! The sequence is ordered so that a crash mid-way leaves either nothing or
//! a fully accounted-for channel: the record is registered and persisted
//! immediately after the platform create succeeds, before any companion
//! channels or the member move.

use crate::{
    context::Context,
    log_event, log_internal, retry,
    vc::{
        active::{now_unix, ActiveVc, NameLock},
        lifecycle, name,
        options::{Placement, VcOption},
        panel, permissions,
        system::VcSystemConfig,
    },
};
use serenity::all::{
    ChannelId, ChannelType, CreateChannel, EditMember, GuildId, Member, UserId,
};
use std::{collections::BTreeSet, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("user already owns an active channel in this guild")]
    UserAlreadyHasActiveChannel,
    #[error("could not create the voice channel")]
    CreationFailed(#[source] serenity::Error),
    #[error("could not move the creator into the new channel")]
    MoveFailed(#[source] serenity::Error),
    #[error("the new channel disappeared before the creator could be moved")]
    ChannelVanished,
}

/// Provisions a channel for `member`, who just joined the hub described by
/// `config`.  Returns the new voice channel's id.
///
/// Serialized per user through the creation guard, so a rapid hub
/// re-join cannot race two channels into existence.
pub async fn provision(
    ctx: &Context<'_>,
    member: &Member,
    config: &VcSystemConfig,
) -> Result<ChannelId, ProvisionError> {
    let user_id = member.user.id;
    let vc_cfg = { ctx.app.cfg.read().await.vc.clone() };

    let guard = ctx.app.creation_guards.acquire(user_id).await;
    let result = provision_locked(ctx, member, config, &vc_cfg).await;
    drop(guard);
    ctx.app
        .creation_guards
        .evict_after(user_id, Duration::from_secs(vc_cfg.creation_guard_ttl_seconds));
    result
}

async fn provision_locked(
    ctx: &Context<'_>,
    member: &Member,
    config: &VcSystemConfig,
    vc_cfg: &crate::config::Vc,
) -> Result<ChannelId, ProvisionError> {
    let guild_id = config.guild_id;
    let user_id = member.user.id;

    // One active channel per user per guild.  A record whose channel no
    // longer exists is stale bookkeeping, not a live claim; drop it and
    // proceed.
    {
        let mut registry = ctx.app.vc.write().await;
        if let Some(existing) = registry.active_owned_by(guild_id, user_id) {
            let existing_id = existing.channel_id;
            if lifecycle::channel_exists(ctx.cache, guild_id, existing_id) {
                return Err(ProvisionError::UserAlreadyHasActiveChannel);
            }
            registry.remove_active(existing_id);
            if let Err(e) = ctx.app.store.delete_active(existing_id).await {
                log_internal!("Store delete failed for stale {}: {}", existing_id, e);
            }
            log_internal!("Dropped stale record for {} owned by {}", existing_id, user_id);
        }
    }

    // Resolve placement from the cache before any await takes it away.
    let (parent_category, under_hub_position) =
        placement_of(ctx, config).ok_or(ProvisionError::ChannelVanished)?;

    let (channel_name, name_lock) = if config.options.contains(VcOption::LockedName) {
        let base = name::locked_base(config.locked_name.as_deref(), &member.user.name);
        let used = {
            let registry = ctx.app.vc.read().await;
            registry.used_name_numbers(&base, parent_category)
        };
        let number = name::allocate_number(&used);
        (name::numbered(&base, number), Some(NameLock { base, number }))
    } else {
        (name::default_name(&member.user.name), None)
    };

    let bot_id = ctx.cache.current_user().id;
    let banned_users = ctx.app.store.ban_list(user_id).await;
    let overwrites = permissions::creation_overwrites(
        guild_id,
        bot_id,
        &config.visibility_roles,
        &config.participant_roles,
        &banned_users,
    );

    let mut builder = CreateChannel::new(&channel_name)
        .kind(ChannelType::Voice)
        .permissions(overwrites);
    if let Some(category_id) = parent_category {
        builder = builder.category(category_id);
    } else if let Some(position) = under_hub_position {
        builder = builder.position(position.saturating_add(1));
    }
    let base_limit = config.capacity.base_limit();
    if base_limit > 0 {
        builder = builder.user_limit(u32::from(base_limit));
    }

    let channel = retry::with_backoff(vc_cfg.rate_limit_max_attempts, retry::is_rate_limited, || {
        let builder = builder.clone();
        async move { guild_id.create_channel(ctx.http, builder).await }
    })
    .await
    .map_err(ProvisionError::CreationFailed)?;
    let channel_id = channel.id;

    let delete_not_before = if config.options.contains(VcOption::DelayedDelete) {
        config
            .delete_delay_minutes
            .map(|minutes| now_unix() + u64::from(minutes) * 60)
    } else {
        None
    };

    let record = ActiveVc {
        channel_id,
        guild_id,
        owner_id: user_id,
        capacity: config.capacity,
        bot_occupants: 0,
        category_id: parent_category,
        text_channel_id: None,
        control_channel_id: None,
        control_category_id: config.control_category_id,
        options: config.options.clone(),
        is_locked: false,
        banned_users,
        key_allowed_users: BTreeSet::new(),
        view_allowed_users: BTreeSet::new(),
        name_lock,
        delete_not_before,
        // The move below raises a join event for the creator; it is not news.
        suppress_next_join_log: true,
    };

    {
        let mut registry = ctx.app.vc.write().await;
        registry.insert_active(record.clone());
        if let Err(e) = ctx.app.store.put_active(record).await {
            log_internal!("Store write failed for {}: {}", channel_id, e);
        }
    }

    if delete_not_before.is_some() {
        ctx.app
            .timers
            .arm(ctx.app.clone(), ctx.cache_http.clone(), channel_id);
    }

    if config.options.contains(VcOption::CompanionText) {
        create_companion_text(
            ctx,
            guild_id,
            channel_id,
            &channel_name,
            bot_id,
            parent_category,
            vc_cfg.rate_limit_max_attempts,
        )
        .await;
    }

    match guild_id
        .edit_member(ctx.http, user_id, EditMember::new().voice_channel(channel_id))
        .await
    {
        Ok(_) => {}
        Err(e) if retry::is_missing_target(&e) => {
            // The creator left voice already; an empty channel with no owner
            // inside is torn down on the spot.
            if let Err(e) = lifecycle::delete_active_vc(ctx, channel_id).await {
                log_internal!("Rollback of {} failed: {}", channel_id, e);
            }
            return Err(ProvisionError::MoveFailed(e));
        }
        Err(e) => {
            log_internal!("Could not move {} into {}: {}", user_id, channel_id, e);
        }
    }

    if !config.options.contains(VcOption::NoControlPanel) {
        match panel::create_control_channel(
            ctx,
            guild_id,
            &channel_name,
            config.control_category_id,
            parent_category,
            user_id,
            vc_cfg.rate_limit_max_attempts,
        )
        .await
        {
            Ok(control_channel_id) => {
                let snapshot = {
                    let mut registry = ctx.app.vc.write().await;
                    registry.get_active_mut(channel_id).map(|vc| {
                        vc.control_channel_id = Some(control_channel_id);
                        vc.clone()
                    })
                };
                if let Some(snapshot) = snapshot {
                    if let Err(e) = ctx.app.store.put_active(snapshot.clone()).await {
                        log_internal!("Store write failed for {}: {}", channel_id, e);
                    }
                    panel::post_control_panel(ctx, &snapshot, control_channel_id, user_id).await;
                }
            }
            Err(e) => {
                log_internal!("Could not create control channel for {}: {}", channel_id, e);
            }
        }
    }

    if let Some(notify) = config.notify {
        panel::send_creation_notification(ctx, &notify, guild_id, channel_id, member).await;
    }

    log_event!(
        "Provisioned {} ({}) for {}",
        channel_name,
        channel_id,
        user_id,
    );
    Ok(channel_id)
}

/// Target category (if any) and, for under-hub placement, the hub's
/// position.  `None` means the hub itself is gone from the cache.
fn placement_of(ctx: &Context<'_>, config: &VcSystemConfig) -> Option<(Option<ChannelId>, Option<u16>)> {
    match config.placement {
        Placement::AutoCategory { category_id } | Placement::FixedCategory { category_id } => {
            Some((Some(category_id), None))
        }
        Placement::UnderHub => {
            let guild = ctx.cache.guild(config.guild_id)?;
            let hub = guild.channels.get(&config.hub_channel_id)?;
            Some((hub.parent_id, Some(hub.position)))
        }
    }
}

async fn create_companion_text(
    ctx: &Context<'_>,
    guild_id: GuildId,
    channel_id: ChannelId,
    channel_name: &str,
    bot_id: UserId,
    parent_category: Option<ChannelId>,
    max_attempts: u32,
) {
    let overwrites = permissions::text_channel_overwrites(guild_id, bot_id, &[]);
    // Companion text channels share the voice channel's name exactly.
    let mut builder = CreateChannel::new(channel_name)
        .kind(ChannelType::Text)
        .permissions(overwrites);
    if let Some(category_id) = parent_category {
        builder = builder.category(category_id);
    }

    let created = retry::with_backoff(max_attempts, retry::is_rate_limited, || {
        let builder = builder.clone();
        async move { guild_id.create_channel(ctx.http, builder).await }
    })
    .await;

    match created {
        Ok(text_channel) => {
            let snapshot = {
                let mut registry = ctx.app.vc.write().await;
                registry.get_active_mut(channel_id).map(|vc| {
                    vc.text_channel_id = Some(text_channel.id);
                    vc.clone()
                })
            };
            if let Some(snapshot) = snapshot {
                if let Err(e) = ctx.app.store.put_active(snapshot).await {
                    log_internal!("Store write failed for {}: {}", channel_id, e);
                }
            }
        }
        Err(e) => {
            log_internal!("Could not create companion text channel for {}: {}", channel_id, e);
        }
    }
}
