//! Programmatic operations surface: hub registration, per-channel state
//! changes, and the owner-scoped ban list.  The slash-command layer that an
//! admin actually types into is a thin caller of these.

use crate::{
    context::Context,
    log_event, log_internal,
    vc::{
        active::ActiveVc,
        lifecycle,
        options::{CapacityMode, VcOption, FIXED_CAPACITY_MAX},
        permissions,
        system::VcSystemConfig,
    },
};
use anyhow::{bail, Result};
use serenity::all::{ChannelId, EditChannel, EditMember, GuildId, UserId};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("fixed capacity must be between 1 and {FIXED_CAPACITY_MAX}")]
    CapacityOutOfRange,
    #[error("the hub channel does not exist")]
    UnknownHubChannel,
    #[error("delayed deletion needs a positive delay in minutes")]
    InvalidDeleteDelay,
}

/// Static validation of a provisioning rule, independent of any guild state.
pub fn validate_system(config: &VcSystemConfig) -> Result<(), ConfigError> {
    if let CapacityMode::Fixed(n) = config.capacity {
        if n == 0 || n > FIXED_CAPACITY_MAX {
            return Err(ConfigError::CapacityOutOfRange);
        }
    }
    if config.options.contains(VcOption::DelayedDelete)
        && !config.delete_delay_minutes.is_some_and(|m| m > 0)
    {
        return Err(ConfigError::InvalidDeleteDelay);
    }
    Ok(())
}

/// Registers (or replaces) the provisioning rule for a hub channel.
pub async fn register_hub(ctx: &Context<'_>, config: VcSystemConfig) -> Result<()> {
    validate_system(&config)?;
    if !lifecycle::channel_exists(ctx.cache, config.guild_id, config.hub_channel_id) {
        return Err(ConfigError::UnknownHubChannel.into());
    }

    let hub_channel_id = config.hub_channel_id;
    {
        let mut registry = ctx.app.vc.write().await;
        registry.insert_system(config.clone());
        ctx.app.store.put_system(config).await?;
    }
    log_event!("Registered hub {}", hub_channel_id);
    Ok(())
}

/// Removes a hub's rule.  Channels already provisioned from it keep running
/// on their copied configuration.
pub async fn remove_hub(ctx: &Context<'_>, hub_channel_id: ChannelId) -> Result<()> {
    {
        let mut registry = ctx.app.vc.write().await;
        registry.remove_system(hub_channel_id);
        ctx.app.store.delete_system(hub_channel_id).await?;
    }
    log_event!("Removed hub {}", hub_channel_id);
    Ok(())
}

pub async fn list_active_channels(ctx: &Context<'_>, guild_id: GuildId) -> Vec<ActiveVc> {
    let registry = ctx.app.vc.read().await;
    registry
        .active_in_guild(guild_id)
        .into_iter()
        .cloned()
        .collect()
}

pub async fn ban_list(ctx: &Context<'_>, owner_id: UserId) -> Vec<UserId> {
    ctx.app.store.ban_list(owner_id).await.into_iter().collect()
}

/// Adds `target_id` to the owner's persistent ban list and applies it live
/// to the channel the owner currently runs in this guild, disconnecting the
/// target if they are inside.  Returns whether the list actually changed.
pub async fn add_ban(
    ctx: &Context<'_>,
    guild_id: GuildId,
    owner_id: UserId,
    target_id: UserId,
) -> Result<bool> {
    let changed = ctx.app.store.add_ban(owner_id, target_id).await?;

    let channel_id = {
        let mut registry = ctx.app.vc.write().await;
        let owned = registry
            .active_owned_by(guild_id, owner_id)
            .map(|vc| vc.channel_id);
        let Some(vc) = owned.and_then(|id| registry.get_active_mut(id)) else {
            return Ok(changed);
        };
        vc.banned_users.insert(target_id);
        let record = vc.clone();
        let channel_id = record.channel_id;
        if let Err(e) = ctx.app.store.put_active(record).await {
            log_internal!("Store write failed for {}: {}", channel_id, e);
        }
        channel_id
    };

    if let Some(mut overwrites) = permissions::cached_overwrites(ctx.cache, guild_id, channel_id) {
        permissions::deny_member_connect(&mut overwrites, target_id);
        channel_id
            .edit(ctx.http, EditChannel::new().permissions(overwrites))
            .await?;
    }

    if lifecycle::occupants(ctx.cache, guild_id, channel_id)
        .humans
        .contains(&target_id)
    {
        guild_id
            .edit_member(ctx.http, target_id, EditMember::new().disconnect_member())
            .await?;
    }

    log_event!("{} banned {} in {}", owner_id, target_id, guild_id);
    Ok(changed)
}

/// Removes `target_id` from the owner's ban list and lifts the deny on the
/// owner's current channel, if any.  Returns whether the list changed.
pub async fn remove_ban(
    ctx: &Context<'_>,
    guild_id: GuildId,
    owner_id: UserId,
    target_id: UserId,
) -> Result<bool> {
    let changed = ctx.app.store.remove_ban(owner_id, target_id).await?;

    let channel_id = {
        let mut registry = ctx.app.vc.write().await;
        let owned = registry
            .active_owned_by(guild_id, owner_id)
            .map(|vc| vc.channel_id);
        let Some(vc) = owned.and_then(|id| registry.get_active_mut(id)) else {
            return Ok(changed);
        };
        vc.banned_users.remove(&target_id);
        let record = vc.clone();
        let channel_id = record.channel_id;
        if let Err(e) = ctx.app.store.put_active(record).await {
            log_internal!("Store write failed for {}: {}", channel_id, e);
        }
        channel_id
    };

    if let Some(mut overwrites) = permissions::cached_overwrites(ctx.cache, guild_id, channel_id) {
        permissions::lift_member_connect(&mut overwrites, target_id);
        channel_id
            .edit(ctx.http, EditChannel::new().permissions(overwrites))
            .await?;
    }
    Ok(changed)
}

/// Locks or unlocks an active channel.  Locking never evicts anyone; key
/// users keep connect through the lock, and unlocking re-applies the owner's
/// bans.
pub async fn set_lock(ctx: &Context<'_>, channel_id: ChannelId, locked: bool) -> Result<()> {
    let (guild_id, key_allowed, banned) = {
        let mut registry = ctx.app.vc.write().await;
        let Some(vc) = registry.get_active_mut(channel_id) else {
            bail!("no active record for channel {}", channel_id);
        };
        vc.is_locked = locked;
        let record = vc.clone();
        if let Err(e) = ctx.app.store.put_active(record.clone()).await {
            log_internal!("Store write failed for {}: {}", channel_id, e);
        }
        (record.guild_id, record.key_allowed_users, record.banned_users)
    };

    let Some(mut overwrites) = permissions::cached_overwrites(ctx.cache, guild_id, channel_id)
    else {
        bail!("channel {} is not in the cache", channel_id);
    };
    if locked {
        permissions::apply_lock(&mut overwrites, guild_id, &key_allowed);
    } else {
        permissions::apply_unlock(&mut overwrites, guild_id, &banned);
    }
    channel_id
        .edit(ctx.http, EditChannel::new().permissions(overwrites))
        .await?;

    log_event!("Channel {} {}", channel_id, if locked { "locked" } else { "unlocked" });
    Ok(())
}

pub async fn transfer_ownership(
    ctx: &Context<'_>,
    channel_id: ChannelId,
    new_owner: UserId,
) -> Result<()> {
    lifecycle::transfer_ownership_to(ctx, channel_id, new_owner).await
}

/// Grants or withdraws a key-user slot: connect through the lock, for this
/// channel's lifetime only.
pub async fn set_key_user(
    ctx: &Context<'_>,
    channel_id: ChannelId,
    user_id: UserId,
    allowed: bool,
) -> Result<()> {
    let (guild_id, is_locked) = {
        let mut registry = ctx.app.vc.write().await;
        let Some(vc) = registry.get_active_mut(channel_id) else {
            bail!("no active record for channel {}", channel_id);
        };
        if allowed {
            vc.key_allowed_users.insert(user_id);
        } else {
            vc.key_allowed_users.remove(&user_id);
        }
        let record = vc.clone();
        if let Err(e) = ctx.app.store.put_active(record.clone()).await {
            log_internal!("Store write failed for {}: {}", channel_id, e);
        }
        (record.guild_id, record.is_locked)
    };

    // On an unlocked channel the grant only matters once a lock lands, and
    // apply_lock re-derives it from the record then.
    if !is_locked {
        return Ok(());
    }

    let Some(mut overwrites) = permissions::cached_overwrites(ctx.cache, guild_id, channel_id)
    else {
        return Ok(());
    };
    if allowed {
        permissions::allow_member_connect(&mut overwrites, user_id);
    } else {
        permissions::retract_member_connect(&mut overwrites, user_id);
    }
    channel_id
        .edit(ctx.http, EditChannel::new().permissions(overwrites))
        .await?;
    Ok(())
}

/// Grants or withdraws a per-user visibility bypass for a hidden channel.
pub async fn set_view_user(
    ctx: &Context<'_>,
    channel_id: ChannelId,
    user_id: UserId,
    allowed: bool,
) -> Result<()> {
    let guild_id = {
        let mut registry = ctx.app.vc.write().await;
        let Some(vc) = registry.get_active_mut(channel_id) else {
            bail!("no active record for channel {}", channel_id);
        };
        if allowed {
            vc.view_allowed_users.insert(user_id);
        } else {
            vc.view_allowed_users.remove(&user_id);
        }
        let record = vc.clone();
        if let Err(e) = ctx.app.store.put_active(record.clone()).await {
            log_internal!("Store write failed for {}: {}", channel_id, e);
        }
        record.guild_id
    };

    let Some(mut overwrites) = permissions::cached_overwrites(ctx.cache, guild_id, channel_id)
    else {
        return Ok(());
    };
    if allowed {
        permissions::allow_member_view(&mut overwrites, user_id);
    } else {
        permissions::retract_member_view(&mut overwrites, user_id);
    }
    channel_id
        .edit(ctx.http, EditChannel::new().permissions(overwrites))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vc::options::{OptionSet, Placement};

    fn sample_system(capacity: CapacityMode) -> VcSystemConfig {
        VcSystemConfig {
            guild_id: GuildId::new(1),
            hub_channel_id: ChannelId::new(2),
            capacity,
            creator_roles: Vec::new(),
            participant_roles: Vec::new(),
            visibility_roles: Vec::new(),
            placement: Placement::UnderHub,
            options: OptionSet::new(),
            locked_name: None,
            control_category_id: None,
            notify: None,
            delete_delay_minutes: None,
        }
    }

    #[test]
    fn fixed_capacity_must_stay_in_range() {
        assert!(validate_system(&sample_system(CapacityMode::Fixed(1))).is_ok());
        assert!(validate_system(&sample_system(CapacityMode::Fixed(25))).is_ok());
        assert!(validate_system(&sample_system(CapacityMode::Unlimited)).is_ok());

        assert_eq!(
            validate_system(&sample_system(CapacityMode::Fixed(0))),
            Err(ConfigError::CapacityOutOfRange),
        );
        assert_eq!(
            validate_system(&sample_system(CapacityMode::Fixed(26))),
            Err(ConfigError::CapacityOutOfRange),
        );
    }

    #[test]
    fn delayed_delete_needs_a_positive_delay() {
        let mut config = sample_system(CapacityMode::Unlimited);
        config.options = [VcOption::DelayedDelete].into_iter().collect();

        assert_eq!(
            validate_system(&config),
            Err(ConfigError::InvalidDeleteDelay),
        );
        config.delete_delay_minutes = Some(0);
        assert_eq!(
            validate_system(&config),
            Err(ConfigError::InvalidDeleteDelay),
        );
        config.delete_delay_minutes = Some(10);
        assert!(validate_system(&config).is_ok());
    }
}
