//! Startup reconciliation: rebuilds the in-memory registry from the store
//! and resolves every record against the live guild cache, so restarts
//! neither leak channels nor resurrect dead bookkeeping.

use crate::{
    context::Context,
    log_event, log_internal,
    vc::{active::ActiveVc, lifecycle},
};
use anyhow::Result;

/// What to do with a persisted record once its channel has (or has not)
/// been resolved against the live cache.
#[derive(Debug, PartialEq, Eq)]
pub enum RecordFate {
    /// Channel is gone; drop the record and any surviving companions.
    Orphan,
    /// Channel lives and carries a deferred-deletion guard; re-arm its
    /// timer (which fires immediately if the guard already elapsed).
    KeepAndArm,
    /// Channel lives with no guard; run the normal emptiness check, since
    /// it may have emptied while we were down.
    KeepAndCheck,
}

pub fn record_fate(record: &ActiveVc, channel_exists: bool) -> RecordFate {
    if !channel_exists {
        RecordFate::Orphan
    } else if record.delete_not_before.is_some() {
        RecordFate::KeepAndArm
    } else {
        RecordFate::KeepAndCheck
    }
}

pub async fn run(ctx: &Context<'_>) -> Result<()> {
    let mut hubs = 0usize;
    for config in ctx.app.store.list_systems().await {
        if !lifecycle::channel_exists(ctx.cache, config.guild_id, config.hub_channel_id) {
            log_internal!(
                "Hub {} no longer exists, dropping its provisioning rule",
                config.hub_channel_id,
            );
            if let Err(e) = ctx.app.store.delete_system(config.hub_channel_id).await {
                log_internal!("Store delete failed for hub {}: {}", config.hub_channel_id, e);
            }
            continue;
        }
        ctx.app.vc.write().await.insert_system(config);
        hubs += 1;
    }

    let mut active = 0usize;
    let mut orphans = 0usize;
    for record in ctx.app.store.list_active().await {
        let channel_id = record.channel_id;
        let guild_id = record.guild_id;
        let exists = lifecycle::channel_exists(ctx.cache, guild_id, channel_id);

        match record_fate(&record, exists) {
            RecordFate::Orphan => {
                // The channel died while we were down; its companions may
                // not have.
                for companion in [record.text_channel_id, record.control_channel_id]
                    .into_iter()
                    .flatten()
                {
                    if let Err(e) = companion.delete(ctx.http).await {
                        log_internal!("Companion channel {} already gone: {}", companion, e);
                    }
                }
                if let Err(e) = ctx.app.store.delete_active(channel_id).await {
                    log_internal!("Store delete failed for {}: {}", channel_id, e);
                }
                orphans += 1;
            }
            RecordFate::KeepAndArm => {
                ctx.app.vc.write().await.insert_active(record);
                active += 1;
                ctx.app
                    .timers
                    .arm(ctx.app.clone(), ctx.cache_http.clone(), channel_id);
            }
            RecordFate::KeepAndCheck => {
                ctx.app.vc.write().await.insert_active(record);
                active += 1;
                lifecycle::maybe_delete_if_empty(ctx, guild_id, channel_id).await?;
            }
        }
    }

    log_event!(
        "Reconciled {} hub rule(s), {} active channel(s), {} orphaned record(s)",
        hubs,
        active,
        orphans,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vc::options::{CapacityMode, OptionSet};
    use serenity::all::{ChannelId, GuildId, UserId};
    use std::collections::BTreeSet;

    fn sample_record() -> ActiveVc {
        ActiveVc {
            channel_id: ChannelId::new(5),
            guild_id: GuildId::new(1),
            owner_id: UserId::new(7),
            capacity: CapacityMode::Unlimited,
            bot_occupants: 0,
            category_id: None,
            text_channel_id: None,
            control_channel_id: None,
            control_category_id: None,
            options: OptionSet::new(),
            is_locked: false,
            banned_users: BTreeSet::new(),
            key_allowed_users: BTreeSet::new(),
            view_allowed_users: BTreeSet::new(),
            name_lock: None,
            delete_not_before: None,
            suppress_next_join_log: false,
        }
    }

    #[test]
    fn unresolvable_records_are_orphans_regardless_of_guard() {
        let mut record = sample_record();
        assert_eq!(record_fate(&record, false), RecordFate::Orphan);

        record.delete_not_before = Some(1_000);
        assert_eq!(record_fate(&record, false), RecordFate::Orphan);
    }

    #[test]
    fn resolvable_records_rearm_only_with_a_pending_guard() {
        let mut record = sample_record();
        assert_eq!(record_fate(&record, true), RecordFate::KeepAndCheck);

        record.delete_not_before = Some(1_000);
        assert_eq!(record_fate(&record, true), RecordFate::KeepAndArm);
    }
}
