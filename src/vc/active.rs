//! Live ephemeral channel records and the in-memory registry.
//!
//! The registry holds two arenas of records keyed by their platform ids.
//! Everything else (which channel a user owns, which locked-name numbers a
//! category uses) is answered by scanning the arena, so there are no side
//! indices to drift out of sync.  The store remains the durable owner; the
//! registry is rebuilt from it at startup by the reconciler.

use crate::vc::{
    options::{CapacityMode, OptionSet},
    system::VcSystemConfig,
};
use serenity::all::{ChannelId, GuildId, UserId};
use std::{
    collections::{BTreeSet, HashMap},
    time::{SystemTime, UNIX_EPOCH},
};

pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NameLock {
    pub base: String,
    pub number: u32,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ActiveVc {
    pub channel_id: ChannelId,
    pub guild_id: GuildId,
    /// Changes on ownership transfer.
    pub owner_id: UserId,
    /// Copied from the hub config at creation; later config edits do not
    /// retroactively affect this channel.
    pub capacity: CapacityMode,
    pub bot_occupants: u16,
    pub category_id: Option<ChannelId>,
    pub text_channel_id: Option<ChannelId>,
    pub control_channel_id: Option<ChannelId>,
    pub control_category_id: Option<ChannelId>,
    pub options: OptionSet,
    pub is_locked: bool,
    /// The current owner's ban list as applied to this channel.
    pub banned_users: BTreeSet<UserId>,
    /// Lock bypass.  Per-channel, gone when the channel is deleted.
    pub key_allowed_users: BTreeSet<UserId>,
    /// Visibility bypass.  Per-channel, gone when the channel is deleted.
    pub view_allowed_users: BTreeSet<UserId>,
    pub name_lock: Option<NameLock>,
    /// Unix seconds before which emptiness must not delete this channel.
    pub delete_not_before: Option<u64>,
    /// The provisioning move itself fires a join event; skip logging it once.
    #[serde(default)]
    pub suppress_next_join_log: bool,
}

impl ActiveVc {
    /// Whether the emptiness-triggered deletion rules apply yet.
    pub fn deletable_at(&self, now_unix: u64) -> bool {
        self.delete_not_before.map_or(true, |t| now_unix >= t)
    }

    pub fn live_limit(&self) -> u16 {
        self.capacity.live_limit(self.bot_occupants)
    }

    /// Records a bot arrival and returns the new live limit.
    pub fn note_bot_joined(&mut self) -> u16 {
        self.bot_occupants = self.bot_occupants.saturating_add(1);
        self.live_limit()
    }

    /// Records a bot departure and returns the new live limit.  The count
    /// never goes negative, even if events arrive out of order.
    pub fn note_bot_left(&mut self) -> u16 {
        self.bot_occupants = self.bot_occupants.saturating_sub(1);
        self.live_limit()
    }
}

#[derive(Default)]
pub struct VcRegistry {
    systems: HashMap<ChannelId, VcSystemConfig>,
    active: HashMap<ChannelId, ActiveVc>,
}

impl VcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // -- hub configs --------------------------------------------------------

    pub fn insert_system(&mut self, config: VcSystemConfig) {
        self.systems.insert(config.hub_channel_id, config);
    }

    pub fn remove_system(&mut self, hub_channel_id: ChannelId) -> Option<VcSystemConfig> {
        self.systems.remove(&hub_channel_id)
    }

    pub fn system_for_hub(&self, hub_channel_id: ChannelId) -> Option<&VcSystemConfig> {
        self.systems.get(&hub_channel_id)
    }

    // -- active channels ----------------------------------------------------

    pub fn insert_active(&mut self, record: ActiveVc) {
        self.active.insert(record.channel_id, record);
    }

    pub fn get_active(&self, channel_id: ChannelId) -> Option<&ActiveVc> {
        self.active.get(&channel_id)
    }

    pub fn get_active_mut(&mut self, channel_id: ChannelId) -> Option<&mut ActiveVc> {
        self.active.get_mut(&channel_id)
    }

    /// Claims the record for deletion.  Exactly one caller gets `Some`; a
    /// concurrent or repeated delete sees `None` and stops, which is what
    /// makes channel deletion idempotent.
    pub fn remove_active(&mut self, channel_id: ChannelId) -> Option<ActiveVc> {
        self.active.remove(&channel_id)
    }

    pub fn active_in_guild(&self, guild_id: GuildId) -> Vec<&ActiveVc> {
        self.active
            .values()
            .filter(|vc| vc.guild_id == guild_id)
            .collect()
    }

    /// One active channel per user per guild.  A linear scan; guilds hold a
    /// few dozen records at most.
    pub fn active_owned_by(&self, guild_id: GuildId, owner_id: UserId) -> Option<&ActiveVc> {
        self.active
            .values()
            .find(|vc| vc.guild_id == guild_id && vc.owner_id == owner_id)
    }

    /// Locked-name numbers in use for `base` within `category_id`.
    /// Numbering is per category, not global.
    pub fn used_name_numbers(
        &self,
        base: &str,
        category_id: Option<ChannelId>,
    ) -> BTreeSet<u32> {
        self.active
            .values()
            .filter(|vc| vc.category_id == category_id)
            .filter_map(|vc| vc.name_lock.as_ref())
            .filter(|lock| lock.base == base)
            .map(|lock| lock.number)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vc::options::VcOption;

    fn sample_active(channel: u64, guild: u64, owner: u64) -> ActiveVc {
        ActiveVc {
            channel_id: ChannelId::new(channel),
            guild_id: GuildId::new(guild),
            owner_id: UserId::new(owner),
            capacity: CapacityMode::Fixed(4),
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
    fn bot_count_drives_live_limit_and_never_goes_negative() {
        let mut vc = sample_active(1, 1, 1);
        assert_eq!(vc.live_limit(), 4);

        assert_eq!(vc.note_bot_joined(), 5);
        assert_eq!(vc.note_bot_joined(), 6);
        assert_eq!(vc.note_bot_left(), 5);
        assert_eq!(vc.note_bot_left(), 4);
        // Stray extra leave: still clamped at the configured cap.
        assert_eq!(vc.note_bot_left(), 4);
        assert_eq!(vc.bot_occupants, 0);
    }

    #[test]
    fn deletable_at_honors_the_guard_timestamp() {
        let mut vc = sample_active(1, 1, 1);
        assert!(vc.deletable_at(0));

        vc.delete_not_before = Some(1_000);
        assert!(!vc.deletable_at(999));
        assert!(vc.deletable_at(1_000));
        assert!(vc.deletable_at(1_001));
    }

    #[test]
    fn remove_active_claims_exactly_once() {
        let mut registry = VcRegistry::new();
        registry.insert_active(sample_active(5, 1, 1));

        assert!(registry.remove_active(ChannelId::new(5)).is_some());
        assert!(registry.remove_active(ChannelId::new(5)).is_none());
    }

    #[test]
    fn owner_scan_is_per_guild() {
        let mut registry = VcRegistry::new();
        registry.insert_active(sample_active(5, 1, 7));
        registry.insert_active(sample_active(6, 2, 7));

        assert_eq!(
            registry
                .active_owned_by(GuildId::new(1), UserId::new(7))
                .map(|vc| vc.channel_id),
            Some(ChannelId::new(5)),
        );
        assert!(registry
            .active_owned_by(GuildId::new(1), UserId::new(8))
            .is_none());
        assert_eq!(registry.active_in_guild(GuildId::new(2)).len(), 1);
    }

    #[test]
    fn name_numbers_are_scoped_to_base_and_category() {
        let mut registry = VcRegistry::new();

        let mut a = sample_active(1, 1, 1);
        a.category_id = Some(ChannelId::new(100));
        a.name_lock = Some(NameLock { base: "room".into(), number: 1 });
        a.options = [VcOption::LockedName].into_iter().collect();
        registry.insert_active(a);

        let mut b = sample_active(2, 1, 2);
        b.category_id = Some(ChannelId::new(100));
        b.name_lock = Some(NameLock { base: "room".into(), number: 3 });
        registry.insert_active(b);

        // Same base, different category: does not count.
        let mut c = sample_active(3, 1, 3);
        c.category_id = Some(ChannelId::new(200));
        c.name_lock = Some(NameLock { base: "room".into(), number: 2 });
        registry.insert_active(c);

        let used = registry.used_name_numbers("room", Some(ChannelId::new(100)));
        assert_eq!(used.into_iter().collect::<Vec<_>>(), vec![1, 3]);
        assert!(registry.used_name_numbers("other", Some(ChannelId::new(100))).is_empty());
    }
}
