//! A hub's provisioning rule.  Built once by the setup wizard, replaced
//! wholesale on change, deleted when the hub channel disappears.

use crate::vc::options::{CapacityMode, OptionSet, Placement};
use serenity::all::{ChannelId, GuildId, RoleId};

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct VcSystemConfig {
    pub guild_id: GuildId,
    /// Globally unique across the store; one rule per hub.
    pub hub_channel_id: ChannelId,
    pub capacity: CapacityMode,
    /// Who may trigger provisioning.  Enforced through the hub channel's own
    /// connect overwrites, which the wizard sets up; empty means everyone.
    pub creator_roles: Vec<RoleId>,
    /// Roles allowed to connect to created channels.  Empty means everyone.
    pub participant_roles: Vec<RoleId>,
    /// Roles allowed to see created channels.  Empty means everyone.
    pub visibility_roles: Vec<RoleId>,
    pub placement: Placement,
    pub options: OptionSet,
    /// Base name for locked-name channels.  Empty string means "use the
    /// creator's name", same as the unlocked default.
    pub locked_name: Option<String>,
    /// Category for creator-only control channels.
    pub control_category_id: Option<ChannelId>,
    pub notify: Option<NotifyTarget>,
    /// Minutes a fresh channel is protected from emptiness-deletion.
    pub delete_delay_minutes: Option<u32>,
}

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct NotifyTarget {
    pub channel_id: ChannelId,
    pub mention_role_id: Option<RoleId>,
}
