//! Typed configuration vocabulary for hub provisioning rules.
//!
//! The option set is a set of enum flags rather than strings, so adding an
//! option is a compile-time change at every call site that cares.

use serenity::all::ChannelId;
use std::collections::BTreeSet;

/// Discord refuses user limits above this.
pub const PLATFORM_USER_LIMIT_MAX: u16 = 99;

/// Largest cap the setup wizard offers for fixed-capacity hubs.
pub const FIXED_CAPACITY_MAX: u16 = 25;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum VcOption {
    /// Create a participants-only text channel alongside the VC.
    CompanionText,
    /// Skip the creator-only control channel and panel.
    NoControlPanel,
    /// Hide the channel from everyone while it is at capacity.
    HideWhenFull,
    /// The channel name is fixed to a template and numbered per category.
    LockedName,
    /// Omit lock/visibility/capacity controls from the panel.
    NoStateControls,
    /// Suppress join/leave log embeds.
    NoJoinLeaveLog,
    /// Keep ownership on the creator even after they leave.
    NoOwnershipTransfer,
    /// Protect the channel from emptiness-deletion for a configured delay.
    DelayedDelete,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct OptionSet(BTreeSet<VcOption>);

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, option: VcOption) -> bool {
        self.0.contains(&option)
    }
}

impl FromIterator<VcOption> for OptionSet {
    fn from_iter<I: IntoIterator<Item = VcOption>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CapacityMode {
    Unlimited,
    /// Human-configured cap, 1..=25.  The live platform limit additionally
    /// absorbs bot occupants, see [`CapacityMode::live_limit`].
    Fixed(u16),
}

impl CapacityMode {
    /// The cap as configured, before any bot adjustment.  Zero means
    /// unlimited on the platform.
    pub fn base_limit(&self) -> u16 {
        match self {
            CapacityMode::Unlimited => 0,
            CapacityMode::Fixed(n) => *n,
        }
    }

    /// Platform user limit once `bot_occupants` bots sit in the channel:
    /// the configured cap plus one slot per bot, clamped to the platform
    /// ceiling.  Unlimited channels stay unlimited.
    pub fn live_limit(&self, bot_occupants: u16) -> u16 {
        match self {
            CapacityMode::Unlimited => 0,
            CapacityMode::Fixed(n) => n
                .saturating_add(bot_occupants)
                .min(PLATFORM_USER_LIMIT_MAX),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Placement {
    /// A category the setup flow created for this hub.
    AutoCategory { category_id: ChannelId },
    /// An admin-chosen existing category.
    FixedCategory { category_id: ChannelId },
    /// Directly below the hub, in the hub's own category if it has one.
    UnderHub,
}

impl Placement {
    pub fn category_id(&self) -> Option<ChannelId> {
        match self {
            Placement::AutoCategory { category_id } | Placement::FixedCategory { category_id } => {
                Some(*category_id)
            }
            Placement::UnderHub => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_limit_tracks_bot_occupants() {
        let capacity = CapacityMode::Fixed(4);
        assert_eq!(capacity.live_limit(0), 4);
        assert_eq!(capacity.live_limit(1), 5);
        assert_eq!(capacity.live_limit(3), 7);
    }

    #[test]
    fn live_limit_clamps_to_platform_ceiling() {
        assert_eq!(CapacityMode::Fixed(25).live_limit(80), 99);
        assert_eq!(CapacityMode::Fixed(25).live_limit(u16::MAX), 99);
    }

    #[test]
    fn unlimited_ignores_bots() {
        assert_eq!(CapacityMode::Unlimited.live_limit(0), 0);
        assert_eq!(CapacityMode::Unlimited.live_limit(12), 0);
    }

    #[test]
    fn option_set_round_trips_through_json() {
        let options: OptionSet =
            [VcOption::CompanionText, VcOption::HideWhenFull].into_iter().collect();
        let json = serde_json::to_string(&options).unwrap();
        let back: OptionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(options, back);
        assert!(back.contains(VcOption::HideWhenFull));
        assert!(!back.contains(VcOption::LockedName));
    }
}
