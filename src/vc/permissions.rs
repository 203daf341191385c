//! Permission overwrite computation, kept pure so the branching is testable
//! without a live guild.
//!
//! Discord models channel permissions as per-role/per-member overwrites of
//! allow and deny bit sets; the @everyone role shares the guild's id.  All
//! functions here edit overwrite vectors; callers apply them with a single
//! channel edit.

use serenity::all::{
    ChannelId, GuildId, PermissionOverwrite, PermissionOverwriteType, Permissions, RoleId, UserId,
};
use std::collections::BTreeSet;

fn everyone_role(guild_id: GuildId) -> RoleId {
    RoleId::new(guild_id.get())
}

fn entry_mut<'a>(
    overwrites: &'a mut Vec<PermissionOverwrite>,
    kind: PermissionOverwriteType,
) -> &'a mut PermissionOverwrite {
    let i = match overwrites.iter().position(|ow| ow.kind == kind) {
        Some(i) => i,
        None => {
            overwrites.push(PermissionOverwrite {
                allow: Permissions::empty(),
                deny: Permissions::empty(),
                kind,
            });
            overwrites.len() - 1
        }
    };
    &mut overwrites[i]
}

fn grant(ow: &mut PermissionOverwrite, perms: Permissions) {
    ow.allow.insert(perms);
    ow.deny.remove(perms);
}

fn revoke(ow: &mut PermissionOverwrite, perms: Permissions) {
    ow.deny.insert(perms);
    ow.allow.remove(perms);
}

/// Overwrite set for a freshly provisioned voice channel (§ permission
/// computation):
///
/// - default: everyone may view and connect; the bot may additionally
///   manage the channel
/// - a visibility filter flips everyone to hidden and grants view+connect
///   to the filter roles
/// - a participant filter restricts connect to its roles; on its own it
///   leaves the channel visible to everyone, combined with a visibility
///   filter it grants its roles view+connect on top
/// - the creator's previously-banned users are denied connect
pub fn creation_overwrites(
    guild_id: GuildId,
    bot_id: UserId,
    visibility_roles: &[RoleId],
    participant_roles: &[RoleId],
    banned_users: &BTreeSet<UserId>,
) -> Vec<PermissionOverwrite> {
    let mut overwrites = Vec::new();
    let everyone = PermissionOverwriteType::Role(everyone_role(guild_id));

    grant(
        entry_mut(&mut overwrites, everyone),
        Permissions::VIEW_CHANNEL | Permissions::CONNECT,
    );
    grant(
        entry_mut(&mut overwrites, PermissionOverwriteType::Member(bot_id)),
        Permissions::VIEW_CHANNEL | Permissions::CONNECT | Permissions::MANAGE_CHANNELS,
    );

    if !visibility_roles.is_empty() {
        revoke(
            entry_mut(&mut overwrites, everyone),
            Permissions::VIEW_CHANNEL | Permissions::CONNECT,
        );
        for role_id in visibility_roles {
            grant(
                entry_mut(&mut overwrites, PermissionOverwriteType::Role(*role_id)),
                Permissions::VIEW_CHANNEL | Permissions::CONNECT,
            );
        }
    }

    if !participant_roles.is_empty() {
        if visibility_roles.is_empty() {
            let ow = entry_mut(&mut overwrites, everyone);
            grant(ow, Permissions::VIEW_CHANNEL);
            revoke(ow, Permissions::CONNECT);
        }
        for role_id in participant_roles {
            grant(
                entry_mut(&mut overwrites, PermissionOverwriteType::Role(*role_id)),
                Permissions::VIEW_CHANNEL | Permissions::CONNECT,
            );
        }
    }

    for user_id in banned_users {
        revoke(
            entry_mut(&mut overwrites, PermissionOverwriteType::Member(*user_id)),
            Permissions::CONNECT,
        );
    }

    overwrites
}

/// Companion text channel: hidden from everyone, writable by the bot and the
/// listed (human) voice members.
pub fn text_channel_overwrites(
    guild_id: GuildId,
    bot_id: UserId,
    members: &[UserId],
) -> Vec<PermissionOverwrite> {
    let mut overwrites = Vec::new();

    revoke(
        entry_mut(
            &mut overwrites,
            PermissionOverwriteType::Role(everyone_role(guild_id)),
        ),
        Permissions::VIEW_CHANNEL,
    );
    grant(
        entry_mut(&mut overwrites, PermissionOverwriteType::Member(bot_id)),
        Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES,
    );
    for user_id in members {
        grant(
            entry_mut(&mut overwrites, PermissionOverwriteType::Member(*user_id)),
            Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES,
        );
    }

    overwrites
}

/// Control channel: visible to the bot and the owner only.
pub fn control_channel_overwrites(
    guild_id: GuildId,
    bot_id: UserId,
    owner_id: UserId,
) -> Vec<PermissionOverwrite> {
    text_channel_overwrites(guild_id, bot_id, &[owner_id])
}

/// Lock: everyone loses connect (view untouched); the key allow-list keeps
/// connect.
pub fn apply_lock(
    overwrites: &mut Vec<PermissionOverwrite>,
    guild_id: GuildId,
    key_allowed: &BTreeSet<UserId>,
) {
    revoke(
        entry_mut(
            overwrites,
            PermissionOverwriteType::Role(everyone_role(guild_id)),
        ),
        Permissions::CONNECT,
    );
    for user_id in key_allowed {
        grant(
            entry_mut(overwrites, PermissionOverwriteType::Member(*user_id)),
            Permissions::CONNECT,
        );
    }
}

/// Unlock: everyone regains connect, except users the owner has banned.
pub fn apply_unlock(
    overwrites: &mut Vec<PermissionOverwrite>,
    guild_id: GuildId,
    banned_users: &BTreeSet<UserId>,
) {
    grant(
        entry_mut(
            overwrites,
            PermissionOverwriteType::Role(everyone_role(guild_id)),
        ),
        Permissions::CONNECT,
    );
    for user_id in banned_users {
        revoke(
            entry_mut(overwrites, PermissionOverwriteType::Member(*user_id)),
            Permissions::CONNECT,
        );
    }
}

/// Full/not-full visibility toggle: flips everyone's view bit, leaving
/// connect bits as they stand.
pub fn set_everyone_visible(
    overwrites: &mut Vec<PermissionOverwrite>,
    guild_id: GuildId,
    visible: bool,
) {
    let ow = entry_mut(
        overwrites,
        PermissionOverwriteType::Role(everyone_role(guild_id)),
    );
    if visible {
        grant(ow, Permissions::VIEW_CHANNEL);
    } else {
        revoke(ow, Permissions::VIEW_CHANNEL);
    }
}

/// Grants one member access to a companion text channel.
pub fn grant_member_text(overwrites: &mut Vec<PermissionOverwrite>, user_id: UserId) {
    grant(
        entry_mut(overwrites, PermissionOverwriteType::Member(user_id)),
        Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES,
    );
}

/// Denies connect for one member, e.g. a freshly banned user.
pub fn deny_member_connect(overwrites: &mut Vec<PermissionOverwrite>, user_id: UserId) {
    revoke(
        entry_mut(overwrites, PermissionOverwriteType::Member(user_id)),
        Permissions::CONNECT,
    );
}

/// Grants view (and connect, unless explicitly denied) for one member, e.g.
/// a visibility-bypass user.
pub fn allow_member_view(overwrites: &mut Vec<PermissionOverwrite>, user_id: UserId) {
    grant(
        entry_mut(overwrites, PermissionOverwriteType::Member(user_id)),
        Permissions::VIEW_CHANNEL,
    );
}

/// Grants connect for one member, e.g. a key user on a locked channel.
pub fn allow_member_connect(overwrites: &mut Vec<PermissionOverwrite>, user_id: UserId) {
    grant(
        entry_mut(overwrites, PermissionOverwriteType::Member(user_id)),
        Permissions::CONNECT,
    );
}

/// Withdraws a member's connect grant, letting the role-level rules apply
/// again.  Does not add a deny.
pub fn retract_member_connect(overwrites: &mut Vec<PermissionOverwrite>, user_id: UserId) {
    if let Some(ow) = overwrites
        .iter_mut()
        .find(|ow| ow.kind == PermissionOverwriteType::Member(user_id))
    {
        ow.allow.remove(Permissions::CONNECT);
    }
    prune_empty(overwrites);
}

/// Clears a member's connect deny, e.g. after an unban.  Other bits of the
/// entry (view grants, key grants) survive.
pub fn lift_member_connect(overwrites: &mut Vec<PermissionOverwrite>, user_id: UserId) {
    if let Some(ow) = overwrites
        .iter_mut()
        .find(|ow| ow.kind == PermissionOverwriteType::Member(user_id))
    {
        ow.deny.remove(Permissions::CONNECT);
    }
    prune_empty(overwrites);
}

/// Withdraws a member's view grant.
pub fn retract_member_view(overwrites: &mut Vec<PermissionOverwrite>, user_id: UserId) {
    if let Some(ow) = overwrites
        .iter_mut()
        .find(|ow| ow.kind == PermissionOverwriteType::Member(user_id))
    {
        ow.allow.remove(Permissions::VIEW_CHANNEL);
    }
    prune_empty(overwrites);
}

fn prune_empty(overwrites: &mut Vec<PermissionOverwrite>) {
    overwrites.retain(|ow| !(ow.allow.is_empty() && ow.deny.is_empty()));
}

/// Drops a member-scoped overwrite entirely.
pub fn clear_member(overwrites: &mut Vec<PermissionOverwrite>, user_id: UserId) {
    overwrites.retain(|ow| ow.kind != PermissionOverwriteType::Member(user_id));
}

/// Live overwrites of a cached channel, as an owned vector.
pub fn cached_overwrites(
    cache: &serenity::all::Cache,
    guild_id: GuildId,
    channel_id: ChannelId,
) -> Option<Vec<PermissionOverwrite>> {
    let guild = cache.guild(guild_id)?;
    let channel = guild.channels.get(&channel_id)?;
    Some(channel.permission_overwrites.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: GuildId = GuildId::new(10);
    const BOT: UserId = UserId::new(99);

    fn find(
        overwrites: &[PermissionOverwrite],
        kind: PermissionOverwriteType,
    ) -> &PermissionOverwrite {
        overwrites.iter().find(|ow| ow.kind == kind).unwrap()
    }

    fn everyone(overwrites: &[PermissionOverwrite]) -> &PermissionOverwrite {
        find(
            overwrites,
            PermissionOverwriteType::Role(RoleId::new(GUILD.get())),
        )
    }

    #[test]
    fn default_channel_is_open_and_bot_managed() {
        let ow = creation_overwrites(GUILD, BOT, &[], &[], &BTreeSet::new());

        let ev = everyone(&ow);
        assert!(ev.allow.contains(Permissions::VIEW_CHANNEL | Permissions::CONNECT));
        assert!(ev.deny.is_empty());

        let bot = find(&ow, PermissionOverwriteType::Member(BOT));
        assert!(bot.allow.contains(Permissions::MANAGE_CHANNELS));
    }

    #[test]
    fn visibility_filter_hides_from_everyone_but_keeps_the_bot() {
        let vis = [RoleId::new(1), RoleId::new(2)];
        let ow = creation_overwrites(GUILD, BOT, &vis, &[], &BTreeSet::new());

        let ev = everyone(&ow);
        assert!(ev.deny.contains(Permissions::VIEW_CHANNEL | Permissions::CONNECT));

        for role in vis {
            let r = find(&ow, PermissionOverwriteType::Role(role));
            assert!(r.allow.contains(Permissions::VIEW_CHANNEL | Permissions::CONNECT));
        }

        let bot = find(&ow, PermissionOverwriteType::Member(BOT));
        assert!(bot.allow.contains(Permissions::VIEW_CHANNEL | Permissions::CONNECT));
    }

    #[test]
    fn participant_filter_alone_keeps_the_channel_visible() {
        let part = [RoleId::new(3)];
        let ow = creation_overwrites(GUILD, BOT, &[], &part, &BTreeSet::new());

        let ev = everyone(&ow);
        assert!(ev.allow.contains(Permissions::VIEW_CHANNEL));
        assert!(ev.deny.contains(Permissions::CONNECT));

        let r = find(&ow, PermissionOverwriteType::Role(RoleId::new(3)));
        assert!(r.allow.contains(Permissions::VIEW_CHANNEL | Permissions::CONNECT));
    }

    #[test]
    fn participant_filter_stacks_on_visibility_filter() {
        let vis = [RoleId::new(1)];
        let part = [RoleId::new(3)];
        let ow = creation_overwrites(GUILD, BOT, &vis, &part, &BTreeSet::new());

        // The visibility step's everyone-deny survives the participant step.
        let ev = everyone(&ow);
        assert!(ev.deny.contains(Permissions::VIEW_CHANNEL | Permissions::CONNECT));

        let r = find(&ow, PermissionOverwriteType::Role(RoleId::new(3)));
        assert!(r.allow.contains(Permissions::VIEW_CHANNEL | Permissions::CONNECT));
    }

    #[test]
    fn banned_users_are_denied_connect() {
        let banned: BTreeSet<UserId> = [UserId::new(7)].into_iter().collect();
        let ow = creation_overwrites(GUILD, BOT, &[], &[], &banned);

        let b = find(&ow, PermissionOverwriteType::Member(UserId::new(7)));
        assert!(b.deny.contains(Permissions::CONNECT));
        assert!(!b.deny.contains(Permissions::VIEW_CHANNEL));
    }

    #[test]
    fn lock_and_unlock_preserve_view_bits() {
        let mut ow = creation_overwrites(GUILD, BOT, &[RoleId::new(1)], &[], &BTreeSet::new());
        let key: BTreeSet<UserId> = [UserId::new(5)].into_iter().collect();

        apply_lock(&mut ow, GUILD, &key);
        let ev = everyone(&ow);
        assert!(ev.deny.contains(Permissions::CONNECT));
        // Hidden channel stays hidden through a lock.
        assert!(ev.deny.contains(Permissions::VIEW_CHANNEL));
        let k = find(&ow, PermissionOverwriteType::Member(UserId::new(5)));
        assert!(k.allow.contains(Permissions::CONNECT));

        let banned: BTreeSet<UserId> = [UserId::new(7)].into_iter().collect();
        apply_unlock(&mut ow, GUILD, &banned);
        let ev = everyone(&ow);
        assert!(ev.allow.contains(Permissions::CONNECT));
        assert!(ev.deny.contains(Permissions::VIEW_CHANNEL));
        let b = find(&ow, PermissionOverwriteType::Member(UserId::new(7)));
        assert!(b.deny.contains(Permissions::CONNECT));
    }

    #[test]
    fn visibility_toggle_leaves_connect_untouched() {
        let mut ow = creation_overwrites(GUILD, BOT, &[], &[RoleId::new(3)], &BTreeSet::new());

        set_everyone_visible(&mut ow, GUILD, false);
        let ev = everyone(&ow);
        assert!(ev.deny.contains(Permissions::VIEW_CHANNEL));
        assert!(ev.deny.contains(Permissions::CONNECT));

        set_everyone_visible(&mut ow, GUILD, true);
        let ev = everyone(&ow);
        assert!(ev.allow.contains(Permissions::VIEW_CHANNEL));
        assert!(ev.deny.contains(Permissions::CONNECT));
    }

    #[test]
    fn text_channel_grants_only_listed_members() {
        let ow = text_channel_overwrites(GUILD, BOT, &[UserId::new(1), UserId::new(2)]);

        assert!(everyone(&ow).deny.contains(Permissions::VIEW_CHANNEL));
        for user in [UserId::new(1), UserId::new(2)] {
            let m = find(&ow, PermissionOverwriteType::Member(user));
            assert!(m.allow.contains(Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES));
        }

        let mut ow = ow;
        clear_member(&mut ow, UserId::new(1));
        assert!(ow
            .iter()
            .all(|o| o.kind != PermissionOverwriteType::Member(UserId::new(1))));
    }
}
