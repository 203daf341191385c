//! Owner-facing surfaces: the control channel and its panel message,
//! creation notifications, and join/leave log embeds.

use crate::{
    context::Context,
    log_internal, retry,
    vc::{active::ActiveVc, options::VcOption, permissions, system::NotifyTarget},
};
use serenity::all::{
    ChannelId, ChannelType, CreateActionRow, CreateButton, CreateChannel, CreateEmbed,
    CreateEmbedAuthor, CreateMessage, GuildId, Member, UserId,
};

const PANEL_COLOR: u32 = 0x5865F2;
const JOIN_COLOR: u32 = 0x57F287;
const LEAVE_COLOR: u32 = 0xED4245;

/// Creates the owner-only control channel next to the voice channel.
/// Category preference: the hub's configured control category, then the
/// voice channel's own category, then guild top level.
pub async fn create_control_channel(
    ctx: &Context<'_>,
    guild_id: GuildId,
    vc_name: &str,
    control_category_id: Option<ChannelId>,
    vc_category_id: Option<ChannelId>,
    owner_id: UserId,
    max_attempts: u32,
) -> Result<ChannelId, serenity::Error> {
    let bot_id = ctx.cache.current_user().id;
    let overwrites = permissions::control_channel_overwrites(guild_id, bot_id, owner_id);

    let mut builder = CreateChannel::new(format!("control-{vc_name}"))
        .kind(ChannelType::Text)
        .permissions(overwrites);
    if let Some(category_id) = control_category_id.or(vc_category_id) {
        builder = builder.category(category_id);
    }

    let channel = retry::with_backoff(max_attempts, retry::is_rate_limited, || {
        let builder = builder.clone();
        async move { guild_id.create_channel(ctx.http, builder).await }
    })
    .await?;
    Ok(channel.id)
}

/// Posts the control panel into a freshly created control channel.  Sections
/// appear only when the matching capability is live for this channel, so the
/// owner never reads instructions for controls their hub disabled.
pub async fn post_control_panel(
    ctx: &Context<'_>,
    record: &ActiveVc,
    control_channel_id: ChannelId,
    owner_id: UserId,
) {
    let mut embed = CreateEmbed::new()
        .title("Your voice channel")
        .description(format!(
            "<@{owner_id}>, this channel controls <#{}>. It is visible to you alone \
             and disappears together with the voice channel.",
            record.channel_id,
        ))
        .color(PANEL_COLOR);

    let state_controls = !record.options.contains(VcOption::NoStateControls);
    if state_controls {
        embed = embed.field(
            "Lock",
            "Lock the channel to stop new joins; current members stay. \
             Key users you allow can still join while locked.",
            false,
        );
        embed = embed.field(
            "Visibility",
            "Allow individual users to see the channel even while it is hidden.",
            false,
        );
    }

    embed = embed.field(
        "Bans",
        "Ban a user to disconnect them and keep them out of this channel. \
         Your ban list follows you into every channel you own.",
        false,
    );

    if state_controls && record.live_limit() == 0 {
        embed = embed.field(
            "Capacity",
            "Set a user limit for this channel, up to 99.",
            false,
        );
    }

    if !record.options.contains(VcOption::LockedName) {
        embed = embed.field("Rename", "Change the channel name at any time.", false);
    }

    if !record.options.contains(VcOption::NoOwnershipTransfer) {
        embed = embed.field(
            "Transfer",
            "Hand the channel to another member. Their ban list replaces yours \
             and this panel is rebuilt for them.",
            false,
        );
    }

    if let Err(e) = control_channel_id
        .send_message(ctx.http, CreateMessage::new().embed(embed))
        .await
    {
        log_internal!("Could not post control panel in {}: {}", control_channel_id, e);
    }
}

/// Announces a fresh channel in the hub's notification target, with a jump
/// link.  A missing target channel is logged and skipped; creation itself
/// already succeeded.
pub async fn send_creation_notification(
    ctx: &Context<'_>,
    notify: &NotifyTarget,
    guild_id: GuildId,
    channel_id: ChannelId,
    member: &Member,
) {
    let embed = CreateEmbed::new()
        .author(CreateEmbedAuthor::new(format!("{} started a VC", member.user.name)))
        .description(format!("<#{channel_id}> is open."))
        .color(JOIN_COLOR);

    let url = format!("https://discord.com/channels/{guild_id}/{channel_id}");
    let row = CreateActionRow::Buttons(vec![CreateButton::new_link(url).label("Join")]);

    let mut message = CreateMessage::new().embed(embed).components(vec![row]);
    if let Some(role_id) = notify.mention_role_id {
        message = message.content(format!("<@&{role_id}>"));
    }

    if let Err(e) = notify.channel_id.send_message(ctx.http, message).await {
        log_internal!(
            "Could not send creation notification to {}: {}",
            notify.channel_id,
            e
        );
    }
}

/// Join/leave log embed, posted into the voice channel's own text surface.
pub async fn log_membership(
    ctx: &Context<'_>,
    channel_id: ChannelId,
    user_id: UserId,
    joined: bool,
) {
    let (text, color) = if joined {
        (format!("<@{user_id}> joined."), JOIN_COLOR)
    } else {
        (format!("<@{user_id}> left."), LEAVE_COLOR)
    };
    let embed = CreateEmbed::new().description(text).color(color);

    if let Err(e) = channel_id
        .send_message(ctx.http, CreateMessage::new().embed(embed))
        .await
    {
        log_internal!("Could not post membership log in {}: {}", channel_id, e);
    }
}
