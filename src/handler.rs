use crate::{
    context::{App, Context},
    event::Event,
};
use serenity::all::{GuildChannel, Message, Ready, VoiceState};
use std::sync::Arc;

/// Discord event handler
pub struct Handler {
    app: Arc<App>,
}

impl Handler {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }
}

#[serenity::async_trait]
impl serenity::all::EventHandler for Handler {
    async fn ready(&self, discord_ctx: serenity::all::Context, ready: Ready) {
        Event::Ready(ready)
            .handle(Context::new(&self.app, &discord_ctx))
            .await;
    }

    async fn voice_state_update(
        &self,
        discord_ctx: serenity::all::Context,
        old: Option<VoiceState>,
        new: VoiceState,
    ) {
        Event::VoiceStateUpdate { old, new }
            .handle(Context::new(&self.app, &discord_ctx))
            .await;
    }

    async fn channel_delete(
        &self,
        discord_ctx: serenity::all::Context,
        channel: GuildChannel,
        _messages: Option<Vec<Message>>,
    ) {
        Event::ChannelDelete(channel)
            .handle(Context::new(&self.app, &discord_ctx))
            .await;
    }
}
