use hubvc::{config::Config, context::App, guard::GuardTable, handler::Handler, store::Store, vc};
use serenity::{all::GatewayIntents, Client};
use std::sync::Arc;
use tokio::sync::RwLock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load().await?;
    let token = cfg.general.discord_token.clone();
    let store = Store::open_default().await?;

    let app = Arc::new(App {
        cfg: RwLock::new(cfg),
        store,
        vc: RwLock::new(vc::active::VcRegistry::new()),
        timers: vc::timers::DeleteTimers::new(),
        creation_guards: GuardTable::new(),
    });

    // Things we want discord to tell us about.
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_VOICE_STATES;

    Client::builder(&token, intents)
        .event_handler(Handler::new(app))
        .await?
        .start()
        .await
        .map_err(Into::into)
}
