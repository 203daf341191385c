use crate::{
    config::Config,
    guard::GuardTable,
    store::Store,
    vc::{active::VcRegistry, timers::DeleteTimers},
};
use serenity::all::UserId;
use std::sync::Arc;
use tokio::sync::RwLock;

/// State shared by every event handler and by detached timer tasks.
pub struct App {
    pub cfg: RwLock<Config>,
    pub store: Store,
    pub vc: RwLock<VcRegistry>,
    pub timers: DeleteTimers,
    pub creation_guards: GuardTable<UserId>,
}

/// Collection of data that is shared across events
pub struct Context<'a> {
    // Hubvc's own context types
    pub app: &'a Arc<App>,
    // Discord/Serenity context types
    pub cache: &'a Arc<serenity::all::Cache>,
    pub http: &'a Arc<serenity::all::Http>,
    pub cache_http: &'a CacheHttp,
}

impl<'a> Context<'a> {
    pub fn new(app: &'a Arc<App>, discord_ctx: &'a CacheHttp) -> Self {
        Self {
            app,
            cache: &discord_ctx.cache,
            http: &discord_ctx.http,
            cache_http: discord_ctx,
        }
    }
}

/// Many Serenity functions take a `impl CacheHttp` in order to first check the cache if the item
/// is available and fall back to an http request otherwise.  The most readily available type that
/// impl's this is named very differently in a way that could be confusing, and so we alias it.
pub type CacheHttp = serenity::all::Context;
