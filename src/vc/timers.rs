//! Deferred-deletion timers, one cancellable task per channel.
//!
//! Arming a channel always cancels its previous timer first, so a channel
//! never has two pending fires.  A firing worker removes its own handle
//! before it starts deleting; the deletion path's cancel then finds nothing
//! and cannot abort the worker mid-delete.

use crate::{
    context::{App, CacheHttp, Context},
    log_internal,
    vc::{active::now_unix, lifecycle},
};
use serenity::all::ChannelId;
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};
use tokio::task::JoinHandle;

#[derive(Default)]
pub struct DeleteTimers {
    tasks: StdMutex<HashMap<ChannelId, JoinHandle<()>>>,
}

impl DeleteTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the deferred-deletion worker for `channel_id`, replacing any
    /// previous timer.
    pub fn arm(&self, app: Arc<App>, discord_ctx: CacheHttp, channel_id: ChannelId) {
        self.arm_with(channel_id, delayed_delete_worker(app, discord_ctx, channel_id));
    }

    pub fn arm_with<F>(&self, channel_id: ChannelId, worker: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(worker);
        if let Some(prior) = self.tasks.lock().unwrap().insert(channel_id, handle) {
            prior.abort();
        }
    }

    /// Cancels a pending timer, e.g. because the channel was deleted by
    /// other means.
    pub fn cancel(&self, channel_id: ChannelId) {
        if let Some(handle) = self.tasks.lock().unwrap().remove(&channel_id) {
            handle.abort();
        }
    }

    /// Removes the handle without aborting; used by a worker claiming its
    /// own slot right before it runs the deletion.
    fn disarm(&self, channel_id: ChannelId) {
        self.tasks.lock().unwrap().remove(&channel_id);
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

async fn delayed_delete_worker(app: Arc<App>, discord_ctx: CacheHttp, channel_id: ChannelId) {
    let (guild_id, not_before) = {
        let registry = app.vc.read().await;
        let Some(record) = registry.get_active(channel_id) else {
            return;
        };
        let Some(not_before) = record.delete_not_before else {
            return;
        };
        (record.guild_id, not_before)
    };

    let now = now_unix();
    if not_before > now {
        tokio::time::sleep(Duration::from_secs(not_before - now)).await;
    }

    // Claim our own slot first; see module docs.
    app.timers.disarm(channel_id);

    let ctx = Context::new(&app, &discord_ctx);

    // The guard has expired.  If humans are present the normal
    // leave-triggered emptiness check governs from here on.
    if lifecycle::occupants(ctx.cache, guild_id, channel_id).has_humans() {
        return;
    }

    if let Err(e) = lifecycle::delete_active_vc(&ctx, channel_id).await {
        log_internal!("Deferred deletion of {} failed: {}", channel_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn rearming_cancels_the_prior_timer() {
        let timers = DeleteTimers::new();
        let fired = Arc::new(AtomicU32::new(0));
        let id = ChannelId::new(1);

        for _ in 0..2 {
            let fired = Arc::clone(&fired);
            timers.arm_with(id, async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;

        // Only the replacement fired; the aborted original did not.
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_the_fire() {
        let timers = DeleteTimers::new();
        let fired = Arc::new(AtomicU32::new(0));
        let id = ChannelId::new(2);

        let fired2 = Arc::clone(&fired);
        timers.arm_with(id, async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        timers.cancel(id);
        tokio::time::sleep(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timers.pending(), 0);
    }
}
