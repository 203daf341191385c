//! Durable storage for hub configs, active channel records, and owner ban
//! lists.
//!
//! Each record family lives in its own JSON file and is rewritten whole on
//! every mutation, via a temporary file and an atomic rename.  A single async
//! mutex serializes writers; write rates are a few per second at most.  A
//! failed write surfaces to the caller as an error but the in-memory copy is
//! kept, so the process keeps running on best-effort durability.

use crate::vc::{active::ActiveVc, system::VcSystemConfig};
use anyhow::{anyhow, Result};
use serenity::all::{ChannelId, UserId};
use std::{
    collections::{BTreeSet, HashMap},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::sync::Mutex;

const STORE_DIR_REL_HOME: &str = ".config/hubvc";
const SYSTEMS_FILE: &str = "vc_systems.json";
const ACTIVE_FILE: &str = "active_vcs.json";
const BANS_FILE: &str = "vc_bans.json";

pub struct Store {
    dir: PathBuf,
    inner: Mutex<StoreData>,
}

#[derive(Default)]
struct StoreData {
    systems: HashMap<ChannelId, VcSystemConfig>,
    active: HashMap<ChannelId, ActiveVc>,
    bans: HashMap<UserId, BTreeSet<UserId>>,
}

impl Store {
    pub async fn open_default() -> Result<Self> {
        let dir = dirs::home_dir()
            .map(|p| p.join(STORE_DIR_REL_HOME))
            .ok_or(anyhow!("Could not find home directory"))?;
        Self::open(dir).await
    }

    pub async fn open(dir: PathBuf) -> Result<Self> {
        let data = StoreData {
            systems: load_family(&dir.join(SYSTEMS_FILE)).await?,
            active: load_family(&dir.join(ACTIVE_FILE)).await?,
            bans: load_family(&dir.join(BANS_FILE)).await?,
        };

        Ok(Self {
            dir,
            inner: Mutex::new(data),
        })
    }

    // -- VcSystemConfig family ----------------------------------------------

    pub async fn put_system(&self, config: VcSystemConfig) -> Result<()> {
        let mut data = self.inner.lock().await;
        data.systems.insert(config.hub_channel_id, config);
        save_family(&self.dir, SYSTEMS_FILE, &data.systems).await
    }

    pub async fn delete_system(&self, hub_channel_id: ChannelId) -> Result<()> {
        let mut data = self.inner.lock().await;
        if data.systems.remove(&hub_channel_id).is_none() {
            return Ok(());
        }
        save_family(&self.dir, SYSTEMS_FILE, &data.systems).await
    }

    pub async fn list_systems(&self) -> Vec<VcSystemConfig> {
        self.inner.lock().await.systems.values().cloned().collect()
    }

    // -- ActiveVc family ----------------------------------------------------

    pub async fn put_active(&self, record: ActiveVc) -> Result<()> {
        let mut data = self.inner.lock().await;
        data.active.insert(record.channel_id, record);
        save_family(&self.dir, ACTIVE_FILE, &data.active).await
    }

    pub async fn get_active(&self, channel_id: ChannelId) -> Option<ActiveVc> {
        self.inner.lock().await.active.get(&channel_id).cloned()
    }

    pub async fn delete_active(&self, channel_id: ChannelId) -> Result<()> {
        let mut data = self.inner.lock().await;
        if data.active.remove(&channel_id).is_none() {
            return Ok(());
        }
        save_family(&self.dir, ACTIVE_FILE, &data.active).await
    }

    pub async fn list_active(&self) -> Vec<ActiveVc> {
        self.inner.lock().await.active.values().cloned().collect()
    }

    // -- Owner ban lists ----------------------------------------------------
    //
    // Ban lists are keyed by the owning user, not by channel, so they carry
    // across every channel that owner creates.

    pub async fn ban_list(&self, owner_id: UserId) -> BTreeSet<UserId> {
        self.inner
            .lock()
            .await
            .bans
            .get(&owner_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns whether the list changed.
    pub async fn add_ban(&self, owner_id: UserId, target_id: UserId) -> Result<bool> {
        let mut data = self.inner.lock().await;
        if !data.bans.entry(owner_id).or_default().insert(target_id) {
            return Ok(false);
        }
        save_family(&self.dir, BANS_FILE, &data.bans).await?;
        Ok(true)
    }

    /// Returns whether the list changed.
    pub async fn remove_ban(&self, owner_id: UserId, target_id: UserId) -> Result<bool> {
        let mut data = self.inner.lock().await;
        let Some(list) = data.bans.get_mut(&owner_id) else {
            return Ok(false);
        };
        if !list.remove(&target_id) {
            return Ok(false);
        }
        save_family(&self.dir, BANS_FILE, &data.bans).await?;
        Ok(true)
    }
}

async fn load_family<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            anyhow!(
                "Could not parse store file `{}`: {}",
                path.to_string_lossy(),
                e
            )
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(anyhow!(
            "Could not read store file `{}`: {}",
            path.to_string_lossy(),
            e
        )),
    }
}

async fn save_family<T: serde::Serialize>(dir: &Path, file: &str, value: &T) -> Result<()> {
    let serialized =
        serde_json::to_string(value).map_err(|e| anyhow!("Could not serialize `{}`: {}", file, e))?;

    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        anyhow!(
            "Could not create directory `{}`: {}",
            dir.to_string_lossy(),
            e
        )
    })?;

    let path = dir.join(file);

    // Create a temporary file in the same directory.
    let tmp_path = path.with_extension("json.new");

    tokio::fs::write(&tmp_path, serialized).await.map_err(|e| {
        anyhow!(
            "Could not write store to temporary file `{}`: {}",
            tmp_path.to_string_lossy(),
            e
        )
    })?;

    // Atomically rename the temporary file over the target file.
    tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
        anyhow!(
            "Could not rename temporary file `{}` to `{}`: {}",
            tmp_path.to_string_lossy(),
            path.to_string_lossy(),
            e
        )
    })?;

    Ok(())
}
