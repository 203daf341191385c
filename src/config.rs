use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

const CONFIG_PATH_REL_HOME: &str = ".config/hubvc/config.toml";

/// Bot configuration
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Config {
    pub general: General,
    #[serde(default)]
    pub vc: Vc,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct General {
    pub discord_token: String,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct Vc {
    /// Seconds an idle per-user creation guard stays in the table before
    /// eviction.
    pub creation_guard_ttl_seconds: u64,
    /// Delay before re-checking the source channel of a move for emptiness,
    /// so the paired leave/join events settle first.
    pub move_recheck_delay_ms: u64,
    /// Maximum attempts for a platform call that keeps hitting rate limits.
    pub rate_limit_max_attempts: u32,
}

impl Default for Vc {
    fn default() -> Self {
        Self {
            creation_guard_ttl_seconds: 60,
            move_recheck_delay_ms: 100,
            rate_limit_max_attempts: 5,
        }
    }
}

impl Config {
    fn config_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|p| p.join(CONFIG_PATH_REL_HOME))
            .ok_or(anyhow!("Could not find home directory"))
    }

    pub async fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut file = tokio::fs::File::open(&path).await.map_err(|e| {
            anyhow!(
                "Could not open configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).await.map_err(|e| {
            anyhow!(
                "Could not read configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        let config: Config = toml::from_str(&contents).map_err(|e| {
            anyhow!(
                "Could not parse configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vc_section_is_optional() {
        let config: Config = toml::from_str(
            r#"
            [general]
            discord_token = "token"
            "#,
        )
        .unwrap();

        assert_eq!(config.vc.creation_guard_ttl_seconds, 60);
        assert_eq!(config.vc.move_recheck_delay_ms, 100);
        assert_eq!(config.vc.rate_limit_max_attempts, 5);
    }

    #[test]
    fn vc_section_overrides() {
        let config: Config = toml::from_str(
            r#"
            [general]
            discord_token = "token"

            [vc]
            creation_guard_ttl_seconds = 10
            move_recheck_delay_ms = 250
            rate_limit_max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.vc.creation_guard_ttl_seconds, 10);
        assert_eq!(config.vc.move_recheck_delay_ms, 250);
        assert_eq!(config.vc.rate_limit_max_attempts, 3);
    }
}
