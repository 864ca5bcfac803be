use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use module_bridge::engine::EngineOptions;
use module_bridge::message::{DEFAULT_CHANNEL, DEFAULT_ENGINE_ID, SurfacePolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub const ENGINE_ID_KEY: &str = "EMBEDHOST_ENGINE_ID";
pub const CHANNEL_KEY: &str = "EMBEDHOST_CHANNEL";
pub const SURFACE_POLICY_KEY: &str = "EMBEDHOST_SURFACE_POLICY";
pub const STOP_TIMEOUT_KEY: &str = "EMBEDHOST_STOP_TIMEOUT_MS";
pub const LOG_LEVEL_KEY: &str = "EMBEDHOST_LOG_LEVEL";
pub const LOG_DIR_KEY: &str = "EMBEDHOST_LOG_DIR";

const DEFAULT_STOP_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// A source of string settings.
#[async_trait]
pub trait ConfigManagerType: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    fn debug_box(&self) -> String;
}

pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl ConfigManager {
    pub async fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).await
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Process environment, seeded from a `.env` file when one exists.
///
/// Values already present in the environment win over the file.
#[derive(Debug)]
pub struct EnvConfigManager {
    env_file: PathBuf,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        if env_file.exists() {
            match dotenvy::from_path(&env_file) {
                Ok(()) => info!("loaded settings from {}", env_file.display()),
                Err(err) => warn!("could not parse {}: {err}", env_file.display()),
            }
        }
        Box::new(Self { env_file })
    }
}

#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn debug_box(&self) -> String {
        format!("EnvConfigManager({})", self.env_file.display())
    }
}

/// In-memory settings.
#[derive(Debug, Default)]
pub struct MapConfigManager {
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn from_pairs<I, K, V>(pairs: I) -> Box<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Box::new(Self { map })
    }
}

#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

/// Settings of the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    pub engine_id: String,
    pub channel: String,
    pub surface_policy: SurfacePolicy,
    pub stop_timeout_ms: u64,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            engine_id: DEFAULT_ENGINE_ID.to_owned(),
            channel: DEFAULT_CHANNEL.to_owned(),
            surface_policy: SurfacePolicy::default(),
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            log_level: DEFAULT_LOG_LEVEL.to_owned(),
            log_dir: None,
        }
    }
}

impl HostConfig {
    pub async fn load(config: &ConfigManager) -> Result<Self, ConfigError> {
        let defaults = HostConfig::default();

        let engine_id = non_empty(ENGINE_ID_KEY, config.get(ENGINE_ID_KEY).await)?
            .unwrap_or(defaults.engine_id);
        let channel = non_empty(CHANNEL_KEY, config.get(CHANNEL_KEY).await)?
            .unwrap_or(defaults.channel);

        let surface_policy = match config.get(SURFACE_POLICY_KEY).await {
            Some(raw) => SurfacePolicy::from_str(raw.trim()).map_err(|_| ConfigError::Invalid {
                key: SURFACE_POLICY_KEY,
                value: raw.clone(),
                reason: "expected `reuse` or `exclusive`".into(),
            })?,
            None => defaults.surface_policy,
        };

        let stop_timeout_ms = match config.get(STOP_TIMEOUT_KEY).await {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                key: STOP_TIMEOUT_KEY,
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => defaults.stop_timeout_ms,
        };

        let log_level = match non_empty(LOG_LEVEL_KEY, config.get(LOG_LEVEL_KEY).await)? {
            Some(level) => {
                EnvFilter::try_new(&level).map_err(|e| ConfigError::Invalid {
                    key: LOG_LEVEL_KEY,
                    value: level.clone(),
                    reason: e.to_string(),
                })?;
                level
            }
            None => defaults.log_level,
        };

        let log_dir = config
            .get(LOG_DIR_KEY)
            .await
            .map(|dir| dir.trim().to_owned())
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            engine_id,
            channel,
            surface_policy,
            stop_timeout_ms,
            log_level,
            log_dir,
        })
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            surface_policy: self.surface_policy,
            stop_timeout: self.stop_timeout(),
        }
    }
}

fn non_empty(key: &'static str, value: Option<String>) -> Result<Option<String>, ConfigError> {
    match value {
        Some(v) if v.trim().is_empty() => Err(ConfigError::Invalid {
            key,
            value: v,
            reason: "must not be empty".into(),
        }),
        Some(v) => Ok(Some(v.trim().to_owned())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;
    use tempfile::tempdir;

    fn manager(pairs: &[(&str, &str)]) -> ConfigManager {
        ConfigManager(MapConfigManager::from_pairs(pairs.iter().copied()))
    }

    #[tokio::test]
    async fn map_config_manager_basic() {
        let mgr = MapConfigManager::from_pairs([("foo", "bar"), ("empty", "")]);
        assert_eq!(mgr.get("foo").await, Some("bar".to_string()));
        assert_eq!(mgr.get("empty").await, Some(String::new()));
        assert_eq!(mgr.get("missing").await, None);
        assert_eq!(mgr.debug_box(), "MapConfigManager(2 entries)");
    }

    #[tokio::test]
    async fn defaults_when_nothing_is_set() {
        let config = HostConfig::load(&manager(&[])).await.unwrap();
        assert_eq!(config, HostConfig::default());
        assert_eq!(config.engine_id, "my_flutter_engine");
        assert_eq!(config.channel, "com.example.flutter_module/channel");
        assert_eq!(config.stop_timeout(), Duration::from_secs(2));
        assert_eq!(config.engine_options().surface_policy, SurfacePolicy::Reuse);
    }

    #[tokio::test]
    async fn every_key_is_read() {
        let config = HostConfig::load(&manager(&[
            (ENGINE_ID_KEY, "main"),
            (CHANNEL_KEY, "demo/channel"),
            (SURFACE_POLICY_KEY, "Exclusive"),
            (STOP_TIMEOUT_KEY, "150"),
            (LOG_LEVEL_KEY, "module_bridge=debug,info"),
            (LOG_DIR_KEY, "/tmp/embedhost-logs"),
        ]))
        .await
        .unwrap();

        assert_eq!(config.engine_id, "main");
        assert_eq!(config.channel, "demo/channel");
        assert_eq!(config.surface_policy, SurfacePolicy::Exclusive);
        assert_eq!(config.stop_timeout(), Duration::from_millis(150));
        assert_eq!(config.log_level, "module_bridge=debug,info");
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/embedhost-logs")));
    }

    #[tokio::test]
    async fn invalid_values_are_rejected() {
        for (key, value) in [
            (SURFACE_POLICY_KEY, "shared"),
            (STOP_TIMEOUT_KEY, "soon"),
            (ENGINE_ID_KEY, "  "),
            (LOG_LEVEL_KEY, "module_bridge=loud"),
        ] {
            let err = HostConfig::load(&manager(&[(key, value)])).await.unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { key: k, .. } if k == key),
                "{key}={value} gave {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn env_file_seeds_the_environment() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        write(
            &env_path,
            format!("{ENGINE_ID_KEY}=from_env_file\n{STOP_TIMEOUT_KEY}=750\n"),
        )
        .unwrap();

        let manager = ConfigManager(EnvConfigManager::new(env_path.clone()));
        assert!(format!("{manager:?}").contains(".env"));
        let config = HostConfig::load(&manager).await.unwrap();
        assert_eq!(config.engine_id, "from_env_file");
        assert_eq!(config.stop_timeout(), Duration::from_millis(750));
        assert_eq!(config.channel, DEFAULT_CHANNEL);
    }

    #[tokio::test]
    async fn missing_env_file_is_not_an_error() {
        let dir = tempdir().unwrap();
        let mgr = EnvConfigManager::new(dir.path().join("absent.env"));
        assert_eq!(mgr.get("EMBEDHOST_SURELY_UNSET_KEY").await, None);
    }
}
