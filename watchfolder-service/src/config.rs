use arc_swap::ArcSwap;
use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::db::Database;
use crate::error::{ServiceError, ServiceResult};

/// Prefix for environment overrides, e.g. `WATCHFOLDER__WATCH__STALL_TICKS=6`
const ENV_PREFIX: &str = "WATCHFOLDER";

// ==================== Static Configuration (startup-only) ====================

/// Static configuration that cannot be changed at runtime
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "default_watch_tuning")]
    pub watch: WatchTuning,

    /// Locale for status messages when an observer does not ask for one
    #[serde(default = "default_locale")]
    pub locale: String,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            storage: default_storage(),
            watch: default_watch_tuning(),
            locale: default_locale(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Scheduler and monitor tuning
#[derive(Debug, Clone, Deserialize)]
pub struct WatchTuning {
    /// A file must be quiet this long before its events are delivered
    #[serde(default = "default_stability_debounce_ms")]
    pub stability_debounce_ms: u64,

    /// Deepest directory level monitored; files directly in the root are 0
    #[serde(default)]
    pub max_depth: Option<usize>,

    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,

    /// Watchdog intervals without worker activity before a task counts as stalled
    #[serde(default = "default_stall_ticks")]
    pub stall_ticks: u32,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Free the worker on an `error` report instead of waiting for `idle`
    #[serde(default = "default_error_frees_worker")]
    pub error_frees_worker: bool,

    /// Accepted file extensions without the dot; empty accepts everything
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl WatchTuning {
    pub fn stability_debounce(&self) -> Duration {
        Duration::from_millis(self.stability_debounce_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs.max(1))
    }
}

impl Default for WatchTuning {
    fn default() -> Self {
        default_watch_tuning()
    }
}

// ==================== Dynamic Configuration (hot-reloadable) ====================

/// Dynamic configuration that can be updated at runtime via API.
/// DB values override config file/env defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DynamicConfig {
    #[serde(default)]
    pub watch: WatchSettings,
}

/// Which directory is watched, and whether watching is on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub work_directory: Option<PathBuf>,
}

impl WatchSettings {
    /// Settings rows that persist these values
    pub fn to_settings(&self) -> HashMap<String, serde_json::Value> {
        HashMap::from([
            ("watch.enabled".to_string(), serde_json::json!(self.enabled)),
            (
                "watch.work_directory".to_string(),
                match &self.work_directory {
                    Some(dir) => serde_json::Value::String(dir.display().to_string()),
                    None => serde_json::Value::Null,
                },
            ),
        ])
    }
}

// ==================== DynamicConfig Settings Keys ====================

/// All valid setting keys for DynamicConfig
pub const VALID_SETTING_KEYS: &[&str] = &["watch.enabled", "watch.work_directory"];

impl DynamicConfig {
    /// Get all valid setting keys
    pub fn valid_keys() -> HashSet<&'static str> {
        VALID_SETTING_KEYS.iter().copied().collect()
    }

    /// Reject keys this config does not know
    pub fn validate_keys(settings: &HashMap<String, serde_json::Value>) -> ServiceResult<()> {
        let valid = Self::valid_keys();
        let mut unknown: Vec<&str> = settings
            .keys()
            .map(String::as_str)
            .filter(|key| !valid.contains(key))
            .collect();

        if unknown.is_empty() {
            return Ok(());
        }
        unknown.sort_unstable();
        Err(ServiceError::InvalidRequest {
            message: format!("Unknown setting keys: {}", unknown.join(", ")),
        })
    }

    /// Convert config to key-value map for API response
    pub fn to_key_value_map(&self) -> HashMap<String, serde_json::Value> {
        self.watch.to_settings()
    }

    /// Apply DB settings as overrides to this config
    pub fn merge_from_db(&mut self, db_settings: &HashMap<String, serde_json::Value>) {
        for (key, value) in db_settings {
            self.apply_setting(key, value);
        }
    }

    /// Apply a single setting value
    fn apply_setting(&mut self, key: &str, value: &serde_json::Value) {
        match key {
            "watch.enabled" => {
                if let Some(v) = value.as_bool() {
                    self.watch.enabled = v;
                }
            }
            "watch.work_directory" => {
                if value.is_null() {
                    self.watch.work_directory = None;
                } else if let Some(v) = value.as_str() {
                    self.watch.work_directory = Some(PathBuf::from(v));
                }
            }
            _ => {
                tracing::warn!(key = %key, "Unknown setting key in merge_from_db");
            }
        }
    }
}

// ==================== RuntimeConfig (combines static + dynamic) ====================

/// Runtime configuration manager.
/// Combines static config (startup-only) with dynamic config (hot-reloadable via ArcSwap).
pub struct RuntimeConfig {
    /// Static configuration (never changes after startup)
    pub static_config: StaticConfig,
    /// Dynamic configuration (can be hot-reloaded)
    dynamic: ArcSwap<DynamicConfig>,
}

impl RuntimeConfig {
    pub fn new(static_config: StaticConfig, dynamic: DynamicConfig) -> Self {
        Self {
            static_config,
            dynamic: ArcSwap::from_pointee(dynamic),
        }
    }

    /// Get current dynamic config snapshot (lock-free read)
    pub fn dynamic(&self) -> arc_swap::Guard<Arc<DynamicConfig>> {
        self.dynamic.load()
    }

    /// Update dynamic config (atomic swap)
    pub fn update_dynamic(&self, new_config: DynamicConfig) {
        self.dynamic.store(Arc::new(new_config));
    }

    /// Load dynamic config from file/env defaults with DB overrides
    pub fn load(static_config: StaticConfig, db: &Database) -> ServiceResult<Self> {
        let mut dynamic = load_dynamic_config()?;
        dynamic.merge_from_db(&db.get_all_settings()?);
        Ok(Self::new(static_config, dynamic))
    }

    /// Rebuild dynamic config from file/env defaults + DB and swap atomically
    pub fn reload_from_db(&self, db: &Database) -> ServiceResult<()> {
        let mut dynamic = load_dynamic_config()?;
        dynamic.merge_from_db(&db.get_all_settings()?);
        self.update_dynamic(dynamic);
        Ok(())
    }
}

// ==================== Config Loading Functions ====================

fn sources() -> ConfigBuilder<DefaultState> {
    Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("watch.extensions")
                .try_parsing(true),
        )
}

/// Load static configuration from file and env vars
pub fn load_static_config() -> ServiceResult<StaticConfig> {
    sources()
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize static config: {}", e),
        })
}

/// Load dynamic configuration from file and env vars (without DB overrides)
fn load_dynamic_config() -> ServiceResult<DynamicConfig> {
    sources()
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize dynamic config: {}", e),
        })
}

// ==================== Default Value Functions ====================

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_locale() -> String {
    crate::i18n::DEFAULT_LOCALE.to_string()
}

fn default_watch_tuning() -> WatchTuning {
    WatchTuning {
        stability_debounce_ms: default_stability_debounce_ms(),
        max_depth: None,
        watchdog_interval_secs: default_watchdog_interval_secs(),
        stall_ticks: default_stall_ticks(),
        max_attempts: default_max_attempts(),
        error_frees_worker: default_error_frees_worker(),
        extensions: Vec::new(),
    }
}

fn default_stability_debounce_ms() -> u64 {
    2000
}

fn default_watchdog_interval_secs() -> u64 {
    30
}

fn default_stall_ticks() -> u32 {
    4
}

fn default_max_attempts() -> u32 {
    crate::watch::MAX_ATTEMPTS
}

fn default_error_frees_worker() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use serde_json::json;

    fn static_from_toml(toml: &str) -> StaticConfig {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_static_defaults() {
        let config = static_from_toml("");
        assert_eq!(config.server.port, 8090);
        assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
        assert_eq!(config.watch.stability_debounce(), Duration::from_secs(2));
        assert_eq!(config.watch.watchdog_interval(), Duration::from_secs(30));
        assert_eq!(config.watch.stall_ticks, 4);
        assert_eq!(config.watch.max_attempts, 3);
        assert!(config.watch.error_frees_worker);
        assert!(config.watch.max_depth.is_none());
        assert!(config.watch.extensions.is_empty());
        assert_eq!(config.locale, "en");
    }

    #[test]
    fn test_static_overrides() {
        let config = static_from_toml(
            r#"
            locale = "zh-CN"

            [watch]
            max_depth = 2
            stall_ticks = 6
            error_frees_worker = false
            extensions = ["pdf", "TXT"]
            "#,
        );
        assert_eq!(config.watch.max_depth, Some(2));
        assert_eq!(config.watch.stall_ticks, 6);
        assert!(!config.watch.error_frees_worker);
        assert_eq!(config.watch.extensions, ["pdf", "TXT"]);
        // untouched sections keep defaults
        assert_eq!(config.watch.max_attempts, 3);
        assert_eq!(config.locale, "zh-CN");
    }

    #[test]
    fn test_merge_from_db() {
        let mut dynamic = DynamicConfig::default();
        assert!(!dynamic.watch.enabled);

        dynamic.merge_from_db(&HashMap::from([
            ("watch.enabled".to_string(), json!(true)),
            ("watch.work_directory".to_string(), json!("/srv/inbox")),
            ("bogus.key".to_string(), json!(1)),
        ]));
        assert!(dynamic.watch.enabled);
        assert_eq!(dynamic.watch.work_directory, Some(PathBuf::from("/srv/inbox")));

        dynamic.merge_from_db(&HashMap::from([(
            "watch.work_directory".to_string(),
            serde_json::Value::Null,
        )]));
        assert!(dynamic.watch.work_directory.is_none());
    }

    #[test]
    fn test_settings_round_trip_through_merge() {
        let settings = WatchSettings {
            enabled: true,
            work_directory: Some(PathBuf::from("/srv/inbox")),
        };
        let mut dynamic = DynamicConfig::default();
        dynamic.merge_from_db(&settings.to_settings());
        assert_eq!(dynamic.watch, settings);
    }

    #[test]
    fn test_validate_keys() {
        assert!(DynamicConfig::validate_keys(&WatchSettings::default().to_settings()).is_ok());

        let err = DynamicConfig::validate_keys(&HashMap::from([(
            "watch.nope".to_string(),
            json!(1),
        )]))
        .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest { .. }));
        assert!(err.to_string().contains("watch.nope"));
    }

    #[test]
    fn test_runtime_config_swap() {
        let runtime = RuntimeConfig::new(static_from_toml(""), DynamicConfig::default());
        assert!(!runtime.dynamic().watch.enabled);

        runtime.update_dynamic(DynamicConfig {
            watch: WatchSettings {
                enabled: true,
                work_directory: None,
            },
        });
        assert!(runtime.dynamic().watch.enabled);
    }
}
