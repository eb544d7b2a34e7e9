use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};
use unic_langid::LanguageIdentifier;

use crate::watch::WatchEvent;

pub const DEFAULT_LOCALE: &str = "en";

const EN_MESSAGES: &str = r#"
# Watch status
watch-queued = Queued { $file }
watch-dispatched = Sent { $file } to the import worker
watch-dispatch-retry = Retrying { $file } (attempt { $attempts }): { $error }
watch-completed = Imported { $file }
watch-abandoned = Gave up on { $file }: { $error }
watch-cancelled = { $file } was removed, import cancelled
watch-stalled = Worker stopped responding while importing { $file }

# Health
health-status-healthy = Service is healthy
health-worker-attached = Import worker connected
health-worker-detached = No import worker connected
"#;

const ZH_CN_MESSAGES: &str = r#"
# 监控状态
watch-queued = 已加入队列：{ $file }
watch-dispatched = 已将 { $file } 交给导入进程
watch-dispatch-retry = 正在重试 { $file }（第 { $attempts } 次）：{ $error }
watch-completed = 已导入 { $file }
watch-abandoned = 已放弃 { $file }：{ $error }
watch-cancelled = { $file } 已被删除，导入已取消
watch-stalled = 导入 { $file } 时导入进程无响应

# 健康检查
health-status-healthy = 服务运行正常
health-worker-attached = 导入进程已连接
health-worker-detached = 没有已连接的导入进程
"#;

/// Internationalization service using Fluent (thread-safe)
pub struct I18n {
    bundles: RwLock<HashMap<String, FluentBundle<FluentResource>>>,
    default_locale: String,
}

impl I18n {
    /// Create a new i18n service with the embedded translations
    pub fn new() -> Self {
        Self::with_default_locale(DEFAULT_LOCALE)
    }

    pub fn with_default_locale(default_locale: &str) -> Self {
        let i18n = Self {
            bundles: RwLock::new(HashMap::new()),
            default_locale: default_locale.to_string(),
        };

        for (locale, content) in [("en", EN_MESSAGES), ("zh-CN", ZH_CN_MESSAGES)] {
            if let Err(e) = i18n.add_locale(locale, content) {
                warn!(locale = %locale, error = %e, "Failed to load embedded translations");
            }
        }

        i18n
    }

    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    /// Add a locale with translations
    pub fn add_locale(&self, locale: &str, content: &str) -> Result<(), String> {
        let lang_id: LanguageIdentifier = locale
            .parse()
            .map_err(|e| format!("Invalid locale '{}': {}", locale, e))?;

        let resource = FluentResource::try_new(content.to_string())
            .map_err(|(_, errors)| format!("Failed to parse Fluent resource: {:?}", errors))?;

        let mut bundle = FluentBundle::new_concurrent(vec![lang_id]);
        bundle
            .add_resource(resource)
            .map_err(|errors| format!("Failed to add resource to bundle: {:?}", errors))?;

        let mut bundles = self.bundles.write().unwrap();
        bundles.insert(locale.to_string(), bundle);

        debug!(locale = %locale, "Loaded translations");

        Ok(())
    }

    /// Get a translated message
    pub fn get(&self, locale: &str, key: &str, args: Option<&FluentArgs>) -> String {
        // Requested locale, then default, then the key itself
        self.try_get(locale, key, args)
            .or_else(|| self.try_get(&self.default_locale, key, args))
            .or_else(|| self.try_get(DEFAULT_LOCALE, key, args))
            .unwrap_or_else(|| key.to_string())
    }

    fn try_get(&self, locale: &str, key: &str, args: Option<&FluentArgs>) -> Option<String> {
        let bundles = self.bundles.read().unwrap();
        let bundle = bundles.get(locale)?;
        let message = bundle.get_message(key)?;
        let pattern = message.value()?;

        let mut errors = vec![];
        let result = bundle.format_pattern(pattern, args, &mut errors);

        if !errors.is_empty() {
            warn!(key = %key, errors = ?errors, "Fluent formatting errors");
        }

        Some(result.to_string())
    }

    /// Get a translated message with arguments
    pub fn format(&self, locale: &str, key: &str, args: &[(&str, &str)]) -> String {
        let mut fluent_args = FluentArgs::new();
        for (k, v) in args {
            fluent_args.set(*k, *v);
        }
        self.get(locale, key, Some(&fluent_args))
    }

    /// Human-readable text for a status event
    pub fn watch_message(&self, locale: &str, event: &WatchEvent) -> String {
        let file = event
            .file_path
            .as_ref()
            .map(|p| {
                p.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| p.display().to_string())
            })
            .unwrap_or_default();
        let attempts = event.attempts.to_string();
        let error = event.error.clone().unwrap_or_default();
        let key = format!("watch-{}", event.phase);

        self.format(
            locale,
            &key,
            &[
                ("file", file.as_str()),
                ("attempts", attempts.as_str()),
                ("error", error.as_str()),
            ],
        )
    }
}

impl Default for I18n {
    fn default() -> Self {
        Self::new()
    }
}
