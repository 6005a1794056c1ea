// MAMA OS — Configuration loading.
//
// A single declarative TOML file (§6) deserialized into `MamaConfig`. Every
// nested block has `#[serde(default)]` so a minimal or even empty file is
// valid — this mirrors the `Default`-impl-everywhere style the rest of this
// codebase uses for its config structs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::MamaConfig;
use crate::rate_limiter::RateLimiterConfig;
use crate::response_validator::ResponseValidatorConfig as RuntimeResponseValidatorConfig;
use crate::stop_continuation::StopContinuationConfig as RuntimeStopContinuationConfig;

impl From<&crate::atoms::types::RateLimitConfig> for RateLimiterConfig {
    fn from(schema: &crate::atoms::types::RateLimitConfig) -> Self {
        RateLimiterConfig {
            max_requests_per_minute: schema.max_requests_per_minute,
            min_interval_ms: schema.min_interval_ms,
            max_queue_size: schema.max_queue_size,
            request_timeout_ms: schema.request_timeout_ms,
            max_retries: schema.max_retries,
        }
    }
}

impl From<&crate::atoms::types::ResponseValidatorConfig> for RuntimeResponseValidatorConfig {
    fn from(schema: &crate::atoms::types::ResponseValidatorConfig) -> Self {
        RuntimeResponseValidatorConfig {
            flattery_threshold: schema.flattery_threshold,
            pattern_count_threshold: schema.pattern_count_threshold,
            max_retries: schema.max_retries,
        }
    }
}

/// `enabled`/`max_retries` live on `MultiAgentConfig.task_continuation`
/// (§6's `task_continuation: { enabled, max_retries }`), while
/// `truncation_threshold_chars` lives on the top-level `stop_continuation`
/// block — two schema sections feeding one runtime config.
pub fn build_stop_continuation_config(
    task_continuation: &crate::atoms::types::TaskContinuationConfig,
    stop_continuation: &crate::atoms::types::StopContinuationConfig,
) -> RuntimeStopContinuationConfig {
    RuntimeStopContinuationConfig {
        enabled: task_continuation.enabled,
        max_retries: task_continuation.max_retries,
        truncation_threshold_chars: stop_continuation.truncation_threshold_chars,
    }
}

/// Resolve the default config file path: `$XDG_CONFIG_HOME/mama-os/config.toml`
/// (or the platform equivalent via the `dirs` crate).
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mama-os")
        .join("config.toml")
}

impl MamaConfig {
    pub fn load(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            log::warn!("[config] no config file at {}, using defaults", path.display());
            return Ok(MamaConfig::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| EngineError::config(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| EngineError::config(format!("serialize config: {e}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

/// Shared, hot-reloadable config handle. Readers always see a consistent
/// snapshot; a reload swaps the whole `Arc` rather than mutating fields in
/// place, so in-flight reads never observe a half-written config (§5).
#[derive(Clone)]
pub struct ConfigHandle(Arc<RwLock<Arc<MamaConfig>>>);

impl ConfigHandle {
    pub fn new(config: MamaConfig) -> Self {
        ConfigHandle(Arc::new(RwLock::new(Arc::new(config))))
    }

    pub fn snapshot(&self) -> Arc<MamaConfig> {
        self.0.read().clone()
    }

    pub fn reload(&self, path: &Path) -> EngineResult<()> {
        let fresh = MamaConfig::load(path)?;
        *self.0.write() = Arc::new(fresh);
        log::info!("[config] reloaded from {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_continuation_config_reads_enabled_and_retries_from_task_continuation() {
        let task_continuation = crate::atoms::types::TaskContinuationConfig { enabled: false, max_retries: 7 };
        let stop_continuation = crate::atoms::types::StopContinuationConfig { truncation_threshold_chars: 42 };
        let runtime = build_stop_continuation_config(&task_continuation, &stop_continuation);
        assert!(!runtime.enabled);
        assert_eq!(runtime.max_retries, 7);
        assert_eq!(runtime.truncation_threshold_chars, 42);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = MamaConfig::load(Path::new("/nonexistent/mama-os-test-config.toml")).unwrap();
        assert!(!cfg.multi_agent.enabled);
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = std::env::temp_dir().join(format!("mama-os-config-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let mut cfg = MamaConfig::default();
        cfg.multi_agent.default_agent_id = "sisyphus".into();
        cfg.save(&path).unwrap();

        let loaded = MamaConfig::load(&path).unwrap();
        assert_eq!(loaded.multi_agent.default_agent_id, "sisyphus");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn config_handle_reload_swaps_snapshot_atomically() {
        let handle = ConfigHandle::new(MamaConfig::default());
        assert_eq!(handle.snapshot().multi_agent.default_agent_id, "");

        let dir = std::env::temp_dir().join(format!("mama-os-config-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        let mut cfg = MamaConfig::default();
        cfg.multi_agent.default_agent_id = "reloaded".into();
        cfg.save(&path).unwrap();

        handle.reload(&path).unwrap();
        assert_eq!(handle.snapshot().multi_agent.default_agent_id, "reloaded");

        std::fs::remove_dir_all(&dir).ok();
    }
}
