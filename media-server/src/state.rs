//! Application state management.
//!
//! Holds the process-wide singletons spec §9 calls out as "global
//! singletons kept as explicit values rather than statics": the
//! `SourceManager`, the hook worker, and the fast timer, plus the
//! hot-reloadable config handle and this binary's own ambient metrics.

use std::sync::Arc;

use media_core::hooks::HookWorker;
use media_core::manager::SourceManager;
use media_core::timer::FastTimer;

use crate::config::ServerConfig;
use crate::metrics::Metrics;

/// Application state shared across all handlers.
pub struct AppState {
    pub sources: Arc<SourceManager>,
    pub hooks: Arc<HookWorker>,
    pub timer: Arc<FastTimer>,
    pub metrics: Arc<Metrics>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let hooks_config = &config.core.hooks;
        let mut targets: Vec<String> = hooks_config
            .on_publish
            .iter()
            .chain(&hooks_config.on_unpublish)
            .chain(&hooks_config.on_play)
            .chain(&hooks_config.on_stop)
            .chain(&hooks_config.on_hls)
            .chain(&hooks_config.on_dvr)
            .cloned()
            .collect();
        targets.sort();
        targets.dedup();
        let hooks = HookWorker::spawn(targets, std::time::Duration::from_secs(hooks_config.timeout_secs));
        let sources = Arc::new(SourceManager::with_hooks(hooks.clone()));
        let timer = Arc::new(FastTimer::new());
        Self {
            sources,
            hooks,
            timer,
            metrics: Arc::new(Metrics::new()),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Evict idle sources; intended for the periodic background task
    /// spawned from `main`.
    pub async fn cleanup_idle_sources(&self) -> usize {
        let idle_timeout = std::time::Duration::from_secs(self.config.core.idle_source_timeout_secs);
        self.sources.evict_idle(idle_timeout).await
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::with_defaults()
    }
}
