//! Runtime configuration, hot-reloadable per spec §6.
//!
//! Structured the way the teacher's `ServerConfig` is (plain serde/toml
//! structs with `Default` impls), but held behind an `ArcSwap` so a running
//! process can pick up an edited file without restarting: every read takes
//! an `Arc` snapshot of the whole tree, so in-flight packagers never
//! observe a half-updated config.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GopCacheConfig {
    pub enabled: bool,
    pub max_frames: Option<usize>,
}

impl Default for GopCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_frames: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerQueueConfig {
    /// How many milliseconds of media a slow consumer may buffer before the
    /// producer starts dropping whole GOPs from the head (spec §4.3).
    pub queue_duration_cap_ms: i64,
}

impl Default for ConsumerQueueConfig {
    fn default() -> Self {
        Self {
            queue_duration_cap_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HlsConfig {
    pub segment_duration_secs: f64,
    pub playlist_window: usize,
    pub fragment_window: bool,
    pub encryption_enabled: bool,
    pub key_rotation_segments: Option<u32>,
    /// Hard cut bound: a fragment is closed once this many seconds have
    /// elapsed even without a keyframe, to bound worst-case segment length
    /// on keyframe-starved input (spec §4.4).
    pub fragment_absolute_cap_secs: f64,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            segment_duration_secs: 6.0,
            playlist_window: 5,
            fragment_window: false,
            encryption_enabled: false,
            key_rotation_segments: None,
            fragment_absolute_cap_secs: 24.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashConfig {
    pub segment_duration_secs: f64,
    pub min_buffer_time_secs: f64,
    /// Same absolute-cap bound as [`HlsConfig::fragment_absolute_cap_secs`],
    /// applied independently to each fMP4 track.
    pub fragment_absolute_cap_secs: f64,
}

impl Default for DashConfig {
    fn default() -> Self {
        Self {
            segment_duration_secs: 6.0,
            min_buffer_time_secs: 12.0,
            fragment_absolute_cap_secs: 24.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DvrConfig {
    pub enabled: bool,
    /// `flv` or `mp4`; selects the continuous-packager container.
    pub container: String,
    pub segment_by_duration_secs: Option<f64>,
    /// Seconds a disposed fragment lingers before its file is unlinked
    /// (spec §9 Open Question: disposal timeout is configurable, default
    /// keeps a short grace window for in-flight readers).
    pub disposal_timeout_secs: u64,
}

impl Default for DvrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            container: "flv".to_string(),
            segment_by_duration_secs: None,
            disposal_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtcConfig {
    pub enabled: bool,
    pub nack_enabled: bool,
    pub pli_debounce_ms: u64,
    pub twcc_enabled: bool,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            nack_enabled: true,
            pli_debounce_ms: 1_000,
            twcc_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    pub on_publish: Vec<String>,
    pub on_unpublish: Vec<String>,
    pub on_play: Vec<String>,
    pub on_stop: Vec<String>,
    pub on_hls: Vec<String>,
    pub on_dvr: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            on_publish: Vec::new(),
            on_unpublish: Vec::new(),
            on_play: Vec::new(),
            on_stop: Vec::new(),
            on_hls: Vec::new(),
            on_dvr: Vec::new(),
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub artifact_root: String,
    pub log_level: String,
    pub idle_source_timeout_secs: u64,
    pub eviction_interval_secs: u64,
    pub gop_cache: GopCacheConfig,
    pub consumer_queue: ConsumerQueueConfig,
    pub hls: HlsConfig,
    pub dash: DashConfig,
    pub dvr: DvrConfig,
    pub rtc: RtcConfig,
    pub hooks: HookConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            artifact_root: "./data".to_string(),
            log_level: "info".to_string(),
            idle_source_timeout_secs: 60,
            eviction_interval_secs: 10,
            gop_cache: GopCacheConfig::default(),
            consumer_queue: ConsumerQueueConfig::default(),
            hls: HlsConfig::default(),
            dash: DashConfig::default(),
            dvr: DvrConfig::default(),
            rtc: RtcConfig::default(),
            hooks: HookConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Hot-reloadable handle. Cloning is cheap (one `Arc` bump); every call site
/// that needs current settings calls [`ConfigHandle::get`] rather than
/// holding on to a snapshot across an await point.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<ServerConfig>>,
}

impl ConfigHandle {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    pub fn get(&self) -> Arc<ServerConfig> {
        self.inner.load_full()
    }

    /// Replace the whole config tree. Callers typically reload from disk on
    /// SIGHUP or a `/reload` admin hook and call this once.
    pub fn set(&self, config: ServerConfig) {
        self.inner.store(Arc::new(config));
    }

    pub fn reload_from_file(&self, path: &str) -> Result<()> {
        let config = ServerConfig::from_file(path)?;
        self.set(config);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.hls.segment_duration_secs, 6.0);
        assert!(!config.dvr.enabled);
    }

    #[test]
    fn handle_get_reflects_latest_set() {
        let handle = ConfigHandle::new(ServerConfig::default());
        assert_eq!(handle.get().port, 8080);
        let mut updated = ServerConfig::default();
        updated.port = 9090;
        handle.set(updated);
        assert_eq!(handle.get().port, 9090);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = ServerConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: ServerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.port, config.port);
    }
}
