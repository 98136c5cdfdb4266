//! Host binary configuration: the core pub/sub settings plus the handful of
//! fields only the binary itself needs (bind address is already in
//! `media_core::config::ServerConfig`; this adds the demo ingress source and
//! the rate/connection limit knobs `limits.rs` reads).

use serde::{Deserialize, Serialize};

use media_core::config::ServerConfig as CoreConfig;

use crate::error::{Result, ServerError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub core: CoreConfig,

    /// Path to a raw MPEG-PS/TS file fed into the demo ingress loop on
    /// startup, if set. With no demo ingress, the server only serves
    /// artifacts for streams an external publisher feeds via the library API.
    pub demo_ingress_path: Option<String>,
    /// Identity to publish the demo ingress file under.
    pub demo_ingress_app: String,
    pub demo_ingress_stream: String,

    pub rate_limit_rps: Option<u32>,
    pub max_concurrent_streams: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            demo_ingress_path: None,
            demo_ingress_app: "live".to_string(),
            demo_ingress_stream: "demo".to_string(),
            rate_limit_rps: Some(100),
            max_concurrent_streams: Some(100),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> String {
        self.core.socket_addr()
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ServerError::Config(e.to_string()))
    }
}
