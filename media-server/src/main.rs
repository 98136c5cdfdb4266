//! Live Media Publishing & Distribution Core — host binary
//!
//! Wires the `media-core` pub/sub source subsystem to a minimal HTTP
//! surface: loads configuration, owns the `SourceManager`/`HookWorker`/
//! `FastTimer` singletons as explicit values (spec §9 "Global singletons"),
//! optionally drives a demo ingress loop, and serves the artifact
//! directories the packagers write into.

#![allow(dead_code)]

mod config;
mod error;
mod http;
mod integration;
mod limits;
mod metrics;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::http::create_router;
use crate::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_NAME: &str = "media-server";

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    tracing::info!("{} v{} starting", APP_NAME, VERSION);

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        match ServerConfig::from_file(&config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!("failed to load config file {}: {}. Using defaults.", config_path, e);
                ServerConfig::default()
            }
        }
    } else {
        ServerConfig::default()
    };
    tracing::info!(?config, "configuration loaded");

    let state = Arc::new(AppState::new(config.clone()));

    // Drive every packager's periodic cycle() (spec §4.4 absolute-cap cuts,
    // §4.7 TWCC/SR-RR cadence) off one shared timer rather than one task
    // per packager.
    {
        let state_timer = Arc::clone(&state);
        state.timer.subscribe(Duration::from_secs(2), move || {
            let state_timer = Arc::clone(&state_timer);
            tokio::spawn(async move {
                for identity in state_timer.sources.identities() {
                    if let Some(source) = state_timer.sources.fetch(&identity).await {
                        for packager in source.packagers() {
                            packager.cycle(&identity).await;
                        }
                    }
                }
            });
        });
        state.timer.clone().spawn(Duration::from_millis(100));
    }

    // Background task: evict idle sources on the configured interval.
    {
        let state_bg = Arc::clone(&state);
        let interval_secs = state.config.core.eviction_interval_secs.max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let removed = state_bg.cleanup_idle_sources().await;
                if removed > 0 {
                    tracing::info!(removed, "evicted idle source(s)");
                }
            }
        });
    }

    // Optional demo ingress: feed a local MPEG-PS file through the
    // reassembler into a live Source, standing in for the RTMP/SDP wire
    // layers the spec scopes out of this crate.
    if let Some(path) = state.config.demo_ingress_path.clone() {
        let state_ingress = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(err) = integration::demo_ingress::run(state_ingress, path).await {
                tracing::error!(error = %err, "demo ingress loop failed");
            }
        });
    }

    let app = create_router(state.clone());

    let addr: SocketAddr = state.config.socket_addr().parse().map_err(|e| {
        crate::error::ServerError::Config(format!("invalid bind address: {e}"))
    })?;
    tracing::info!("starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "media_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
