//! Reads a local MPEG-PS capture file in small chunks, feeds it through
//! [`media_core::ingress::ps::PsReassembler`], and republishes the result on
//! a live `Source` with the full packager set attached — video-only demo
//! that exercises manager → source → packager wiring end to end without a
//! real RTMP/SDP listener.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use media_core::identity::StreamIdentity;
use media_core::ingress::ps::{PsReassembler, PsReassemblerConfig};
use media_core::packager::dvr::{DvrConfig, DvrContainer, DvrPackager};
use media_core::packager::fmp4::{Fmp4Config, Fmp4Flavor, Fmp4Packager};
use media_core::packager::hls_ts::{HlsTsConfig, HlsTsPackager};

use crate::error::Result;
use crate::state::AppState;

const CHUNK_SIZE: usize = 4096;

pub async fn run(state: Arc<AppState>, path: String) -> Result<()> {
    let identity = StreamIdentity::default_vhost(&state.config.demo_ingress_app, &state.config.demo_ingress_stream);
    let artifact_root = PathBuf::from(&state.config.core.artifact_root).join(identity.canonical_url().trim_start_matches('/'));

    let source = state.sources.fetch_or_create(&identity).await;
    source.add_packager(Arc::new(HlsTsPackager::new(HlsTsConfig {
        artifact_dir: artifact_root.join("hls"),
        target_duration_ms: (state.config.core.hls.segment_duration_secs * 1000.0) as i64,
        fragment_absolute_cap_ms: (state.config.core.hls.fragment_absolute_cap_secs * 1000.0) as i64,
        playlist_window: state.config.core.hls.playlist_window,
        vod: false,
        hooks: Some(state.hooks.clone()),
    })));
    source.add_packager(Arc::new(Fmp4Packager::new(Fmp4Config {
        flavor: Fmp4Flavor::HlsFmp4,
        artifact_dir: artifact_root.join("hls-fmp4"),
        target_duration_ms: (state.config.core.hls.segment_duration_secs * 1000.0) as i64,
        fragment_absolute_cap_ms: (state.config.core.hls.fragment_absolute_cap_secs * 1000.0) as i64,
        window: state.config.core.hls.playlist_window,
        min_buffer_time_secs: state.config.core.dash.min_buffer_time_secs,
        hooks: Some(state.hooks.clone()),
    })));
    source.add_packager(Arc::new(Fmp4Packager::new(Fmp4Config {
        flavor: Fmp4Flavor::DashFmp4,
        artifact_dir: artifact_root.join("dash"),
        target_duration_ms: (state.config.core.dash.segment_duration_secs * 1000.0) as i64,
        fragment_absolute_cap_ms: (state.config.core.dash.fragment_absolute_cap_secs * 1000.0) as i64,
        window: state.config.core.hls.playlist_window,
        min_buffer_time_secs: state.config.core.dash.min_buffer_time_secs,
        hooks: Some(state.hooks.clone()),
    })));
    if state.config.core.dvr.enabled {
        let container = if state.config.core.dvr.container == "mp4" { DvrContainer::Mp4 } else { DvrContainer::Flv };
        source.add_packager(Arc::new(DvrPackager::new(DvrConfig {
            container,
            artifact_dir: artifact_root.join("dvr"),
            segment_by_duration_ms: state.config.core.dvr.segment_by_duration_secs.map(|s| (s * 1000.0) as i64),
            hooks: Some(state.hooks.clone()),
        })));
    }

    source.on_publish().await?;
    tracing::info!(%identity, path = %path, "demo ingress publishing");

    if let Err(err) = ingest_file(&source, &path).await {
        tracing::error!(error = %err, "demo ingress stopped");
    }

    source.on_unpublish().await;
    Ok(())
}

async fn ingest_file(source: &Arc<media_core::Source>, path: &str) -> Result<()> {
    let bytes = tokio::fs::read(Path::new(path)).await?;
    let mut reassembler = PsReassembler::new(PsReassemblerConfig::default());

    for chunk in bytes.chunks(CHUNK_SIZE) {
        let packets = reassembler
            .feed(chunk)
            .map_err(|e| crate::error::ServerError::Core(e))?;
        for packet in packets {
            source.on_packet(packet).await?;
        }
        // Pace ingestion roughly like a live feed rather than dumping the
        // whole file in one tight loop.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[tokio::test]
    async fn run_against_a_missing_file_reports_an_error_and_unpublishes() {
        let state = Arc::new(AppState::new(ServerConfig::default()));
        let identity = StreamIdentity::default_vhost(&state.config.demo_ingress_app, &state.config.demo_ingress_stream);
        run(state.clone(), "/nonexistent/does-not-exist.ps".to_string()).await.unwrap();
        let source = state.sources.fetch(&identity).await.unwrap();
        assert!(!source.is_published());
    }
}
