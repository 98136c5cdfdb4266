//! Segmented Packager: HLS with MPEG-TS segments (spec §4.4).

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::fragment::{Fragment, FragmentWindow};
use crate::hooks::{HookPayload, HookWorker};
use crate::identity::StreamIdentity;
use crate::metadata::MetadataCache;
use crate::mux::ts::TsMuxer;
use crate::mux::write_atomic;
use crate::packager::{Packager, PackagerKind};
use crate::packet::MediaPacket;
use crate::playlist::M3u8Writer;

pub struct HlsTsConfig {
    pub artifact_dir: PathBuf,
    pub target_duration_ms: i64,
    /// Hard cut bound (spec §4.4): a fragment is closed once this many
    /// milliseconds have elapsed even without a keyframe.
    pub fragment_absolute_cap_ms: i64,
    pub playlist_window: usize,
    pub vod: bool,
    pub hooks: Option<Arc<HookWorker>>,
}

struct State {
    muxer: TsMuxer,
    buffer: Vec<u8>,
    segment_start_dts: Option<i64>,
    window: FragmentWindow,
    discontinuities: Vec<u64>,
    last_video_sh_dts: Option<i64>,
}

/// Writes `segment-<n>.ts` files under `artifact_dir` and a sliding
/// `index.m3u8` alongside them.
pub struct HlsTsPackager {
    config: HlsTsConfig,
    state: Mutex<State>,
    next_sequence: AtomicU64,
}

impl HlsTsPackager {
    pub fn new(config: HlsTsConfig) -> Self {
        let window = FragmentWindow::new(config.playlist_window, 0, Duration::from_secs(30), true);
        Self {
            state: Mutex::new(State {
                muxer: TsMuxer::new(),
                buffer: Vec::new(),
                segment_start_dts: None,
                window,
                discontinuities: Vec::new(),
                last_video_sh_dts: None,
            }),
            config,
            next_sequence: AtomicU64::new(0),
        }
    }

    async fn flush_segment(&self, identity: &StreamIdentity, force_discontinuity: bool) {
        let (sequence, start_dts, duration_ms, bytes, path) = {
            let mut state = self.state.lock();
            if state.buffer.is_empty() {
                return;
            }
            let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
            let start_dts = state.segment_start_dts.unwrap_or(0);
            let path = self.config.artifact_dir.join(format!("segment-{sequence}.ts"));
            let bytes = std::mem::take(&mut state.buffer);
            let duration_ms = self.config.target_duration_ms;
            if force_discontinuity {
                state.discontinuities.push(sequence);
            }
            (sequence, start_dts, duration_ms, bytes, path)
        };

        if let Err(err) = write_atomic(&path, &bytes).await {
            tracing::warn!(error = %err, path = %path.display(), "failed to write TS segment");
            return;
        }

        let fragment = Fragment::new(sequence, path.clone(), start_dts, duration_ms, true, bytes_len(&bytes));
        let mut state = self.state.lock();
        state.window.push(fragment);
        state.segment_start_dts = None;
        drop(state);

        self.write_playlist().await;

        if let Some(hooks) = &self.config.hooks {
            hooks.enqueue(HookPayload::on_hls(identity, path.to_string_lossy().into_owned()));
        }
    }

    async fn write_playlist(&self) {
        let (rendered, disc) = {
            let state = self.state.lock();
            let writer = M3u8Writer {
                target_duration_secs: (self.config.target_duration_ms / 1000).max(1) as u32,
                media_sequence: state.window.live().next().map(|f| f.sequence_number).unwrap_or(0),
                discontinuity_sequence: 0,
                is_live: !self.config.vod,
            };
            let disc = state.discontinuities.clone();
            (writer.render(state.window.live(), &disc), disc)
        };
        let _ = disc;
        let path = self.config.artifact_dir.join("index.m3u8");
        if let Err(err) = write_atomic(&path, rendered.as_bytes()).await {
            tracing::warn!(error = %err, "failed to write HLS playlist");
        }
    }
}

fn bytes_len(bytes: &[u8]) -> u64 {
    bytes.len() as u64
}

#[async_trait]
impl Packager for HlsTsPackager {
    fn kind(&self) -> PackagerKind {
        PackagerKind::HlsTs
    }

    async fn on_publish(&self, identity: &StreamIdentity, _metadata: &MetadataCache) {
        if let Err(err) = tokio::fs::create_dir_all(&self.config.artifact_dir).await {
            tracing::warn!(error = %err, %identity, "failed to create HLS artifact directory");
        }
        let mut state = self.state.lock();
        state.buffer.clear();
        state.segment_start_dts = None;
        state.last_video_sh_dts = None;
        debug!(%identity, "HLS-TS packager publishing");
    }

    async fn on_unpublish(&self, identity: &StreamIdentity) {
        self.flush_segment(identity, false).await;
    }

    async fn on_packet(&self, identity: &StreamIdentity, packet: &MediaPacket) {
        let should_cut = {
            let mut state = self.state.lock();
            if state.segment_start_dts.is_none() {
                state.segment_start_dts = Some(packet.dts);
                state.buffer.extend_from_slice(&state.muxer.write_psi());
            }

            let discontinuity = packet.is_video()
                && packet.is_sequence_header
                && state.last_video_sh_dts.map(|d| d != packet.dts).unwrap_or(false);
            if packet.is_video() && packet.is_sequence_header {
                state.last_video_sh_dts = Some(packet.dts);
            }

            if packet.is_video() {
                let bytes = state.muxer.write_video(packet);
                state.buffer.extend_from_slice(&bytes);
            } else if packet.is_audio() {
                let bytes = state.muxer.write_audio(packet);
                state.buffer.extend_from_slice(&bytes);
            }

            let span = packet.dts - state.segment_start_dts.unwrap_or(packet.dts);
            let keyframe_boundary = packet.is_video() && packet.is_keyframe && span >= self.config.target_duration_ms;
            let absolute_cap = self.config.fragment_absolute_cap_ms > 0 && span >= self.config.fragment_absolute_cap_ms;
            (keyframe_boundary || absolute_cap, discontinuity)
        };

        if should_cut.0 {
            self.flush_segment(identity, should_cut.1).await;
        }
    }

    async fn cycle(&self, _identity: &StreamIdentity) {
        let mut state = self.state.lock();
        let reaped = state.window.reap();
        if reaped > 0 {
            debug!(reaped, "HLS fragment window reaped expired segments");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::CodecId;
    use bytes::Bytes;

    fn config(dir: &std::path::Path) -> HlsTsConfig {
        HlsTsConfig {
            artifact_dir: dir.to_path_buf(),
            target_duration_ms: 2_000,
            fragment_absolute_cap_ms: 8_000,
            playlist_window: 3,
            vod: false,
            hooks: None,
        }
    }

    fn keyframe(dts: i64) -> MediaPacket {
        MediaPacket::video(dts, 0, CodecId::Avc, true, false, Bytes::from_static(&[0u8; 4]))
    }

    fn interframe(dts: i64) -> MediaPacket {
        MediaPacket::video(dts, 0, CodecId::Avc, false, false, Bytes::from_static(&[0u8; 4]))
    }

    #[tokio::test]
    async fn sliding_window_retains_only_the_latest_segments() {
        let dir = tempfile::tempdir().unwrap();
        let packager = HlsTsPackager::new(config(dir.path()));
        let identity = StreamIdentity::default_vhost("live", "a");
        let metadata = MetadataCache::new();
        packager.on_publish(&identity, &metadata).await;

        // Ten keyframe-aligned 2s segments with a window of 3 must slide.
        for i in 0..10 {
            packager.on_packet(&identity, &keyframe(i * 2_000)).await;
        }
        packager.on_unpublish(&identity).await;

        let state = packager.state.lock();
        assert!(state.window.len() <= 3, "window must bound live segment count to the configured size");
        let oldest = state.window.live().next().unwrap();
        assert!(oldest.sequence_number >= 2, "old segments must have slid out of the live window");
    }

    #[tokio::test]
    async fn fragment_cuts_on_absolute_cap_without_a_keyframe() {
        let dir = tempfile::tempdir().unwrap();
        let packager = HlsTsPackager::new(config(dir.path()));
        let identity = StreamIdentity::default_vhost("live", "a");
        let metadata = MetadataCache::new();
        packager.on_publish(&identity, &metadata).await;

        packager.on_packet(&identity, &keyframe(0)).await;
        // No further keyframe arrives; every subsequent frame is an
        // interframe, so only the absolute cap can force a cut.
        for dts in (500..10_000).step_by(500) {
            packager.on_packet(&identity, &interframe(dts)).await;
        }

        let state = packager.state.lock();
        assert!(state.window.len() >= 1, "absolute cap must force a cut even without a second keyframe");
    }
}
