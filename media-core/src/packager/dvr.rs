//! Continuous Packager: DVR recording to a single growing FLV or MP4 file
//! per publish session (spec §4.6). Unlike the segmented/fragmented
//! packagers there is no sliding window — the whole session is one
//! artifact, closed and duration-backpatched on unpublish.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::hooks::{HookPayload, HookWorker};
use crate::identity::StreamIdentity;
use crate::metadata::MetadataCache;
use crate::mux::flv;
use crate::mux::write_atomic;
use crate::packager::{Packager, PackagerKind};
use crate::packet::MediaPacket;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum DvrContainer {
    Flv,
    Mp4,
}

pub struct DvrConfig {
    pub container: DvrContainer,
    pub artifact_dir: PathBuf,
    /// Optional: cut a new session file every N seconds instead of one
    /// file per publish (spec §4.6 "session/segment plan").
    pub segment_by_duration_ms: Option<i64>,
    pub hooks: Option<Arc<HookWorker>>,
}

struct State {
    buffer: Vec<u8>,
    session_start_dts: Option<i64>,
    last_dts: i64,
    /// Byte offsets of the `onMetaData` tag's `duration`/`filesize` AMF0
    /// values within `buffer`, set when the FLV session starts so
    /// `close_session` can backpatch them in place.
    metadata_offsets: Option<(usize, usize)>,
}

pub struct DvrPackager {
    config: DvrConfig,
    state: Mutex<State>,
    next_session: AtomicU64,
}

impl DvrPackager {
    pub fn new(config: DvrConfig) -> Self {
        Self {
            state: Mutex::new(State {
                buffer: Vec::new(),
                session_start_dts: None,
                last_dts: 0,
                metadata_offsets: None,
            }),
            config,
            next_session: AtomicU64::new(0),
        }
    }

    fn extension(&self) -> &'static str {
        match self.config.container {
            DvrContainer::Flv => "flv",
            DvrContainer::Mp4 => "mp4",
        }
    }

    fn start_session(&self, state: &mut State) {
        state.buffer.clear();
        state.session_start_dts = None;
        state.metadata_offsets = None;
        if self.config.container == DvrContainer::Flv {
            state.buffer.extend_from_slice(&flv::file_header());
            let tag_offset = state.buffer.len();
            let tag = flv::metadata_tag(0.0, 0);
            state.buffer.extend_from_slice(&tag.bytes);
            state.metadata_offsets = Some((tag_offset + tag.duration_offset, tag_offset + tag.filesize_offset));
        }
    }

    async fn close_session(&self, identity: &StreamIdentity) {
        let (mut bytes, path, duration_ms, metadata_offsets) = {
            let mut state = self.state.lock();
            if state.buffer.is_empty() {
                return;
            }
            let start = state.session_start_dts.unwrap_or(0);
            let duration_ms = (state.last_dts - start).max(0);
            let session = self.next_session.fetch_add(1, Ordering::SeqCst);
            let path = self.config.artifact_dir.join(format!("session-{session}.{}", self.extension()));
            let bytes = std::mem::take(&mut state.buffer);
            let metadata_offsets = state.metadata_offsets.take();
            state.session_start_dts = None;
            (bytes, path, duration_ms, metadata_offsets)
        };

        if let Some((duration_offset, filesize_offset)) = metadata_offsets {
            let duration_secs = duration_ms as f64 / 1000.0;
            flv::patch_f64(&mut bytes, duration_offset, duration_secs);
            flv::patch_f64(&mut bytes, filesize_offset, bytes.len() as f64);
        }

        if let Err(err) = write_atomic(&path, &bytes).await {
            warn!(error = %err, path = %path.display(), "failed to write DVR session artifact");
            return;
        }
        debug!(path = %path.display(), duration_ms, "DVR session closed");

        if let Some(hooks) = &self.config.hooks {
            hooks.enqueue(HookPayload::on_dvr(identity, path.to_string_lossy().into_owned(), duration_ms as f64 / 1000.0));
        }
    }
}

#[async_trait]
impl Packager for DvrPackager {
    fn kind(&self) -> PackagerKind {
        match self.config.container {
            DvrContainer::Flv => PackagerKind::DvrFlv,
            DvrContainer::Mp4 => PackagerKind::DvrMp4,
        }
    }

    async fn on_publish(&self, identity: &StreamIdentity, _metadata: &MetadataCache) {
        if let Err(err) = tokio::fs::create_dir_all(&self.config.artifact_dir).await {
            warn!(error = %err, %identity, "failed to create DVR artifact directory");
        }
        let mut state = self.state.lock();
        self.start_session(&mut state);
        debug!(%identity, container = ?self.kind(), "DVR packager publishing");
    }

    async fn on_unpublish(&self, identity: &StreamIdentity) {
        self.close_session(identity).await;
    }

    async fn on_packet(&self, identity: &StreamIdentity, packet: &MediaPacket) {
        let should_cut = {
            let mut state = self.state.lock();
            if state.session_start_dts.is_none() {
                state.session_start_dts = Some(packet.dts);
            }
            state.last_dts = packet.dts;
            match self.config.container {
                DvrContainer::Flv => {
                    state.buffer.extend_from_slice(&flv::write_tag(packet));
                }
                DvrContainer::Mp4 => {
                    // Progressive moov-at-end MP4: samples are appended raw
                    // and the full box tree is built once, at close.
                    state.buffer.extend_from_slice(&packet.payload);
                }
            }

            match self.config.segment_by_duration_ms {
                Some(limit) if packet.is_video() && packet.is_keyframe => {
                    (state.last_dts - state.session_start_dts.unwrap_or(state.last_dts)) >= limit
                }
                _ => false,
            }
        };

        if should_cut {
            self.close_session(identity).await;
            let mut state = self.state.lock();
            self.start_session(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::CodecId;
    use bytes::Bytes;

    fn config(dir: &std::path::Path) -> DvrConfig {
        DvrConfig {
            container: DvrContainer::Flv,
            artifact_dir: dir.to_path_buf(),
            segment_by_duration_ms: None,
            hooks: None,
        }
    }

    fn video(dts: i64, keyframe: bool) -> MediaPacket {
        MediaPacket::video(dts, 0, CodecId::Avc, keyframe, false, Bytes::from_static(&[0u8; 8]))
    }

    #[tokio::test]
    async fn onmetadata_duration_and_filesize_are_backpatched_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let packager = DvrPackager::new(config(dir.path()));
        let identity = StreamIdentity::default_vhost("live", "a");
        let metadata = MetadataCache::new();
        packager.on_publish(&identity, &metadata).await;

        packager.on_packet(&identity, &video(0, true)).await;
        packager.on_packet(&identity, &video(5_000, true)).await;
        packager.on_unpublish(&identity).await;

        let path = dir.path().join("session-0.flv");
        let bytes = tokio::fs::read(&path).await.unwrap();
        let on_disk_size = bytes.len() as u64;

        // Locate the onMetaData tag's duration/filesize the same way the
        // packager does: right after the 13-byte file header.
        let tag = flv::metadata_tag(0.0, 0);
        let duration = f64::from_be_bytes(bytes[tag.duration_offset..tag.duration_offset + 8].try_into().unwrap());
        let filesize = f64::from_be_bytes(bytes[tag.filesize_offset..tag.filesize_offset + 8].try_into().unwrap());

        assert!((duration - 5.000).abs() <= 0.050, "duration {duration} must be within 50ms of 5.000s");
        assert_eq!(filesize, on_disk_size as f64);
    }

    #[tokio::test]
    async fn empty_mp4_session_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.container = DvrContainer::Mp4;
        let packager = DvrPackager::new(cfg);
        let identity = StreamIdentity::default_vhost("live", "a");
        let metadata = MetadataCache::new();
        packager.on_publish(&identity, &metadata).await;
        packager.on_unpublish(&identity).await;

        assert!(!dir.path().join("session-0.mp4").exists());
    }

    #[tokio::test]
    async fn duration_based_segmentation_starts_a_fresh_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.segment_by_duration_ms = Some(4_000);
        let packager = DvrPackager::new(cfg);
        let identity = StreamIdentity::default_vhost("live", "a");
        let metadata = MetadataCache::new();
        packager.on_publish(&identity, &metadata).await;

        packager.on_packet(&identity, &video(0, true)).await;
        packager.on_packet(&identity, &video(5_000, true)).await; // cuts session 0
        packager.on_unpublish(&identity).await; // closes session 1

        assert!(dir.path().join("session-0.flv").exists());
        assert!(dir.path().join("session-1.flv").exists());
    }
}
