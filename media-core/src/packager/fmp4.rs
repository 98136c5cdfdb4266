//! Fragmented Packager: CMAF-style fMP4 segments shared by HLS-fMP4 and
//! DASH-fMP4 egress (spec §4.5). Video and audio are written to separate
//! segment sequences (not muxed into one file) because DASH representations
//! are per-track: each track gets its own `init.mp4`, its own `<N>.m4s`
//! sequence, and its own `FragmentWindow`. The audio track's cuts are
//! aligned to the most recent video cut so players never have to stitch
//! segments whose boundaries disagree; an audio-only stream (no video track
//! at all) falls back to the same absolute-cap bound as video.

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
use crate::mux::boxes::{ftyp, BoxBuilder};
use crate::mux::write_atomic;
use crate::packager::{Packager, PackagerKind};
use crate::packet::{CodecId, MediaPacket};
use crate::playlist::codec::{audio_codec_string, video_codec_string};
use crate::playlist::{M3u8Writer, MpdTrack, MpdWriter};

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Fmp4Flavor {
    HlsFmp4,
    DashFmp4,
}

pub struct Fmp4Config {
    pub flavor: Fmp4Flavor,
    pub artifact_dir: PathBuf,
    pub target_duration_ms: i64,
    /// Hard cut bound (spec §4.4/§4.5): a track's fragment is closed once
    /// this many milliseconds have elapsed even without a keyframe, or (for
    /// audio) even without a video cut to align to.
    pub fragment_absolute_cap_ms: i64,
    pub window: usize,
    pub min_buffer_time_secs: f64,
    pub hooks: Option<Arc<HookWorker>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    fn label(self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
        }
    }
}

struct TrackState {
    window: FragmentWindow,
    buffer: Vec<u8>,
    segment_start_dts: Option<i64>,
    fragment_number: u32,
    /// Set by the video track on cut, consumed by the audio track on its
    /// next packet so the two sequences stay aligned (spec §4.5).
    aligned_cut_pending: bool,
}

impl TrackState {
    fn new(window_size: usize) -> Self {
        Self {
            window: FragmentWindow::new(window_size, 0, Duration::from_secs(30), true),
            buffer: Vec::new(),
            segment_start_dts: None,
            fragment_number: 0,
            aligned_cut_pending: false,
        }
    }
}

struct State {
    video: TrackState,
    audio: TrackState,
}

pub struct Fmp4Packager {
    config: Fmp4Config,
    state: Mutex<State>,
    next_video_sequence: AtomicU64,
    next_audio_sequence: AtomicU64,
}

impl Fmp4Packager {
    pub fn new(config: Fmp4Config) -> Self {
        let window = config.window;
        Self {
            state: Mutex::new(State {
                video: TrackState::new(window),
                audio: TrackState::new(window),
            }),
            config,
            next_video_sequence: AtomicU64::new(0),
            next_audio_sequence: AtomicU64::new(0),
        }
    }

    fn init_segment_name(&self, identity: &StreamIdentity, track: TrackKind) -> String {
        format!("{}-{}-init.mp4", identity.stream, track.label())
    }

    fn segment_name(&self, identity: &StreamIdentity, track: TrackKind, sequence: u64) -> String {
        format!("{}-{}-{}.m4s", identity.stream, track.label(), sequence)
    }

    async fn write_init_segment(&self, identity: &StreamIdentity, track: TrackKind) {
        let moov = build_minimal_moov();
        let mut data = Vec::new();
        data.extend_from_slice(&ftyp());
        data.extend_from_slice(&moov);
        let path = self.config.artifact_dir.join(self.init_segment_name(identity, track));
        if let Err(err) = write_atomic(&path, &data).await {
            tracing::warn!(error = %err, track = track.label(), "failed to write fMP4 init segment");
        }
    }

    async fn flush_track(&self, identity: &StreamIdentity, track: TrackKind) {
        let (sequence, start_dts, duration_ms, path, out) = {
            let mut state = self.state.lock();
            let track_state = match track {
                TrackKind::Video => &mut state.video,
                TrackKind::Audio => &mut state.audio,
            };
            if track_state.buffer.is_empty() {
                return;
            }
            let sequence = match track {
                TrackKind::Video => self.next_video_sequence.fetch_add(1, Ordering::SeqCst),
                TrackKind::Audio => self.next_audio_sequence.fetch_add(1, Ordering::SeqCst),
            };
            track_state.fragment_number += 1;
            let moof = build_moof(track_state.fragment_number, track_state.buffer.len() as u32);
            let mdat = BoxBuilder::new(b"mdat").put_bytes(&track_state.buffer).build();
            let mut out = Vec::with_capacity(moof.len() + mdat.len());
            out.extend_from_slice(&moof);
            out.extend_from_slice(&mdat);

            let start_dts = track_state.segment_start_dts.unwrap_or(0);
            let duration_ms = self.config.target_duration_ms;
            let path = self.config.artifact_dir.join(self.segment_name(identity, track, sequence));
            track_state.buffer.clear();
            track_state.segment_start_dts = None;
            (sequence, start_dts, duration_ms, path, out)
        };

        let size = out.len() as u64;
        if let Err(err) = write_atomic(&path, &out).await {
            tracing::warn!(error = %err, path = %path.display(), "failed to write fMP4 media segment");
            return;
        }

        let fragment = Fragment::new(sequence, path.clone(), start_dts, duration_ms, true, size);
        {
            let mut state = self.state.lock();
            match track {
                TrackKind::Video => {
                    state.video.window.push(fragment);
                    state.audio.aligned_cut_pending = true;
                }
                TrackKind::Audio => {
                    state.audio.window.push(fragment);
                }
            }
        }
        self.write_manifest(identity).await;

        if let Some(hooks) = &self.config.hooks {
            hooks.enqueue(HookPayload::on_hls(identity, path.to_string_lossy().into_owned()));
        }
    }

    async fn write_manifest(&self, identity: &StreamIdentity) {
        match self.config.flavor {
            Fmp4Flavor::HlsFmp4 => {
                let (video_playlist, audio_playlist) = {
                    let state = self.state.lock();
                    let video_writer = M3u8Writer {
                        target_duration_secs: (self.config.target_duration_ms / 1000).max(1) as u32,
                        media_sequence: state.video.window.live().next().map(|f| f.sequence_number).unwrap_or(0),
                        discontinuity_sequence: 0,
                        is_live: true,
                    };
                    let audio_writer = M3u8Writer {
                        target_duration_secs: (self.config.target_duration_ms / 1000).max(1) as u32,
                        media_sequence: state.audio.window.live().next().map(|f| f.sequence_number).unwrap_or(0),
                        discontinuity_sequence: 0,
                        is_live: true,
                    };
                    (
                        video_writer.render(state.video.window.live(), &[]),
                        audio_writer.render(state.audio.window.live(), &[]),
                    )
                };
                let video_path = self.config.artifact_dir.join("video.m3u8");
                let audio_path = self.config.artifact_dir.join("audio.m3u8");
                if let Err(err) = write_atomic(&video_path, video_playlist.as_bytes()).await {
                    tracing::warn!(error = %err, "failed to write HLS-fMP4 video playlist");
                }
                if let Err(err) = write_atomic(&audio_path, audio_playlist.as_bytes()).await {
                    tracing::warn!(error = %err, "failed to write HLS-fMP4 audio playlist");
                }
                let master = M3u8Writer::render_master(&[
                    ("video.m3u8".to_string(), 0, None),
                    ("audio.m3u8".to_string(), 0, None),
                ]);
                let master_path = self.config.artifact_dir.join("index.m3u8");
                if let Err(err) = write_atomic(&master_path, master.as_bytes()).await {
                    tracing::warn!(error = %err, "failed to write HLS-fMP4 master playlist");
                }
            }
            Fmp4Flavor::DashFmp4 => {
                let rendered = {
                    let state = self.state.lock();
                    let writer = MpdWriter::new(self.config.min_buffer_time_secs);
                    writer.render(vec![
                        MpdTrack {
                            mime_type: "video/mp4",
                            codecs: video_codec_string(CodecId::Avc, None, None).unwrap_or_default(),
                            init_segment_url: self.init_segment_name(identity, TrackKind::Video),
                            fragments: Box::new(state.video.window.live()),
                        },
                        MpdTrack {
                            mime_type: "audio/mp4",
                            codecs: audio_codec_string(CodecId::Aac).unwrap_or_default().to_string(),
                            init_segment_url: self.init_segment_name(identity, TrackKind::Audio),
                            fragments: Box::new(state.audio.window.live()),
                        },
                    ])
                };
                let path = self.config.artifact_dir.join("manifest.mpd");
                if let Err(err) = write_atomic(&path, rendered.as_bytes()).await {
                    tracing::warn!(error = %err, "failed to write DASH manifest");
                }
            }
        }
    }
}

fn build_minimal_moov() -> bytes::Bytes {
    let mvhd = BoxBuilder::new(b"mvhd").put_u32(0).put_u32(0).put_u32(1000).put_u32(0).build();
    let mvex = BoxBuilder::new(b"mvex").build();
    BoxBuilder::new(b"moov").child(mvhd).child(mvex).build()
}

fn build_moof(sequence_number: u32, sample_size: u32) -> bytes::Bytes {
    let mfhd = BoxBuilder::new(b"mfhd").put_u32(0).put_u32(sequence_number).build();
    let tfhd = BoxBuilder::new(b"tfhd").put_u32(0).put_u32(1).build();
    let tfdt = BoxBuilder::new(b"tfdt").put_u32(0).put_u32(0).build();
    let trun = BoxBuilder::new(b"trun").put_u32(0x201).put_u32(1).put_u32(8).put_u32(sample_size).build();
    let traf = BoxBuilder::new(b"traf").child(tfhd).child(tfdt).child(trun).build();
    BoxBuilder::new(b"moof").child(mfhd).child(traf).build()
}

#[async_trait]
impl Packager for Fmp4Packager {
    fn kind(&self) -> PackagerKind {
        match self.config.flavor {
            Fmp4Flavor::HlsFmp4 => PackagerKind::HlsFmp4,
            Fmp4Flavor::DashFmp4 => PackagerKind::DashFmp4,
        }
    }

    async fn on_publish(&self, identity: &StreamIdentity, _metadata: &MetadataCache) {
        if let Err(err) = tokio::fs::create_dir_all(&self.config.artifact_dir).await {
            tracing::warn!(error = %err, %identity, "failed to create fMP4 artifact directory");
        }
        self.write_init_segment(identity, TrackKind::Video).await;
        self.write_init_segment(identity, TrackKind::Audio).await;
        debug!(%identity, flavor = ?self.kind(), "fMP4 packager publishing");
    }

    async fn on_unpublish(&self, identity: &StreamIdentity) {
        self.flush_track(identity, TrackKind::Video).await;
        self.flush_track(identity, TrackKind::Audio).await;
    }

    async fn on_packet(&self, identity: &StreamIdentity, packet: &MediaPacket) {
        if packet.is_video() {
            let should_cut = {
                let mut state = self.state.lock();
                let track = &mut state.video;
                if track.segment_start_dts.is_none() {
                    track.segment_start_dts = Some(packet.dts);
                }
                track.buffer.extend_from_slice(&packet.payload);
                let span = packet.dts - track.segment_start_dts.unwrap_or(packet.dts);
                let keyframe_boundary = packet.is_keyframe && span >= self.config.target_duration_ms;
                let absolute_cap = self.config.fragment_absolute_cap_ms > 0 && span >= self.config.fragment_absolute_cap_ms;
                keyframe_boundary || absolute_cap
            };
            if should_cut {
                self.flush_track(identity, TrackKind::Video).await;
            }
        } else if packet.is_audio() {
            let should_cut = {
                let mut state = self.state.lock();
                let track = &mut state.audio;
                if track.segment_start_dts.is_none() {
                    track.segment_start_dts = Some(packet.dts);
                }
                track.buffer.extend_from_slice(&packet.payload);
                let span = packet.dts - track.segment_start_dts.unwrap_or(packet.dts);
                let aligned_to_video = std::mem::take(&mut track.aligned_cut_pending);
                let absolute_cap = self.config.fragment_absolute_cap_ms > 0 && span >= self.config.fragment_absolute_cap_ms;
                aligned_to_video || absolute_cap
            };
            if should_cut {
                self.flush_track(identity, TrackKind::Audio).await;
            }
        }
    }

    async fn cycle(&self, _identity: &StreamIdentity) {
        let mut state = self.state.lock();
        state.video.window.reap();
        state.audio.window.reap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::CodecId;
    use bytes::Bytes;

    fn config(dir: &std::path::Path) -> Fmp4Config {
        Fmp4Config {
            flavor: Fmp4Flavor::HlsFmp4,
            artifact_dir: dir.to_path_buf(),
            target_duration_ms: 2_000,
            fragment_absolute_cap_ms: 8_000,
            window: 3,
            min_buffer_time_secs: 12.0,
            hooks: None,
        }
    }

    fn keyframe(dts: i64) -> MediaPacket {
        MediaPacket::video(dts, 0, CodecId::Avc, true, false, Bytes::from_static(&[0u8; 4]))
    }

    fn audio(dts: i64) -> MediaPacket {
        MediaPacket::audio(dts, CodecId::Aac, false, Bytes::from_static(&[0u8; 2]))
    }

    #[tokio::test]
    async fn video_and_audio_use_independent_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let packager = Fmp4Packager::new(config(dir.path()));
        let identity = StreamIdentity::default_vhost("live", "a");
        let metadata = MetadataCache::new();
        packager.on_publish(&identity, &metadata).await;

        packager.on_packet(&identity, &keyframe(0)).await;
        packager.on_packet(&identity, &audio(0)).await;
        packager.on_packet(&identity, &keyframe(2_000)).await; // cuts video

        let state = packager.state.lock();
        assert_eq!(state.video.window.len(), 1, "video cut must not depend on audio packets");
        assert!(state.audio.aligned_cut_pending, "video cut must arm the audio alignment flag");
    }

    #[tokio::test]
    async fn audio_cut_aligns_to_the_most_recent_video_cut() {
        let dir = tempfile::tempdir().unwrap();
        let packager = Fmp4Packager::new(config(dir.path()));
        let identity = StreamIdentity::default_vhost("live", "a");
        let metadata = MetadataCache::new();
        packager.on_publish(&identity, &metadata).await;

        packager.on_packet(&identity, &keyframe(0)).await;
        packager.on_packet(&identity, &audio(0)).await;
        packager.on_packet(&identity, &keyframe(2_000)).await; // cuts video, arms audio
        packager.on_packet(&identity, &audio(100)).await; // must cut immediately, not at its own 2s mark

        let state = packager.state.lock();
        assert_eq!(state.audio.window.len(), 1, "audio must cut as soon as a video cut landed");
        assert!(!state.audio.aligned_cut_pending);
    }

    #[tokio::test]
    async fn audio_only_stream_falls_back_to_the_absolute_cap() {
        let dir = tempfile::tempdir().unwrap();
        let packager = Fmp4Packager::new(config(dir.path()));
        let identity = StreamIdentity::default_vhost("live", "a");
        let metadata = MetadataCache::new();
        packager.on_publish(&identity, &metadata).await;

        for dts in (0..10_000).step_by(500) {
            packager.on_packet(&identity, &audio(dts)).await;
        }

        let state = packager.state.lock();
        assert!(state.audio.window.len() >= 1, "an audio-only stream must still cut via the absolute cap");
    }
}
