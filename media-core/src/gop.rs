//! GOP cache: the packets since the most recent video keyframe, used to
//! warm-start newly joined consumers without waiting for the next keyframe.
//!
//! Grounded on `SrsGopCache` (`srs_app_rtmp_source.hpp`): besides the
//! optional frame-count bound, the original also caps consecutive
//! audio-only packets trailing the last video frame, so a stream that loses
//! its video track doesn't grow the cache without bound. That cap is kept
//! here as `trailing_audio_cap`.

use crate::packet::MediaPacket;

/// Ordered list of packets from the most recent video keyframe up to the
/// latest packet. Invariant: if non-empty and the stream has video, the
/// first entry is a video keyframe (spec §3, §8 invariant).
#[derive(Debug, Clone)]
pub struct GopCache {
    enabled: bool,
    packets: Vec<MediaPacket>,
    /// Optional bound on total cached frames, to protect against
    /// keyframe-less streams (spec §3).
    max_frames: Option<usize>,
    /// Cap on consecutive audio packets appended after the last video
    /// packet; once hit, further pure-audio packets are dropped from the
    /// cache (they are still forwarded live) rather than growing it
    /// unbounded on an audio-only or keyframe-less stream.
    trailing_audio_cap: usize,
    video_count: usize,
    audio_after_last_video_count: usize,
    saw_video: bool,
}

impl Default for GopCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GopCache {
    pub fn new() -> Self {
        Self {
            enabled: true,
            packets: Vec::new(),
            max_frames: None,
            trailing_audio_cap: 256,
            video_count: 0,
            audio_after_last_video_count: 0,
            saw_video: false,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.clear();
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_max_frames(&mut self, max_frames: Option<usize>) {
        self.max_frames = max_frames;
    }

    /// Append a packet, clearing the cache first if this is a video
    /// keyframe (spec §4.2 `on_packet` step 3).
    pub fn cache(&mut self, packet: &MediaPacket) {
        if !self.enabled {
            return;
        }
        if packet.is_video() {
            if packet.is_keyframe {
                self.clear();
                self.saw_video = true;
            } else if !self.saw_video {
                // No keyframe observed yet: nothing to anchor a GOP to.
                return;
            }
            if let Some(max) = self.max_frames {
                if self.video_count >= max {
                    return;
                }
            }
            self.packets.push(packet.clone());
            self.video_count += 1;
            self.audio_after_last_video_count = 0;
        } else if packet.is_audio() {
            if !self.saw_video && packet.is_sequence_header {
                // Always keep the audio sequence header even pre-keyframe;
                // it is cheap and consumers need it immediately.
                self.packets.push(packet.clone());
                return;
            }
            if !self.saw_video {
                return;
            }
            if self.audio_after_last_video_count >= self.trailing_audio_cap {
                return;
            }
            self.packets.push(packet.clone());
            self.audio_after_last_video_count += 1;
        }
    }

    pub fn clear(&mut self) {
        self.packets.clear();
        self.video_count = 0;
        self.audio_after_last_video_count = 0;
        self.saw_video = false;
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn packets(&self) -> &[MediaPacket] {
        &self.packets
    }

    /// Timestamp of the first cached packet, if any (the GOP's start time).
    pub fn start_dts(&self) -> Option<i64> {
        self.packets.first().map(|p| p.dts)
    }

    /// `true` if no video packet has been cached at all (pure-audio stream).
    pub fn pure_audio(&self) -> bool {
        !self.saw_video
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::CodecId;
    use bytes::Bytes;

    fn video(dts: i64, keyframe: bool) -> MediaPacket {
        MediaPacket::video(dts, 0, CodecId::Avc, keyframe, false, Bytes::new())
    }

    fn audio(dts: i64) -> MediaPacket {
        MediaPacket::audio(dts, CodecId::Aac, false, Bytes::new())
    }

    #[test]
    fn first_entry_is_always_a_keyframe() {
        let mut gop = GopCache::new();
        gop.cache(&video(0, false)); // dropped: no keyframe seen yet
        assert!(gop.is_empty());
        gop.cache(&video(10, true));
        gop.cache(&audio(15));
        gop.cache(&video(20, false));
        assert!(gop.packets()[0].is_keyframe);
        assert_eq!(gop.packets().len(), 3);
    }

    #[test]
    fn keyframe_clears_previous_gop() {
        let mut gop = GopCache::new();
        gop.cache(&video(0, true));
        gop.cache(&video(10, false));
        gop.cache(&video(20, true));
        assert_eq!(gop.packets().len(), 1);
        assert_eq!(gop.packets()[0].dts, 20);
    }

    #[test]
    fn max_frames_bounds_video_count() {
        let mut gop = GopCache::new();
        gop.set_max_frames(Some(2));
        gop.cache(&video(0, true));
        gop.cache(&video(10, false));
        gop.cache(&video(20, false)); // dropped: over budget
        assert_eq!(gop.packets().len(), 2);
    }

    #[test]
    fn trailing_audio_is_capped() {
        let mut gop = GopCache::new();
        gop.trailing_audio_cap = 2;
        gop.cache(&video(0, true));
        gop.cache(&audio(1));
        gop.cache(&audio(2));
        gop.cache(&audio(3)); // dropped
        assert_eq!(gop.packets().len(), 3);
    }

    #[test]
    fn disabling_clears_cache() {
        let mut gop = GopCache::new();
        gop.cache(&video(0, true));
        gop.set_enabled(false);
        assert!(gop.is_empty());
        gop.cache(&video(10, true));
        assert!(gop.is_empty());
    }
}
