//! Metadata cache: latest script tag plus latest audio/video sequence
//! headers, each slot keeping the current and previous generation so a
//! packager that missed an update still sees a consistent pair.

use crate::packet::MediaPacket;

/// A slot holding at most two generations of a packet: `current` and the
/// generation that preceded it.
#[derive(Debug, Clone, Default)]
struct Generation {
    current: Option<MediaPacket>,
    previous: Option<MediaPacket>,
}

impl Generation {
    fn update(&mut self, packet: MediaPacket) {
        self.previous = self.current.take();
        self.current = Some(packet);
    }

    fn clear(&mut self) {
        self.current = None;
        self.previous = None;
    }
}

/// Three slots: script metadata, video sequence header, audio sequence
/// header. Updated by `Source::on_packet` and read by packagers and by
/// `Consumer::create_consumer`'s warm start.
#[derive(Debug, Clone, Default)]
pub struct MetadataCache {
    script: Generation,
    video_sh: Generation,
    audio_sh: Generation,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_script(&mut self, packet: MediaPacket) {
        self.script.update(packet);
    }

    pub fn update_video_sh(&mut self, packet: MediaPacket) {
        self.video_sh.update(packet);
    }

    pub fn update_audio_sh(&mut self, packet: MediaPacket) {
        self.audio_sh.update(packet);
    }

    pub fn script(&self) -> Option<&MediaPacket> {
        self.script.current.as_ref()
    }

    pub fn video_sh(&self) -> Option<&MediaPacket> {
        self.video_sh.current.as_ref()
    }

    pub fn audio_sh(&self) -> Option<&MediaPacket> {
        self.audio_sh.current.as_ref()
    }

    pub fn previous_video_sh(&self) -> Option<&MediaPacket> {
        self.video_sh.previous.as_ref()
    }

    pub fn previous_audio_sh(&self) -> Option<&MediaPacket> {
        self.audio_sh.previous.as_ref()
    }

    /// Whether the video sequence header changed since the last time this
    /// was asked, compared against a previously observed packet (by decode
    /// timestamp, since sequence headers are immutable once constructed).
    /// Used by the segmented packager to decide whether a new fragment
    /// needs an `#EXT-X-DISCONTINUITY` marker.
    pub fn video_sh_changed_since(&self, last_seen_dts: Option<i64>) -> bool {
        match (self.video_sh(), last_seen_dts) {
            (Some(sh), Some(last)) => sh.dts != last,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Reset on republish (spec §4.2 `on_publish`: "resets metadata and GOP
    /// caches").
    pub fn clear(&mut self) {
        self.script.clear();
        self.video_sh.clear();
        self.audio_sh.clear();
    }

    /// Warm-start dump honoring the three-flag policy from spec §4.2:
    /// dump metadata / sequence headers independently.
    pub fn warm_start(&self, dump_metadata: bool, dump_sequence_headers: bool) -> Vec<MediaPacket> {
        let mut out = Vec::new();
        if dump_sequence_headers {
            if let Some(sh) = self.video_sh() {
                out.push(sh.clone());
            }
            if let Some(sh) = self.audio_sh() {
                out.push(sh.clone());
            }
        }
        if dump_metadata {
            if let Some(m) = self.script() {
                out.push(m.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::CodecId;
    use bytes::Bytes;

    fn sh(dts: i64) -> MediaPacket {
        MediaPacket::video(dts, 0, CodecId::Avc, false, true, Bytes::new())
    }

    #[test]
    fn keeps_current_and_previous_generation() {
        let mut cache = MetadataCache::new();
        cache.update_video_sh(sh(1));
        cache.update_video_sh(sh(2));
        assert_eq!(cache.video_sh().unwrap().dts, 2);
        assert_eq!(cache.previous_video_sh().unwrap().dts, 1);
    }

    #[test]
    fn clear_drops_both_generations() {
        let mut cache = MetadataCache::new();
        cache.update_video_sh(sh(1));
        cache.clear();
        assert!(cache.video_sh().is_none());
        assert!(cache.previous_video_sh().is_none());
    }

    #[test]
    fn warm_start_respects_flags() {
        let mut cache = MetadataCache::new();
        cache.update_video_sh(sh(1));
        assert!(cache.warm_start(false, false).is_empty());
        assert_eq!(cache.warm_start(false, true).len(), 1);
    }
}
