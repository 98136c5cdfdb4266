//! The immutable media packet that flows from ingress through the Source
//! to every consumer and packager.

use bytes::Bytes;

/// Coarse packet type, matching spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Audio,
    Video,
    /// A script/metadata tag (e.g. RTMP `onMetaData`).
    Script,
}

/// Codec identifier. Kept as an open-ended small set rather than an enum
/// with a `Other` fallback for each container's private registry, since
/// packagers only ever branch on the handful of codecs they can repackage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    Avc,
    Hevc,
    Aac,
    Opus,
    Unknown(u8),
}

/// An immutable media packet. Cheap to clone: the payload is reference
/// counted, so cloning a `MediaPacket` never copies encoded bytes.
///
/// Lifecycle (spec §3): created by ingress, passed by shared reference into
/// `Source::on_packet`, retained briefly in the GOP cache and consumer
/// queues, and released when the last holder drops it.
#[derive(Debug, Clone)]
pub struct MediaPacket {
    pub kind: PacketType,
    /// Decode timestamp, milliseconds, monotonic per stream.
    pub dts: i64,
    /// Composition offset; `pts = dts + cts`.
    pub cts: i32,
    pub codec_id: CodecId,
    /// `true` for an AVC/HEVC `SPS`/`PPS` or an AAC `AudioSpecificConfig`.
    pub is_sequence_header: bool,
    /// `true` only for a video packet that starts a new GOP.
    pub is_keyframe: bool,
    pub payload: Bytes,
}

impl MediaPacket {
    pub fn pts(&self) -> i64 {
        self.dts + self.cts as i64
    }

    pub fn is_video(&self) -> bool {
        matches!(self.kind, PacketType::Video)
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.kind, PacketType::Audio)
    }

    pub fn is_script(&self) -> bool {
        matches!(self.kind, PacketType::Script)
    }

    /// Construct a video packet.
    pub fn video(dts: i64, cts: i32, codec_id: CodecId, is_keyframe: bool, is_sequence_header: bool, payload: Bytes) -> Self {
        Self {
            kind: PacketType::Video,
            dts,
            cts,
            codec_id,
            is_sequence_header,
            is_keyframe,
            payload,
        }
    }

    /// Construct an audio packet. Audio has no keyframe concept.
    pub fn audio(dts: i64, codec_id: CodecId, is_sequence_header: bool, payload: Bytes) -> Self {
        Self {
            kind: PacketType::Audio,
            dts,
            cts: 0,
            codec_id,
            is_sequence_header,
            is_keyframe: false,
            payload,
        }
    }

    /// Construct a script/metadata tag.
    pub fn script(dts: i64, payload: Bytes) -> Self {
        Self {
            kind: PacketType::Script,
            dts,
            cts: 0,
            codec_id: CodecId::Unknown(0),
            is_sequence_header: false,
            is_keyframe: false,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_is_dts_plus_cts() {
        let p = MediaPacket::video(1000, 40, CodecId::Avc, true, false, Bytes::new());
        assert_eq!(p.pts(), 1040);
    }

    #[test]
    fn script_tags_are_never_keyframes() {
        let p = MediaPacket::script(0, Bytes::from_static(b"onMetaData"));
        assert!(!p.is_keyframe);
        assert!(p.is_script());
    }
}
