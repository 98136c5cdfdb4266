//! HLS/DASH codec string generation for manifest `CODECS=`/`codecs=`
//! attributes.

use crate::packet::CodecId;

pub fn video_codec_string(codec_id: CodecId, profile: Option<u8>, level: Option<u8>) -> Option<String> {
    match codec_id {
        CodecId::Avc => Some(avc_codec_string(profile.unwrap_or(0x64), level.unwrap_or(0x28))),
        CodecId::Hevc => Some("hvc1.1.6.L93.B0".to_string()),
        _ => None,
    }
}

pub fn audio_codec_string(codec_id: CodecId) -> Option<&'static str> {
    match codec_id {
        CodecId::Aac => Some("mp4a.40.2"),
        CodecId::Opus => Some("opus"),
        _ => None,
    }
}

pub fn avc_codec_string(profile_byte: u8, level_byte: u8) -> String {
    format!("avc1.{:02x}00{:02x}", profile_byte, level_byte)
}

pub fn build_codec_attribute(video: Option<CodecId>, audio: Option<CodecId>) -> Option<String> {
    let mut codecs = Vec::new();
    if let Some(v) = video.and_then(|v| video_codec_string(v, None, None)) {
        codecs.push(v);
    }
    if let Some(a) = audio.and_then(audio_codec_string) {
        codecs.push(a.to_string());
    }
    if codecs.is_empty() {
        None
    } else {
        Some(codecs.join(","))
    }
}
