//! FLV tag writer for the Continuous (DVR) packager's `.flv` container
//! choice.

use bytes::{BufMut, Bytes, BytesMut};

use crate::packet::{MediaPacket, PacketType};

const FLV_TAG_TYPE_AUDIO: u8 = 8;
const FLV_TAG_TYPE_VIDEO: u8 = 9;
const FLV_TAG_TYPE_SCRIPT: u8 = 18;

/// The 9-byte file header plus the 4-byte zero `PreviousTagSize0`, written
/// exactly once per DVR session.
pub fn file_header() -> Bytes {
    let mut buf = BytesMut::with_capacity(13);
    buf.put_slice(b"FLV");
    buf.put_u8(1); // version
    buf.put_u8(0x05); // audio + video present
    buf.put_u32(9); // header size
    buf.put_u32(0); // PreviousTagSize0
    buf.freeze()
}

/// One FLV tag for `packet`, including its trailing `PreviousTagSize`
/// field so tags can be concatenated directly.
pub fn write_tag(packet: &MediaPacket) -> Bytes {
    let (tag_type, body) = encode_body(packet);
    let data_size = body.len() as u32;
    let timestamp = packet.dts.max(0) as u32;

    let mut buf = BytesMut::with_capacity(11 + body.len() + 4);
    buf.put_u8(tag_type);
    buf.put_uint(data_size as u64, 3);
    buf.put_uint(timestamp as u64, 3);
    buf.put_u8(((timestamp >> 24) & 0xFF) as u8); // timestamp extended
    buf.put_uint(0, 3); // stream id, always 0
    buf.put_slice(&body);
    buf.put_u32(11 + data_size);
    buf.freeze()
}

fn encode_body(packet: &MediaPacket) -> (u8, Bytes) {
    match packet.kind {
        PacketType::Video => (FLV_TAG_TYPE_VIDEO, encode_video_body(packet)),
        PacketType::Audio => (FLV_TAG_TYPE_AUDIO, encode_audio_body(packet)),
        PacketType::Script => (FLV_TAG_TYPE_SCRIPT, packet.payload.clone()),
    }
}

fn encode_video_body(packet: &MediaPacket) -> Bytes {
    let frame_type: u8 = if packet.is_keyframe { 1 } else { 2 };
    let codec_id: u8 = 7; // AVC; HEVC streams use the enhanced-FLV ex-header in a real deployment
    let packet_type: u8 = if packet.is_sequence_header { 0 } else { 1 };

    let mut buf = BytesMut::with_capacity(5 + packet.payload.len());
    buf.put_u8((frame_type << 4) | codec_id);
    buf.put_u8(packet_type);
    buf.put_uint(packet.cts.max(0) as u64, 3); // composition time
    buf.put_slice(&packet.payload);
    buf.freeze()
}

fn encode_audio_body(packet: &MediaPacket) -> Bytes {
    let sound_format: u8 = 10; // AAC
    let packet_type: u8 = if packet.is_sequence_header { 0 } else { 1 };

    let mut buf = BytesMut::with_capacity(2 + packet.payload.len());
    buf.put_u8((sound_format << 4) | (3 << 2) | (1 << 1) | 1); // 44kHz/16-bit/stereo flags, format carries real rate
    buf.put_u8(packet_type);
    buf.put_slice(&packet.payload);
    buf.freeze()
}

/// An `onMetaData` script tag plus the byte offsets of its `duration` and
/// `filesize` AMF0 number values within `bytes`, so the packager can
/// backpatch them in place once the session's final values are known
/// (spec §4.6) without re-encoding the whole tag.
pub struct MetadataTag {
    pub bytes: Bytes,
    pub duration_offset: usize,
    pub filesize_offset: usize,
}

/// Build an `onMetaData` AMF0 script tag carrying `duration` (seconds) and
/// `filesize` (bytes). Written once per session, immediately after the file
/// header, with placeholder values that get backpatched on close.
pub fn metadata_tag(duration_secs: f64, filesize: u64) -> MetadataTag {
    let mut body = BytesMut::new();
    body.put_u8(0x02); // AMF0 string marker
    body.put_u16(10);
    body.put_slice(b"onMetaData");

    body.put_u8(0x08); // AMF0 ECMA array marker
    body.put_u32(2); // property count

    body.put_u16(8);
    body.put_slice(b"duration");
    body.put_u8(0x00); // AMF0 number marker
    let duration_offset_in_body = body.len();
    body.put_f64(duration_secs);

    body.put_u16(8);
    body.put_slice(b"filesize");
    body.put_u8(0x00);
    let filesize_offset_in_body = body.len();
    body.put_f64(filesize as f64);

    body.put_u8(0); // object-end marker: empty key...
    body.put_u8(0);
    body.put_u8(9); // ...and the end-of-object type byte

    let data_size = body.len() as u32;
    let mut buf = BytesMut::with_capacity(11 + body.len() + 4);
    buf.put_u8(FLV_TAG_TYPE_SCRIPT);
    buf.put_uint(data_size as u64, 3);
    buf.put_uint(0, 3); // timestamp
    buf.put_u8(0); // timestamp extended
    buf.put_uint(0, 3); // stream id
    let header_len = buf.len();
    buf.put_slice(&body);
    buf.put_u32(11 + data_size);

    MetadataTag {
        bytes: buf.freeze(),
        duration_offset: header_len + duration_offset_in_body,
        filesize_offset: header_len + filesize_offset_in_body,
    }
}

/// Overwrite the big-endian f64 at `offset` within an already-written
/// buffer. Used to backpatch `onMetaData`'s `duration`/`filesize` once the
/// session closes, without touching any byte outside that 8-byte span.
pub fn patch_f64(buffer: &mut [u8], offset: usize, value: f64) {
    buffer[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::CodecId;
    use bytes::Bytes as BytesT;

    #[test]
    fn file_header_is_13_bytes_with_flv_signature() {
        let header = file_header();
        assert_eq!(header.len(), 13);
        assert_eq!(&header[0..3], b"FLV");
    }

    #[test]
    fn tag_size_trailer_matches_tag_body() {
        let packet = MediaPacket::video(1000, 0, CodecId::Avc, true, false, BytesT::from_static(b"nalu"));
        let tag = write_tag(&packet);
        let data_size = u32::from_be_bytes([0, tag[1], tag[2], tag[3]]);
        let trailer = u32::from_be_bytes([tag[tag.len() - 4], tag[tag.len() - 3], tag[tag.len() - 2], tag[tag.len() - 1]]);
        assert_eq!(trailer, 11 + data_size);
    }

    #[test]
    fn keyframe_sets_frame_type_one() {
        let packet = MediaPacket::video(0, 0, CodecId::Avc, true, false, BytesT::new());
        let tag = write_tag(&packet);
        let video_header = tag[11];
        assert_eq!(video_header >> 4, 1);
    }

    #[test]
    fn metadata_tag_offsets_locate_the_placeholder_values() {
        let tag = metadata_tag(0.0, 0);
        let duration_bytes: [u8; 8] = tag.bytes[tag.duration_offset..tag.duration_offset + 8].try_into().unwrap();
        let filesize_bytes: [u8; 8] = tag.bytes[tag.filesize_offset..tag.filesize_offset + 8].try_into().unwrap();
        assert_eq!(f64::from_be_bytes(duration_bytes), 0.0);
        assert_eq!(f64::from_be_bytes(filesize_bytes), 0.0);
    }

    #[test]
    fn patch_f64_rewrites_only_the_targeted_span() {
        let tag = metadata_tag(0.0, 0);
        let mut buf = tag.bytes.to_vec();
        patch_f64(&mut buf, tag.duration_offset, 5.0);
        patch_f64(&mut buf, tag.filesize_offset, 4096.0);
        let duration_bytes: [u8; 8] = buf[tag.duration_offset..tag.duration_offset + 8].try_into().unwrap();
        let filesize_bytes: [u8; 8] = buf[tag.filesize_offset..tag.filesize_offset + 8].try_into().unwrap();
        assert_eq!(f64::from_be_bytes(duration_bytes), 5.0);
        assert_eq!(f64::from_be_bytes(filesize_bytes), 4096.0);
        assert_eq!(buf.len(), tag.bytes.len(), "patching must not change the tag's length");
    }
}
