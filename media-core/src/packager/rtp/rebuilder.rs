//! RTP to frame rebuilder for inbound WebRTC publish (spec §4.7): reorders
//! packets by sequence number in a bounded jitter buffer, reassembles
//! FU-A/STAP-A NAL unit fragments, and detects access-unit boundaries so a
//! reconstructed Annex-B frame can be handed to the Source the same way an
//! RTMP or TS publisher's frames are.
//!
//! This crate does not own the SRTP/ICE receive path; the host binary
//! forwards decrypted RTP packets for an inbound video track into
//! [`RtpFrameRebuilder::push`].

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use rtp::packet::Packet as RtpPacket;

const NALU_TYPE_FU_A: u8 = 28;
const NALU_TYPE_STAP_A: u8 = 24;
const ANNEX_B_START_CODE: [u8; 4] = [0, 0, 0, 1];

/// How many packets the reorder buffer will hold waiting for a gap to fill
/// before it gives up and skips ahead (spec §4.7 "bounded jitter buffer").
const JITTER_WINDOW: usize = 32;

/// One reassembled access unit, ready to hand to the Source.
#[derive(Debug, Clone)]
pub struct RebuiltFrame {
    pub rtp_timestamp: u32,
    pub payload: Bytes,
}

struct FuAccumulator {
    nalu_header: u8,
    data: BytesMut,
}

/// Reorders, depacketizes, and reassembles an H.264 RTP stream (RFC 6184
/// FU-A/STAP-A) into Annex-B access units.
pub struct RtpFrameRebuilder {
    reorder: BTreeMap<u16, RtpPacket>,
    next_expected: Option<u16>,
    fu_accumulator: Option<FuAccumulator>,
    current_frame: BytesMut,
    current_timestamp: Option<u32>,
}

impl Default for RtpFrameRebuilder {
    fn default() -> Self {
        Self {
            reorder: BTreeMap::new(),
            next_expected: None,
            fu_accumulator: None,
            current_frame: BytesMut::new(),
            current_timestamp: None,
        }
    }
}

impl RtpFrameRebuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received RTP packet. Returns zero or more reassembled
    /// frames, in timestamp order, once the reorder buffer can place them.
    pub fn push(&mut self, packet: RtpPacket) -> Vec<RebuiltFrame> {
        self.reorder.insert(packet.header.sequence_number, packet);
        self.drain()
    }

    fn drain(&mut self) -> Vec<RebuiltFrame> {
        let mut out = Vec::new();
        loop {
            // The very first packet ever seen establishes where the
            // sequence starts; there is no way to detect loss before it.
            if self.next_expected.is_none() {
                self.next_expected = self.reorder.keys().next().copied();
            }
            if self.reorder.len() > JITTER_WINDOW {
                // The packet we're waiting on is overdue; skip ahead to
                // whatever's oldest rather than stalling forever.
                if let Some(&lowest) = self.reorder.keys().next() {
                    self.next_expected = Some(lowest);
                }
            }

            let Some(next_seq) = self.next_expected else { break };
            let Some(packet) = self.reorder.remove(&next_seq) else { break };
            self.next_expected = Some(next_seq.wrapping_add(1));
            if let Some(frame) = self.ingest(packet) {
                out.push(frame);
            }
        }
        out
    }

    /// Process one in-order packet, returning a completed frame if this
    /// packet closed one out (via marker bit or a detected boundary).
    fn ingest(&mut self, packet: RtpPacket) -> Option<RebuiltFrame> {
        let timestamp = packet.header.timestamp;
        let mut completed = None;

        if self.current_timestamp.is_some_and(|ts| ts != timestamp) && !self.current_frame.is_empty() {
            completed = Some(self.finish_frame());
        }
        self.current_timestamp = Some(timestamp);

        if packet.payload.is_empty() {
            return completed;
        }

        let header_byte = packet.payload[0];
        match header_byte & 0x1F {
            NALU_TYPE_FU_A => self.ingest_fu_a(&packet.payload),
            NALU_TYPE_STAP_A => self.ingest_stap_a(&packet.payload),
            _ => self.append_nalu(&packet.payload),
        }

        if packet.header.marker && !self.current_frame.is_empty() {
            completed = Some(self.finish_frame());
        }
        completed
    }

    fn append_nalu(&mut self, nalu: &[u8]) {
        self.current_frame.extend_from_slice(&ANNEX_B_START_CODE);
        self.current_frame.extend_from_slice(nalu);
    }

    fn ingest_stap_a(&mut self, payload: &[u8]) {
        let mut offset = 1; // skip the STAP-A indicator byte
        while offset + 2 <= payload.len() {
            let size = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
            offset += 2;
            if offset + size > payload.len() {
                break;
            }
            self.append_nalu(&payload[offset..offset + size]);
            offset += size;
        }
    }

    fn ingest_fu_a(&mut self, payload: &[u8]) {
        if payload.len() < 2 {
            return;
        }
        let indicator = payload[0];
        let fu_header = payload[1];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;
        let nalu_type = fu_header & 0x1F;
        let fragment = &payload[2..];

        if start {
            let nalu_header = (indicator & 0xE0) | nalu_type;
            let mut data = BytesMut::with_capacity(fragment.len() * 4);
            data.extend_from_slice(fragment);
            self.fu_accumulator = Some(FuAccumulator { nalu_header, data });
            return;
        }

        let Some(accumulator) = &mut self.fu_accumulator else {
            // End or continuation fragment with no matching start: the
            // start packet was lost upstream of the jitter buffer. Drop
            // the fragment rather than emit a corrupt NALU.
            return;
        };
        accumulator.data.extend_from_slice(fragment);

        if end {
            let FuAccumulator { nalu_header, data } = self.fu_accumulator.take().unwrap();
            self.current_frame.extend_from_slice(&ANNEX_B_START_CODE);
            self.current_frame.extend_from_slice(&[nalu_header]);
            self.current_frame.extend_from_slice(&data);
        }
    }

    fn finish_frame(&mut self) -> RebuiltFrame {
        let timestamp = self.current_timestamp.unwrap_or(0);
        let payload = std::mem::take(&mut self.current_frame).freeze();
        self.fu_accumulator = None;
        RebuiltFrame { rtp_timestamp: timestamp, payload }
    }
}
