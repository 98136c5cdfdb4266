//! Payload-to-RTP packetization and the retransmission ring NACK draws from.

use std::collections::VecDeque;

use bytes::Bytes;
use rtp::header::Header;
use rtp::packet::Packet;

/// How many packets of retransmission history to retain per SSRC. Bounded
/// so a flood of NACKs for very old sequence numbers can't grow memory
/// without limit (spec §4.7).
const RETRANSMIT_RING_CAPACITY: usize = 512;

pub struct RtpPacketizer {
    ssrc: u32,
    payload_type: u8,
    sequence_number: u16,
    clock_rate: u32,
    mtu: usize,
    sent: VecDeque<Packet>,
}

impl RtpPacketizer {
    pub fn new(ssrc: u32, payload_type: u8, clock_rate: u32, mtu: usize) -> Self {
        Self {
            ssrc,
            payload_type,
            sequence_number: 0,
            clock_rate,
            mtu,
            sent: VecDeque::with_capacity(RETRANSMIT_RING_CAPACITY),
        }
    }

    /// Split `payload` into one or more RTP packets, marking the last one
    /// with the marker bit (frame boundary). Timestamp is in clock-rate
    /// units derived from `dts_ms`.
    pub fn packetize(&mut self, dts_ms: i64, payload: &Bytes) -> Vec<Packet> {
        let timestamp = ((dts_ms as i128 * self.clock_rate as i128) / 1000) as u32;
        let chunks: Vec<&[u8]> = if payload.len() <= self.mtu {
            vec![&payload[..]]
        } else {
            payload.chunks(self.mtu).collect()
        };

        let mut packets = Vec::with_capacity(chunks.len());
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.iter().enumerate() {
            let header = Header {
                version: 2,
                padding: false,
                extension: false,
                marker: i == last,
                payload_type: self.payload_type,
                sequence_number: self.sequence_number,
                timestamp,
                ssrc: self.ssrc,
                ..Default::default()
            };
            let packet = Packet {
                header,
                payload: Bytes::copy_from_slice(chunk),
            };
            self.sequence_number = self.sequence_number.wrapping_add(1);
            self.remember(packet.clone());
            packets.push(packet);
        }
        packets
    }

    fn remember(&mut self, packet: Packet) {
        if self.sent.len() >= RETRANSMIT_RING_CAPACITY {
            self.sent.pop_front();
        }
        self.sent.push_back(packet);
    }

    /// Look up a previously sent packet by sequence number for NACK-driven
    /// retransmission. Returns `None` once it has aged out of the ring.
    pub fn find_for_retransmit(&self, sequence_number: u16) -> Option<&Packet> {
        self.sent.iter().find(|p| p.header.sequence_number == sequence_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_oversized_payload_into_mtu_sized_chunks() {
        let mut packetizer = RtpPacketizer::new(1, 96, 90_000, 100);
        let payload = Bytes::from(vec![0xAB; 250]);
        let packets = packetizer.packetize(0, &payload);
        assert_eq!(packets.len(), 3);
        assert!(packets.last().unwrap().header.marker);
        assert!(!packets.first().unwrap().header.marker);
    }

    #[test]
    fn sequence_numbers_increment_monotonically() {
        let mut packetizer = RtpPacketizer::new(1, 96, 90_000, 1200);
        let payload = Bytes::from_static(b"frame");
        let first = packetizer.packetize(0, &payload);
        let second = packetizer.packetize(33, &payload);
        assert_eq!(second[0].header.sequence_number, first[0].header.sequence_number.wrapping_add(1));
    }

    #[test]
    fn retransmit_lookup_finds_recently_sent_packet() {
        let mut packetizer = RtpPacketizer::new(1, 96, 90_000, 1200);
        let payload = Bytes::from_static(b"frame");
        let sent = packetizer.packetize(0, &payload);
        let seq = sent[0].header.sequence_number;
        assert!(packetizer.find_for_retransmit(seq).is_some());
    }
}
