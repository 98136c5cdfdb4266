//! RTCP feedback handling: NACK-driven retransmission, PLI debounce, and a
//! TWCC sequence tracker for the RTP Packager (spec §4.7).

use std::time::{Duration, Instant};

use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use rtcp::transport_feedbacks::transport_layer_nack::{NackPair, TransportLayerNack};

/// Decode a `TransportLayerNack`'s compact bitmask encoding into the full
/// list of missing sequence numbers it names.
pub fn nack_sequence_numbers(nack: &TransportLayerNack) -> Vec<u16> {
    let mut out = Vec::new();
    for pair in &nack.nacks {
        out.push(pair.packet_id);
        for bit in 0..16u16 {
            if pair.lost_packets & (1 << bit) != 0 {
                out.push(pair.packet_id.wrapping_add(bit + 1));
            }
        }
    }
    out
}

pub fn build_nack(sender_ssrc: u32, media_ssrc: u32, missing: &[u16]) -> TransportLayerNack {
    let nacks = missing
        .iter()
        .map(|&packet_id| NackPair {
            packet_id,
            lost_packets: 0,
        })
        .collect();
    TransportLayerNack {
        sender_ssrc,
        media_ssrc,
        nacks,
    }
}

/// Debounces outgoing PLI requests so a burst of decode errors from one
/// subscriber doesn't flood the publisher with keyframe requests (spec
/// §4.7 "PLI debounce").
pub struct PliDebouncer {
    debounce: Duration,
    last_sent: Option<Instant>,
}

impl PliDebouncer {
    pub fn new(debounce: Duration) -> Self {
        Self { debounce, last_sent: None }
    }

    /// Returns `true` exactly when a PLI should actually be sent now.
    pub fn should_send(&mut self, now: Instant) -> bool {
        match self.last_sent {
            Some(last) if now.duration_since(last) < self.debounce => false,
            _ => {
                self.last_sent = Some(now);
                true
            }
        }
    }

    pub fn build(media_ssrc: u32) -> PictureLossIndication {
        PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc,
        }
    }
}

/// Minimal TWCC sequence tracker: assigns the wide sequence number stamped
/// into the TWCC RTP header extension. The actual feedback-packet parsing
/// that turns these into bandwidth estimates is a receiver-side concern
/// outside this crate.
#[derive(Default)]
pub struct TwccSequencer {
    next: u16,
}

impl TwccSequencer {
    pub fn next(&mut self) -> u16 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }
}
