//! Optional audio/video reordering for upstreams that interleave slightly
//! out of timestamp order.
//!
//! Grounded on `SrsMixQueue` (`srs_app_rtmp_source.hpp`): a small
//! fixed-capacity timestamp-ordered buffer. Per spec §9 Open Questions this
//! mode is off by default and its window is not externally configurable —
//! preserved here as an internal constant rather than a config field.

use std::collections::VecDeque;

use crate::packet::MediaPacket;

/// The reorder window size is empirically chosen upstream and not exposed
/// as a tunable; kept identical to avoid silently changing behavior no
/// rationale was recorded for.
const MIX_QUEUE_WINDOW: usize = 8;

/// Timestamp-ordered reorder buffer. Disabled (bypass) unless explicitly
/// enabled via `mix_correct` on the source.
#[derive(Debug, Default)]
pub struct MixQueue {
    buf: VecDeque<MediaPacket>,
}

impl MixQueue {
    pub fn new() -> Self {
        Self { buf: VecDeque::new() }
    }

    /// Push a packet in; pop the earliest-timestamped packet back out once
    /// the window is full. Returns `None` while still filling the window.
    pub fn push(&mut self, packet: MediaPacket) -> Option<MediaPacket> {
        let insert_at = self
            .buf
            .iter()
            .position(|p| p.dts > packet.dts)
            .unwrap_or(self.buf.len());
        self.buf.insert(insert_at, packet);

        if self.buf.len() > MIX_QUEUE_WINDOW {
            self.buf.pop_front()
        } else {
            None
        }
    }

    /// Drain all remaining packets in timestamp order, e.g. on unpublish.
    pub fn drain(&mut self) -> Vec<MediaPacket> {
        self.buf.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::CodecId;
    use bytes::Bytes;

    fn pkt(dts: i64) -> MediaPacket {
        MediaPacket::audio(dts, CodecId::Aac, false, Bytes::new())
    }

    #[test]
    fn reorders_within_window() {
        let mut q = MixQueue::new();
        let mut out = Vec::new();
        for dts in [0, 3, 1, 2, 4, 5, 6, 7, 8, 9] {
            if let Some(p) = q.push(pkt(dts)) {
                out.push(p.dts);
            }
        }
        out.extend(q.drain().into_iter().map(|p| p.dts));
        let mut sorted = out.clone();
        sorted.sort_unstable();
        assert_eq!(out, sorted, "reorder buffer must emit in non-decreasing dts order");
    }
}
