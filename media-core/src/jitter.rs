//! Per-consumer jitter/timestamp correction, applied at dequeue time
//! (spec §4.3) so different consumers can run different modes concurrently
//! off the same Source.

use crate::packet::MediaPacket;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JitterMode {
    /// Remap the first packet's dts to zero and enforce monotonicity
    /// thereafter (never emit a dts less than or equal to the previous one).
    Full,
    /// Remap to zero start only; no monotonicity enforcement.
    Zero,
    /// Passthrough, unmodified.
    #[default]
    Off,
}

/// Per-consumer correction state.
#[derive(Debug, Default)]
pub struct JitterCorrector {
    mode: JitterMode,
    base_dts: Option<i64>,
    last_out_dts: Option<i64>,
}

impl JitterCorrector {
    pub fn new(mode: JitterMode) -> Self {
        Self {
            mode,
            base_dts: None,
            last_out_dts: None,
        }
    }

    pub fn set_mode(&mut self, mode: JitterMode) {
        self.mode = mode;
    }

    /// Apply correction in place, mutating `packet.dts`/`packet.cts` is
    /// intentionally avoided (cts is relative, unaffected); only the base
    /// `dts` is remapped.
    pub fn correct(&mut self, packet: &mut MediaPacket) {
        match self.mode {
            JitterMode::Off => {}
            JitterMode::Zero => {
                let base = *self.base_dts.get_or_insert(packet.dts);
                packet.dts -= base;
            }
            JitterMode::Full => {
                let base = *self.base_dts.get_or_insert(packet.dts);
                let mut dts = packet.dts - base;
                if let Some(last) = self.last_out_dts {
                    if dts <= last {
                        dts = last + 1;
                    }
                }
                self.last_out_dts = Some(dts);
                packet.dts = dts;
            }
        }
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
    fn off_is_passthrough() {
        let mut c = JitterCorrector::new(JitterMode::Off);
        let mut p = pkt(1000);
        c.correct(&mut p);
        assert_eq!(p.dts, 1000);
    }

    #[test]
    fn zero_remaps_first_packet_to_zero() {
        let mut c = JitterCorrector::new(JitterMode::Zero);
        let mut p = pkt(1000);
        c.correct(&mut p);
        assert_eq!(p.dts, 0);
        let mut p2 = pkt(1050);
        c.correct(&mut p2);
        assert_eq!(p2.dts, 50);
    }

    #[test]
    fn full_enforces_monotonicity() {
        let mut c = JitterCorrector::new(JitterMode::Full);
        let mut p1 = pkt(1000);
        c.correct(&mut p1);
        let mut p2 = pkt(999); // would go backwards relative to p1 after rebase
        c.correct(&mut p2);
        assert!(p2.dts > p1.dts);
    }
}
