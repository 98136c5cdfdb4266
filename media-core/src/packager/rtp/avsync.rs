//! RTP-time to wall-clock mapping from Sender Reports (spec §4.7). Each
//! track's Sender Reports pair an RTP timestamp with an NTP wall-clock
//! time; once two have been seen the rate between them replaces the naive
//! clock-rate assumption, so `avsync` stays accurate across clock drift.

use rtcp::sender_report::SenderReport;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_EPOCH_OFFSET_SECS: i64 = 2_208_988_800;

#[derive(Debug, Clone, Copy)]
struct SrSample {
    rtp_time: u32,
    system_ms: i64,
}

/// Maps one track's RTP timestamps to system time. Before a second Sender
/// Report arrives, falls back to the track's configured clock rate with no
/// offset; afterward uses the measured `rate = Δrtp / Δsystem-ms` between
/// the two most recent reports (spec §4.7: "refined after the second
/// Sender Report").
pub struct AvSync {
    clock_rate: u32,
    first: Option<SrSample>,
    second: Option<SrSample>,
    refined_rate: Option<f64>,
}

impl AvSync {
    pub fn new(clock_rate: u32) -> Self {
        Self { clock_rate, first: None, second: None, refined_rate: None }
    }

    fn ntp_to_unix_ms(ntp_time: u64) -> i64 {
        let seconds = (ntp_time >> 32) as i64 - NTP_UNIX_EPOCH_OFFSET_SECS;
        let frac_ms = ((ntp_time & 0xFFFF_FFFF) as f64 / (u32::MAX as f64 + 1.0)) * 1000.0;
        seconds * 1000 + frac_ms as i64
    }

    /// Feed a received Sender Report for this track.
    pub fn on_sender_report(&mut self, report: &SenderReport) {
        let sample = SrSample {
            rtp_time: report.rtp_time,
            system_ms: Self::ntp_to_unix_ms(report.ntp_time),
        };
        let previous = self.second.or(self.first);
        self.first = previous;
        self.second = Some(sample);

        if let Some(previous) = previous {
            let delta_rtp = sample.rtp_time.wrapping_sub(previous.rtp_time) as f64;
            let delta_ms = (sample.system_ms - previous.system_ms) as f64;
            if delta_ms > 0.0 {
                self.refined_rate = Some(delta_rtp / delta_ms);
            }
        }
    }

    /// Map an RTP timestamp on this track to milliseconds since the Unix
    /// epoch.
    pub fn avsync(&self, rtp_time: u32) -> i64 {
        match (self.refined_rate, self.second) {
            (Some(rate), Some(epoch)) if rate > 0.0 => {
                let delta_rtp = rtp_time.wrapping_sub(epoch.rtp_time) as i32 as f64;
                epoch.system_ms + (delta_rtp / rate) as i64
            }
            (_, Some(epoch)) => {
                let delta_rtp = rtp_time.wrapping_sub(epoch.rtp_time) as i32 as f64;
                epoch.system_ms + (delta_rtp / self.clock_rate as f64 * 1000.0) as i64
            }
            (_, None) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn sr(ntp_time: u64, rtp_time: u32) -> SenderReport {
        SenderReport {
            ssrc: 1,
            ntp_time,
            rtp_time,
            packet_count: 0,
            octet_count: 0,
            reports: Vec::new(),
            profile_extensions: Bytes::new(),
        }
    }

    fn ntp_at_unix_secs(unix_secs: i64) -> u64 {
        ((unix_secs + NTP_UNIX_EPOCH_OFFSET_SECS) as u64) << 32
    }

    #[test]
    fn unrefined_sync_uses_configured_clock_rate() {
        let mut sync = AvSync::new(90_000);
        sync.on_sender_report(&sr(ntp_at_unix_secs(1_000), 0));
        // One second of RTP ticks at 90kHz.
        assert_eq!(sync.avsync(90_000), 1_000 * 1000 + 1000);
    }

    #[test]
    fn refined_rate_tracks_measured_drift_after_second_report() {
        let mut sync = AvSync::new(90_000);
        sync.on_sender_report(&sr(ntp_at_unix_secs(1_000), 0));
        // Second report five seconds later, but only 400_000 clock ticks
        // elapsed instead of the nominal 450_000: the measured rate
        // (80_000/sec, not 90_000/sec) should drive later projections.
        sync.on_sender_report(&sr(ntp_at_unix_secs(1_005), 400_000));
        // One more second of measured-rate ticks (80_000) from the second
        // report lands exactly one second later.
        assert_eq!(sync.avsync(480_000), (1_006) * 1000);
    }
}
