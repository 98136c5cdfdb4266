//! RTP Packager: WebRTC egress (spec §4.7). Packetizes outgoing media into
//! RTP, serves NACK-driven retransmission, debounces PLI requests, and
//! tracks A/V sync from Sender Reports. [`rebuilder`] provides the reverse
//! direction (RTP to frame, for WebRTC publish).
//!
//! This crate does not own ICE/DTLS/SRTP session setup — the host binary's
//! signaling layer is expected to hand this packager already-negotiated
//! SSRCs, payload types and clock rates per track and forward RTCP packets
//! it receives for the session into [`RtpPackager::on_nack`] /
//! [`RtpPackager::on_pli`] / [`RtpPackager::on_sender_report`] /
//! [`RtpPackager::on_receiver_report`].

pub mod avsync;
pub mod feedback;
pub mod packetizer;
pub mod rebuilder;

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rtcp::receiver_report::ReceiverReport;
use rtcp::sender_report::SenderReport;
use rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack;
use tokio::sync::mpsc;
use tracing::debug;

use crate::identity::StreamIdentity;
use crate::metadata::MetadataCache;
use crate::packager::{Packager, PackagerKind};
use crate::packet::MediaPacket;

use avsync::AvSync;
use feedback::{nack_sequence_numbers, PliDebouncer, TwccSequencer};
use packetizer::RtpPacketizer;
use rtp::packet::Packet as RtpPacket;

/// Which track an RTCP report or `avsync` query concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtpTrack {
    Video,
    Audio,
}

/// The most recent loss/jitter figures from a received Receiver Report's
/// first reception block, kept for stats/logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiverReportSummary {
    pub fraction_lost: u8,
    pub total_lost: u32,
    pub jitter: u32,
}

pub struct RtpTrackConfig {
    pub ssrc: u32,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub mtu: usize,
}

pub struct RtpConfig {
    pub video: RtpTrackConfig,
    pub audio: RtpTrackConfig,
    pub pli_debounce: Duration,
    pub nack_enabled: bool,
    pub twcc_enabled: bool,
}

struct Inner {
    video_packetizer: RtpPacketizer,
    audio_packetizer: RtpPacketizer,
    pli: PliDebouncer,
    twcc: TwccSequencer,
    /// A/V sync baseline: the dts of the first packet seen on each track,
    /// so outgoing RTP timestamps on both tracks share one origin.
    base_dts: Option<i64>,
    video_avsync: AvSync,
    audio_avsync: AvSync,
    last_receiver_report: Option<ReceiverReportSummary>,
}

/// Outgoing RTP packets, tagged with which track they belong to, handed to
/// whatever SRTP/ICE transport the host binary wires up.
pub enum OutgoingRtp {
    Video(RtpPacket),
    Audio(RtpPacket),
}

pub struct RtpPackager {
    config: RtpConfig,
    inner: Mutex<Inner>,
    tx: mpsc::UnboundedSender<OutgoingRtp>,
    retransmits_requested: AtomicU32,
}

impl RtpPackager {
    pub fn new(config: RtpConfig) -> (Self, mpsc::UnboundedReceiver<OutgoingRtp>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let video_packetizer = RtpPacketizer::new(config.video.ssrc, config.video.payload_type, config.video.clock_rate, config.video.mtu);
        let audio_packetizer = RtpPacketizer::new(config.audio.ssrc, config.audio.payload_type, config.audio.clock_rate, config.audio.mtu);
        let pli = PliDebouncer::new(config.pli_debounce);
        let video_avsync = AvSync::new(config.video.clock_rate);
        let audio_avsync = AvSync::new(config.audio.clock_rate);
        let packager = Self {
            config,
            inner: Mutex::new(Inner {
                video_packetizer,
                audio_packetizer,
                pli,
                twcc: TwccSequencer::default(),
                base_dts: None,
                video_avsync,
                audio_avsync,
                last_receiver_report: None,
            }),
            tx,
            retransmits_requested: AtomicU32::new(0),
        };
        (packager, rx)
    }

    /// Feed a received `TransportLayerNack` back in; any still-buffered
    /// packets it names are requeued for retransmission.
    pub fn on_nack(&self, nack: &TransportLayerNack) {
        if !self.config.nack_enabled {
            return;
        }
        let missing = nack_sequence_numbers(nack);
        let inner = self.inner.lock();
        for seq in missing {
            if let Some(packet) = inner.video_packetizer.find_for_retransmit(seq).cloned() {
                self.retransmits_requested.fetch_add(1, Ordering::Relaxed);
                let _ = self.tx.send(OutgoingRtp::Video(packet));
            }
        }
    }

    /// A decoder-side PLI arrived; forward a keyframe request to the
    /// publisher unless one was already sent within the debounce window.
    /// Returns whether a request should actually be issued upstream.
    pub fn on_pli(&self) -> bool {
        self.inner.lock().pli.should_send(Instant::now())
    }

    pub fn retransmits_requested(&self) -> u32 {
        self.retransmits_requested.load(Ordering::Relaxed)
    }

    /// Feed a received Sender Report for `track`, refining that track's
    /// RTP-time-to-system-time mapping (spec §4.7).
    pub fn on_sender_report(&self, track: RtpTrack, report: &SenderReport) {
        let mut inner = self.inner.lock();
        match track {
            RtpTrack::Video => inner.video_avsync.on_sender_report(report),
            RtpTrack::Audio => inner.audio_avsync.on_sender_report(report),
        }
    }

    /// Feed a received Receiver Report; records the first reception
    /// block's loss/jitter figures for stats and logging.
    pub fn on_receiver_report(&self, report: &ReceiverReport) {
        let Some(block) = report.reports.first() else { return };
        self.inner.lock().last_receiver_report = Some(ReceiverReportSummary {
            fraction_lost: block.fraction_lost,
            total_lost: block.total_lost,
            jitter: block.jitter,
        });
    }

    pub fn last_receiver_report(&self) -> Option<ReceiverReportSummary> {
        self.inner.lock().last_receiver_report
    }

    /// Map an RTP timestamp on `track` to milliseconds since the Unix
    /// epoch, refined once the second Sender Report has been observed
    /// (spec §4.7).
    pub fn avsync(&self, track: RtpTrack, rtp_time: u32) -> i64 {
        let inner = self.inner.lock();
        match track {
            RtpTrack::Video => inner.video_avsync.avsync(rtp_time),
            RtpTrack::Audio => inner.audio_avsync.avsync(rtp_time),
        }
    }
}

#[async_trait]
impl Packager for RtpPackager {
    fn kind(&self) -> PackagerKind {
        PackagerKind::RtcRtp
    }

    async fn on_publish(&self, identity: &StreamIdentity, _metadata: &MetadataCache) {
        let mut inner = self.inner.lock();
        inner.base_dts = None;
        debug!(%identity, "RTP packager publishing");
    }

    async fn on_unpublish(&self, _identity: &StreamIdentity) {}

    /// Driven by the Fast Timer at the host binary's configured RTCP
    /// cadence. SR/RR handling itself is event-driven, the same way NACK
    /// and PLI are: the host forwards each received report as it arrives
    /// into [`RtpPackager::on_sender_report`] / [`RtpPackager::on_receiver_report`]
    /// rather than this packager polling for one. `cycle` has nothing left
    /// to do on its own tick.
    async fn cycle(&self, _identity: &StreamIdentity) {}

    async fn on_packet(&self, _identity: &StreamIdentity, packet: &MediaPacket) {
        if packet.is_sequence_header || packet.is_script() {
            // Sequence headers are negotiated out-of-band via SDP for
            // WebRTC, not carried in the RTP stream itself.
            return;
        }

        let mut inner = self.inner.lock();
        let base = *inner.base_dts.get_or_insert(packet.dts);
        let relative_dts = packet.dts - base;

        let packets: Vec<OutgoingRtp> = if packet.is_video() {
            inner
                .video_packetizer
                .packetize(relative_dts, &packet.payload)
                .into_iter()
                .map(OutgoingRtp::Video)
                .collect()
        } else {
            inner
                .audio_packetizer
                .packetize(relative_dts, &packet.payload)
                .into_iter()
                .map(OutgoingRtp::Audio)
                .collect()
        };
        if self.config.twcc_enabled {
            let _ = inner.twcc.next();
        }
        drop(inner);

        for out in packets {
            let _ = self.tx.send(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::packet::CodecId;

    fn config() -> RtpConfig {
        RtpConfig {
            video: RtpTrackConfig { ssrc: 1, payload_type: 96, clock_rate: 90_000, mtu: 1200 },
            audio: RtpTrackConfig { ssrc: 2, payload_type: 97, clock_rate: 48_000, mtu: 1200 },
            pli_debounce: Duration::from_millis(500),
            nack_enabled: true,
            twcc_enabled: true,
        }
    }

    #[tokio::test]
    async fn video_packet_forwards_rtp_to_channel() {
        let (packager, mut rx) = RtpPackager::new(config());
        let identity = StreamIdentity::default_vhost("live", "a");
        let packet = MediaPacket::video(0, 0, CodecId::Avc, true, false, Bytes::from_static(b"nalu"));
        packager.on_packet(&identity, &packet).await;
        let out = rx.recv().await;
        assert!(matches!(out, Some(OutgoingRtp::Video(_))));
    }

    #[tokio::test]
    async fn sequence_headers_are_not_forwarded_as_rtp() {
        let (packager, mut rx) = RtpPackager::new(config());
        let identity = StreamIdentity::default_vhost("live", "a");
        let sh = MediaPacket::video(0, 0, CodecId::Avc, false, true, Bytes::from_static(b"sps"));
        packager.on_packet(&identity, &sh).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn pli_request_respects_debounce() {
        let (packager, _rx) = RtpPackager::new(config());
        assert!(packager.on_pli());
        assert!(!packager.on_pli());
    }

    fn sender_report(ntp_time: u64, rtp_time: u32) -> SenderReport {
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

    #[test]
    fn sender_reports_refine_that_tracks_avsync_independently() {
        let (packager, _rx) = RtpPackager::new(config());
        const BASE_UNIX_SECONDS: u64 = 1_000_000;
        const NTP_UNIX_EPOCH_OFFSET_SECS: u64 = 2_208_988_800;
        let first_ntp = (BASE_UNIX_SECONDS + NTP_UNIX_EPOCH_OFFSET_SECS) << 32;
        let second_ntp = (BASE_UNIX_SECONDS + 1 + NTP_UNIX_EPOCH_OFFSET_SECS) << 32;
        packager.on_sender_report(RtpTrack::Video, &sender_report(first_ntp, 0));
        packager.on_sender_report(RtpTrack::Video, &sender_report(second_ntp, 90_000));

        // Audio never received a report: falls back to its configured
        // clock rate (and a zero offset) rather than the video track's SRs.
        assert_eq!(packager.avsync(RtpTrack::Audio, 0), 0);
        // One more second of measured-rate (90/ms) ticks past the second
        // report lands exactly one second after it.
        assert_eq!(packager.avsync(RtpTrack::Video, 180_000), (BASE_UNIX_SECONDS as i64 + 2) * 1000);
    }

    #[test]
    fn receiver_report_records_loss_and_jitter() {
        let (packager, _rx) = RtpPackager::new(config());
        let report = ReceiverReport {
            ssrc: 1,
            reports: vec![rtcp::reception_report::ReceptionReport {
                ssrc: 1,
                fraction_lost: 5,
                total_lost: 12,
                last_sequence_number: 100,
                jitter: 7,
                last_sender_report: 0,
                delay: 0,
            }],
            profile_extensions: Bytes::new(),
        };
        packager.on_receiver_report(&report);
        let summary = packager.last_receiver_report().unwrap();
        assert_eq!(summary.fraction_lost, 5);
        assert_eq!(summary.total_lost, 12);
        assert_eq!(summary.jitter, 7);
    }
}
