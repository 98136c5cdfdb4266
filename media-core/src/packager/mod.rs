//! The packager capability.
//!
//! Spec §9 "Deep inheritance chains in source" collapses the original's
//! per-feature class hierarchies to one capability trait plus tagged
//! variants, rather than a multi-level inheritance tree.

pub mod dvr;
pub mod fmp4;
pub mod hls_ts;
pub mod rtp;

use std::sync::Arc;

use async_trait::async_trait;

use crate::identity::StreamIdentity;
use crate::metadata::MetadataCache;
use crate::packet::MediaPacket;

/// Which egress format a packager instance produces. Kept for logging,
/// stats, and hook payloads; dispatch itself is always through the trait
/// object, never by matching on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackagerKind {
    HlsTs,
    HlsFmp4,
    DashFmp4,
    DvrFlv,
    DvrMp4,
    RtcRtp,
}

impl PackagerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackagerKind::HlsTs => "hls-ts",
            PackagerKind::HlsFmp4 => "hls-fmp4",
            PackagerKind::DashFmp4 => "dash-fmp4",
            PackagerKind::DvrFlv => "dvr-flv",
            PackagerKind::DvrMp4 => "dvr-mp4",
            PackagerKind::RtcRtp => "rtc-rtp",
        }
    }
}

/// One packager capability, implemented by each of the five egress
/// variants. `on_packet` must never perform blocking I/O directly from the
/// publisher's hot path in spirit (spec §5); implementations that write to
/// disk buffer and flush on segment boundaries, which is the one place they
/// are allowed to do I/O, since segment boundaries are driven by the
/// packager's own timer/keyframe logic rather than by the publisher
/// blocking on every packet.
#[async_trait]
pub trait Packager: Send + Sync {
    fn kind(&self) -> PackagerKind;

    /// Called once when the Source transitions to published, after caches
    /// are reset. Packagers (re)open their output artifacts here.
    async fn on_publish(&self, identity: &StreamIdentity, metadata: &MetadataCache);

    /// Called when the Source unpublishes. Packagers must flush and close
    /// any open artifact synchronously with respect to this call (the
    /// packager may still dispatch hook notifications asynchronously).
    async fn on_unpublish(&self, identity: &StreamIdentity);

    /// Called for every packet the Source accepts, in the order the
    /// publisher delivered them (or mix-corrected order, if enabled).
    async fn on_packet(&self, identity: &StreamIdentity, packet: &MediaPacket);

    /// Periodic tick from the Fast Timer, used for window reaping. The
    /// §4.4 absolute-cap cut itself is evaluated inline in `on_packet`
    /// against each packet's timestamp (the packet stream is the only
    /// clock segmented packagers have), not here; likewise the RTP
    /// Packager's §4.7 SR/RR handling is event-driven off received reports
    /// rather than polled here. Packagers that need no periodic work may
    /// leave this a no-op.
    async fn cycle(&self, _identity: &StreamIdentity) {}
}

pub type PackagerHandle = Arc<dyn Packager>;
