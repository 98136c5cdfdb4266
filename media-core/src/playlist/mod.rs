//! Manifest writers for the segmented egress formats.

pub mod codec;
pub mod m3u8;
pub mod mpd;

pub use m3u8::M3u8Writer;
pub use mpd::{MpdTrack, MpdWriter};
