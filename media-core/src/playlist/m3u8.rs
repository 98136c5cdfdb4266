//! HLS media playlist writer (RFC 8216), fed from a [`FragmentWindow`].

use crate::fragment::Fragment;

pub struct M3u8Writer {
    pub target_duration_secs: u32,
    pub media_sequence: u64,
    pub discontinuity_sequence: u64,
    pub is_live: bool,
}

impl M3u8Writer {
    pub fn new(target_duration_secs: u32) -> Self {
        Self {
            target_duration_secs,
            media_sequence: 0,
            discontinuity_sequence: 0,
            is_live: true,
        }
    }

    /// Render the current sliding window. `discontinuities` marks, by
    /// sequence number, fragments that must be preceded by
    /// `#EXT-X-DISCONTINUITY` (e.g. after a video sequence-header change).
    pub fn render<'a>(&self, fragments: impl Iterator<Item = &'a Fragment>, discontinuities: &[u64]) -> String {
        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        out.push_str("#EXT-X-VERSION:6\n");
        out.push_str(&format!("#EXT-X-TARGETDURATION:{}\n", self.target_duration_secs));
        out.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", self.media_sequence));
        if self.discontinuity_sequence > 0 {
            out.push_str(&format!("#EXT-X-DISCONTINUITY-SEQUENCE:{}\n", self.discontinuity_sequence));
        }

        for fragment in fragments {
            if discontinuities.contains(&fragment.sequence_number) {
                out.push_str("#EXT-X-DISCONTINUITY\n");
            }
            out.push_str(&format!("#EXTINF:{:.3},\n", fragment.duration_ms as f64 / 1000.0));
            out.push_str(&fragment_url(fragment));
            out.push('\n');
        }

        if !self.is_live {
            out.push_str("#EXT-X-ENDLIST\n");
        }
        out
    }

    /// Render a master playlist referencing one or more variant media
    /// playlists (single-rendition streams still use this so clients always
    /// see a `#EXT-X-STREAM-INF`).
    pub fn render_master(variants: &[(String, u64, Option<String>)]) -> String {
        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        out.push_str("#EXT-X-VERSION:6\n");
        for (url, bandwidth, codecs) in variants {
            out.push_str(&format!("#EXT-X-STREAM-INF:BANDWIDTH={}", bandwidth));
            if let Some(codecs) = codecs {
                out.push_str(&format!(",CODECS=\"{}\"", codecs));
            }
            out.push('\n');
            out.push_str(url);
            out.push('\n');
        }
        out
    }
}

fn fragment_url(fragment: &Fragment) -> String {
    fragment
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("segment-{}.ts", fragment.sequence_number))
}
