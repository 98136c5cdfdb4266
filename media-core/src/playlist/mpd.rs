//! DASH MPD writer for the Fragmented (DASH-fMP4) packager.
//!
//! One `AdaptationSet` per track (spec §4.5: DASH representations are
//! per-track, so video and audio each get their own `SegmentTemplate` and
//! `SegmentTimeline` rather than sharing one combined representation).

use crate::fragment::Fragment;

/// Everything the MPD writer needs to render one track's `AdaptationSet`.
pub struct MpdTrack<'a> {
    pub mime_type: &'static str,
    pub codecs: String,
    pub init_segment_url: String,
    pub fragments: Box<dyn Iterator<Item = &'a Fragment> + 'a>,
}

pub struct MpdWriter {
    pub min_buffer_time_secs: f64,
}

impl MpdWriter {
    pub fn new(min_buffer_time_secs: f64) -> Self {
        Self { min_buffer_time_secs }
    }

    pub fn render(&self, tracks: Vec<MpdTrack<'_>>) -> String {
        let mut adaptation_sets = String::new();
        for (index, track) in tracks.into_iter().enumerate() {
            let mut segment_list = String::new();
            for fragment in track.fragments {
                segment_list.push_str(&format!(
                    "          <S t=\"{}\" d=\"{}\"/>\n",
                    fragment.start_dts, fragment.duration_ms
                ));
            }
            adaptation_sets.push_str(&format!(
                r#"    <AdaptationSet id="{id}" mimeType="{mime}" codecs="{codecs}" segmentAlignment="true">
      <SegmentTemplate timescale="1000" initialization="{init}" media="$Time$.m4s">
        <SegmentTimeline>
{segment_list}        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="{id}" bandwidth="0"/>
    </AdaptationSet>
"#,
                id = index,
                mime = track.mime_type,
                codecs = track.codecs,
                init = track.init_segment_url,
                segment_list = segment_list,
            ));
        }

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" profiles="urn:mpeg:dash:profile:isoff-live:2011"
     type="dynamic" minBufferTime="PT{min_buffer:.1}S">
  <Period id="0">
{adaptation_sets}  </Period>
</MPD>
"#,
            min_buffer = self.min_buffer_time_secs,
            adaptation_sets = adaptation_sets,
        )
    }
}
