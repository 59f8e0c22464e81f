//! ffprobe invocation and interpretation of its JSON output.

use serde::Deserialize;
use std::ffi::OsStr;
use std::path::Path;

use crate::engine::analyzer::Tools;
use crate::errors::ScanError;
use crate::types::{
    CinfParts, CodecInfo, FieldOrder, FormatInfo, MediaInfo, MediaKind, MediaRecord, StreamInfo,
    de_loose_bool, de_loose_f64,
};
use crate::utils::config::Lanes;

/// Longest duration (seconds) still classified as a still image.
pub const STILL_MAX_DURATION: f64 = 1.0 / 24.0;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProbeOutput {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    #[serde(default)]
    pub format: ProbeFormat,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProbeStream {
    pub codec_type: Option<String>,
    pub codec_long_name: Option<String>,
    pub codec_time_base: Option<String>,
    pub codec_tag_string: Option<String>,
    #[serde(deserialize_with = "de_loose_bool")]
    pub is_avc: Option<bool>,

    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_aspect_ratio: Option<String>,
    pub display_aspect_ratio: Option<String>,
    pub pix_fmt: Option<String>,
    #[serde(deserialize_with = "de_loose_f64")]
    pub bits_per_raw_sample: Option<f64>,
    pub avg_frame_rate: Option<String>,
    pub r_frame_rate: Option<String>,

    pub sample_fmt: Option<String>,
    #[serde(deserialize_with = "de_loose_f64")]
    pub sample_rate: Option<f64>,
    pub channels: Option<u32>,
    pub channel_layout: Option<String>,
    #[serde(deserialize_with = "de_loose_f64")]
    pub bits_per_sample: Option<f64>,

    pub time_base: Option<String>,
    #[serde(deserialize_with = "de_loose_f64")]
    pub start_time: Option<f64>,
    #[serde(deserialize_with = "de_loose_f64")]
    pub duration_ts: Option<f64>,
    #[serde(deserialize_with = "de_loose_f64")]
    pub duration: Option<f64>,
    #[serde(deserialize_with = "de_loose_f64")]
    pub bit_rate: Option<f64>,
    #[serde(deserialize_with = "de_loose_f64")]
    pub max_bit_rate: Option<f64>,
    #[serde(deserialize_with = "de_loose_f64")]
    pub nb_frames: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProbeFormat {
    pub format_name: Option<String>,
    pub format_long_name: Option<String>,
    #[serde(deserialize_with = "de_loose_f64")]
    pub start_time: Option<f64>,
    #[serde(deserialize_with = "de_loose_f64")]
    pub duration: Option<f64>,
    #[serde(deserialize_with = "de_loose_f64")]
    pub bit_rate: Option<f64>,
    #[serde(deserialize_with = "de_loose_f64")]
    pub max_bit_rate: Option<f64>,
}

impl ProbeOutput {
    /// Parse ffprobe stdout. No streams means the file is not media.
    pub fn parse(stdout: &[u8]) -> Result<Self, ScanError> {
        let out: ProbeOutput = serde_json::from_slice(stdout)
            .map_err(|e| ScanError::Malformed(format!("ffprobe json: {e}")))?;
        if out.streams.is_empty() {
            return Err(ScanError::NotMedia("no streams".to_string()));
        }
        Ok(out)
    }

    /// Container duration, zero treated as unknown.
    pub fn duration(&self) -> Option<f64> {
        self.format.duration.filter(|d| *d > 0.0)
    }

    fn first_is_video(&self) -> bool {
        self.streams
            .first()
            .is_some_and(|s| s.pix_fmt.is_some())
    }

    pub fn kind(&self) -> MediaKind {
        if !self.first_is_video() {
            return MediaKind::Audio;
        }
        if self.duration().unwrap_or(0.0) <= STILL_MAX_DURATION {
            MediaKind::Still
        } else {
            MediaKind::Movie
        }
    }

    /// Kind, frame count and time base for the CLS line. Video uses the inverted frame
    /// rate as time base; everything else the first stream's time base (default 1/25).
    pub fn cinf_parts(&self) -> CinfParts {
        let first = self.streams.first();
        let mut tb = first
            .and_then(|s| s.time_base.as_deref())
            .and_then(parse_ratio)
            .unwrap_or((1, 25));
        if self.first_is_video()
            && let Some((num, den)) = first
                .and_then(|s| s.avg_frame_rate.as_deref().or(s.r_frame_rate.as_deref()))
                .and_then(parse_ratio)
        {
            tb = (den, num);
        }
        let duration = self.duration().unwrap_or(STILL_MAX_DURATION);
        let frames = (duration * tb.1 as f64) / tb.0 as f64;
        let frames = if frames.is_finite() && frames > 0.0 {
            frames.floor() as u64
        } else {
            0
        };
        CinfParts {
            kind: self.kind(),
            frames,
            time_base: tb,
        }
    }

    /// Record-facing media description. Analysis fields start empty.
    pub fn media_info(&self, record: &MediaRecord) -> MediaInfo {
        MediaInfo {
            name: record.id.clone(),
            path: record.media_path.clone().unwrap_or_default(),
            size: record.media_size.unwrap_or(0),
            time: record.media_time.unwrap_or(0),
            kind: self.kind(),
            field_order: FieldOrder::Unknown,
            scenes: Vec::new(),
            freezes: Vec::new(),
            blacks: Vec::new(),
            streams: self.streams.iter().map(stream_info).collect(),
            format: FormatInfo {
                name: self.format.format_name.clone(),
                long_name: self.format.format_long_name.clone(),
                start_time: self.format.start_time,
                duration: self.format.duration,
                bit_rate: self.format.bit_rate,
                max_bit_rate: self.format.max_bit_rate,
            },
        }
    }
}

fn stream_info(s: &ProbeStream) -> StreamInfo {
    StreamInfo {
        codec: CodecInfo {
            long_name: s.codec_long_name.clone(),
            kind: s.codec_type.clone(),
            time_base: s.codec_time_base.clone(),
            tag_string: s.codec_tag_string.clone(),
            is_avc: s.is_avc,
        },
        width: s.width,
        height: s.height,
        sample_aspect_ratio: s.sample_aspect_ratio.clone(),
        display_aspect_ratio: s.display_aspect_ratio.clone(),
        pix_fmt: s.pix_fmt.clone(),
        bits_per_raw_sample: s.bits_per_raw_sample,
        sample_fmt: s.sample_fmt.clone(),
        sample_rate: s.sample_rate,
        channels: s.channels,
        channel_layout: s.channel_layout.clone(),
        bits_per_sample: s.bits_per_sample,
        time_base: s.time_base.clone(),
        start_time: s.start_time,
        duration_ts: s.duration_ts,
        duration: s.duration,
        bit_rate: s.bit_rate,
        max_bit_rate: s.max_bit_rate,
        nb_frames: s.nb_frames,
    }
}

/// "a/b" → (a, b).
fn parse_ratio(s: &str) -> Option<(u64, u64)> {
    let (a, b) = s.split_once('/')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// Run ffprobe on `path` under the probe lane.
pub fn run_probe(tools: &Tools, path: &Path) -> Result<ProbeOutput, ScanError> {
    let args = [
        OsStr::new("-hide_banner"),
        OsStr::new("-i"),
        path.as_os_str(),
        OsStr::new("-show_streams"),
        OsStr::new("-show_format"),
        OsStr::new("-print_format"),
        OsStr::new("json"),
    ];
    let out = tools.run(Lanes::PROBE, &tools.ffprobe, &args)?;
    ProbeOutput::parse(&out.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOVIE: &str = r#"{
        "streams": [
            {"codec_type": "video", "pix_fmt": "yuv420p", "time_base": "1/12800",
             "avg_frame_rate": "25/1", "width": 1920, "height": 1080, "nb_frames": "250"},
            {"codec_type": "audio", "sample_rate": "48000", "channels": 2, "time_base": "1/48000"}
        ],
        "format": {"format_name": "mov,mp4", "duration": "10.000000", "bit_rate": "1000"}
    }"#;

    #[test]
    fn movie_cinf_uses_frame_rate() {
        let p = ProbeOutput::parse(MOVIE.as_bytes()).unwrap();
        let c = p.cinf_parts();
        assert_eq!(c.kind, MediaKind::Movie);
        assert_eq!(c.time_base, (1, 25));
        assert_eq!(c.frames, 250);
        assert_eq!(p.duration(), Some(10.0));
    }

    #[test]
    fn audio_and_still() {
        let audio = r#"{"streams":[{"codec_type":"audio","time_base":"1/48000"}],
                        "format":{"duration":"2.0"}}"#;
        let p = ProbeOutput::parse(audio.as_bytes()).unwrap();
        assert_eq!(p.kind(), MediaKind::Audio);
        assert_eq!(p.cinf_parts().frames, 96000);

        let still = r#"{"streams":[{"codec_type":"video","pix_fmt":"rgb24","avg_frame_rate":"0/0",
                        "time_base":"1/25"}],"format":{"duration":"0.040000"}}"#;
        let p = ProbeOutput::parse(still.as_bytes()).unwrap();
        assert_eq!(p.kind(), MediaKind::Still);
        assert_eq!(p.cinf_parts().frames, 0);
    }

    #[test]
    fn no_streams_is_not_media() {
        let err = ProbeOutput::parse(br#"{"streams":[],"format":{}}"#).unwrap_err();
        assert!(matches!(err, ScanError::NotMedia(_)));
        assert!(!err.is_transient());
        assert!(matches!(
            ProbeOutput::parse(b"garbage"),
            Err(ScanError::Malformed(_))
        ));
    }
}
