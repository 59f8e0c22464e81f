//! Waveform images for records with audio: `showwavespic` render, then a crop pass keeping
//! the top band of each channel.

use anyhow::{Context, Result};
use log::{error, info};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{RecordHandler, delete_artifact, write_back};
use crate::engine::analyzer::Tools;
use crate::engine::tools::is_watchdog_copy;
use crate::store::DocumentStore;
use crate::types::{ArtifactUpdate, MediaInfo, WaveformUpdate};
use crate::utils::ManualMode;
use crate::utils::config::{Lanes, WaveformConfig};
use crate::utils::tempfiles::{ensure_parent, remove_if_exists, rename_into_place};

pub struct WaveformGenerator {
    store: Arc<dyn DocumentStore>,
    tools: Tools,
    config: WaveformConfig,
    dir: PathBuf,
    manual: Arc<ManualMode>,
}

/// Render size and `-filter_complex` graph for the first pass.
pub(crate) fn render_filter(config: &WaveformConfig, info: &MediaInfo) -> (u32, u32, String) {
    let audio: Vec<_> = info.audio_streams().collect();
    let mut filter = String::new();
    if audio.len() > 1 {
        filter.push_str("amerge=2,");
    } else if audio.first().and_then(|s| s.channels).unwrap_or(1) > 1 {
        filter.push_str("channelsplit,amerge=2,");
    }
    let duration = info.format.duration.unwrap_or(0.0);
    let width = ((duration * config.pixels_per_second).round() as u32).max(1);
    let height = config.height.max(4);
    filter.push_str(&format!(
        "showwavespic=s={}x{}:split_channels=1:scale=log:colors={}",
        width, height, config.colors
    ));
    (width, height, filter)
}

/// Keep the top quarter of each channel band and stack them.
pub(crate) fn crop_filter(width: u32, height: u32) -> String {
    let band = (height as f64 / 4.0).round() as u32;
    format!(
        "[v:0]crop={w}:{b}:0:0[v0];[v:0]crop={w}:{b}:0:{off}[v1];[v0][v1]vstack[v]",
        w = width,
        b = band,
        off = band * 2
    )
}

fn ffmpeg_args(input: &Path, filter: String, tail: &[&str], output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-hide_banner".into(),
        "-y".into(),
        "-threads".into(),
        "1".into(),
        "-i".into(),
        input.into(),
        "-filter_complex".into(),
        filter.into(),
    ];
    args.extend(tail.iter().map(OsString::from));
    args.push(output.into());
    args
}

impl WaveformGenerator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        tools: Tools,
        config: WaveformConfig,
        dir: &Path,
        manual: Arc<ManualMode>,
    ) -> Self {
        Self {
            store,
            tools,
            config,
            dir: dir.to_path_buf(),
            manual,
        }
    }

    pub fn dest_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.png"))
    }

    pub fn generate(&self, id: &str) -> Result<Option<WaveformUpdate>> {
        let Some(record) = self.store.get(id)? else {
            return Ok(None);
        };
        let (Some(media), Some(info)) = (record.media_path.clone(), record.mediainfo.as_ref()) else {
            return Ok(None);
        };
        if is_watchdog_copy(&media) || info.audio_streams().next().is_none() {
            return Ok(None);
        }
        let dest = self.dest_path(id);
        if record.waveform_time == record.media_time && dest.exists() {
            return Ok(None);
        }

        let rendered = self.dir.join(format!("{id}_generated.png"));
        let cropped = self.dir.join(format!("{id}_cropped.png"));
        ensure_parent(&rendered)?;
        let (width, height, filter) = render_filter(&self.config, info);

        info!("id={} path={} Starting waveform generation", id, media.display());
        let result = (|| -> Result<u64> {
            self.tools.run(
                Lanes::WAVEFORM,
                &self.tools.ffmpeg,
                &ffmpeg_args(&media, filter, &["-frames:v", "1"], &rendered),
            )?;
            info!("id={} path={} Starting waveform crop", id, media.display());
            self.tools.run(
                Lanes::WAVEFORM_CROP,
                &self.tools.ffmpeg,
                &ffmpeg_args(&rendered, crop_filter(width, height), &["-map", "[v]"], &cropped),
            )?;
            let size = std::fs::metadata(&cropped)
                .with_context(|| format!("stat {}", cropped.display()))?
                .len();
            rename_into_place(&cropped, &dest)?;
            Ok(size)
        })();
        let _ = remove_if_exists(&rendered);
        let size = match result {
            Ok(size) => size,
            Err(e) => {
                let _ = remove_if_exists(&cropped);
                return Err(e.context(format!("waveform for {id}")));
            }
        };

        let update = WaveformUpdate(ArtifactUpdate {
            path: dest,
            size,
            source_time: record.media_time,
        });
        write_back(self.store.as_ref(), id, |r| update.apply(r))?;
        info!("id={} path={} Finished waveform generation", id, media.display());
        Ok(Some(update))
    }
}

impl RecordHandler for WaveformGenerator {
    fn name(&self) -> &'static str {
        "waveform"
    }

    fn handle(&self, id: &str, deleted: bool) {
        if deleted {
            delete_artifact("waveform", id, &self.dest_path(id));
            return;
        }
        if self.manual.is_enabled() {
            return;
        }
        if let Err(e) = self.generate(id) {
            error!("id={} {:#}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CodecInfo, FieldOrder, FormatInfo, MediaKind, StreamInfo};

    fn info_with(channels: &[u32], duration: f64) -> MediaInfo {
        MediaInfo {
            name: "A".into(),
            path: PathBuf::from("/m/a.wav"),
            size: 1,
            time: 0,
            kind: MediaKind::Audio,
            field_order: FieldOrder::Unknown,
            scenes: vec![],
            freezes: vec![],
            blacks: vec![],
            streams: channels
                .iter()
                .map(|c| StreamInfo {
                    codec: CodecInfo {
                        kind: Some("audio".into()),
                        ..CodecInfo::default()
                    },
                    channels: Some(*c),
                    ..StreamInfo::default()
                })
                .collect(),
            format: FormatInfo {
                duration: Some(duration),
                ..FormatInfo::default()
            },
        }
    }

    #[test]
    fn filters_follow_channel_layout() {
        let cfg = WaveformConfig::default();
        let (w, h, f) = render_filter(&cfg, &info_with(&[2], 12.04));
        assert_eq!((w, h), (120, 200));
        assert_eq!(
            f,
            "channelsplit,amerge=2,showwavespic=s=120x200:split_channels=1:scale=log:colors=white|white"
        );
        let (_, _, f) = render_filter(&cfg, &info_with(&[1, 1], 1.0));
        assert!(f.starts_with("amerge=2,showwavespic"));
        let (_, _, f) = render_filter(&cfg, &info_with(&[1], 1.0));
        assert!(f.starts_with("showwavespic"));

        assert_eq!(
            crop_filter(120, 200),
            "[v:0]crop=120:50:0:0[v0];[v:0]crop=120:50:0:100[v1];[v0][v1]vstack[v]"
        );
    }
}
