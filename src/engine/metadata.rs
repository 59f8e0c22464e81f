//! Advanced analysis: field order (idet) and one combined filter pass for blacks,
//! freezes and scene changes.

use std::ffi::OsString;
use std::path::Path;

use crate::engine::analyzer::Tools;
use crate::engine::diagnostics::{FilterReport, parse_field_order, parse_filter_output};
use crate::engine::timeline::reconcile_freezes;
use crate::errors::ScanError;
use crate::types::{FieldOrder, MetadataUpdate};
use crate::utils::config::{Lanes, MetadataConfig};

#[cfg(windows)]
const NULL_SINK: &str = "NUL";
#[cfg(not(windows))]
const NULL_SINK: &str = "/dev/null";

/// Comma-joined filter graph for the enabled detectors; `None` when nothing is enabled.
pub fn filter_graph(config: &MetadataConfig) -> Option<String> {
    let mut filters = Vec::new();
    if config.black_detection {
        filters.push(format!(
            "blackdetect=d={}:pic_th={}:pix_th={}",
            config.black_duration, config.black_ratio, config.black_threshold
        ));
    }
    if config.freeze_detection {
        filters.push(format!(
            "freezedetect=n={}:d={}",
            config.freeze_noise, config.freeze_duration
        ));
    }
    if config.scenes {
        filters.push(format!(
            "select='gt(scene,{})',showinfo",
            config.scene_threshold
        ));
    }
    (!filters.is_empty()).then(|| filters.join(","))
}

pub fn detect_field_order(
    tools: &Tools,
    config: &MetadataConfig,
    input: &Path,
) -> Result<FieldOrder, ScanError> {
    let args: Vec<OsString> = vec![
        "-hide_banner".into(),
        "-i".into(),
        input.into(),
        "-filter:v".into(),
        "idet".into(),
        "-frames:v".into(),
        config.field_order_scan_frames.to_string().into(),
        "-an".into(),
        "-f".into(),
        "rawvideo".into(),
        "-y".into(),
        NULL_SINK.into(),
    ];
    let out = tools.run(Lanes::FIELD_ORDER, &tools.ffmpeg, &args)?;
    Ok(parse_field_order(&String::from_utf8_lossy(&out.stderr)))
}

pub fn run_filter_pass(
    tools: &Tools,
    config: &MetadataConfig,
    input: &Path,
    media_duration: Option<f64>,
) -> Result<FilterReport, ScanError> {
    let Some(graph) = filter_graph(config) else {
        return Ok(FilterReport::default());
    };
    let args: Vec<OsString> = vec![
        "-hide_banner".into(),
        "-i".into(),
        input.into(),
        "-filter:v".into(),
        graph.into(),
        "-an".into(),
        "-f".into(),
        "null".into(),
        "-".into(),
    ];
    let out = tools.run(Lanes::METADATA, &tools.ffmpeg, &args)?;
    Ok(parse_filter_output(
        &String::from_utf8_lossy(&out.stderr),
        media_duration,
    ))
}

/// Field order and filter pass, then the black/freeze merge.
pub fn analyze(
    tools: &Tools,
    config: &MetadataConfig,
    input: &Path,
    media_duration: Option<f64>,
) -> Result<MetadataUpdate, ScanError> {
    let field_order = if config.field_order {
        detect_field_order(tools, config, input)?
    } else {
        FieldOrder::Unknown
    };
    let report = run_filter_pass(tools, config, input, media_duration)?;
    let freezes = reconcile_freezes(
        config.merge_blacks_and_freezes,
        &report.blacks,
        report.freezes,
        media_duration.unwrap_or(0.0),
    );
    Ok(MetadataUpdate {
        field_order,
        scenes: report.scenes,
        blacks: report.blacks,
        freezes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_follows_switches() {
        let mut cfg = MetadataConfig::default();
        assert_eq!(
            filter_graph(&cfg).unwrap(),
            "blackdetect=d=2:pic_th=0.98:pix_th=0.1,freezedetect=n=0.001:d=2,select='gt(scene,0.4)',showinfo"
        );
        cfg.black_detection = false;
        cfg.scenes = false;
        assert_eq!(filter_graph(&cfg).unwrap(), "freezedetect=n=0.001:d=2");
        cfg.freeze_detection = false;
        assert!(filter_graph(&cfg).is_none());
    }
}
