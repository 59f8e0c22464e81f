//! Parse ffmpeg's diagnostic stream (stderr) into typed analysis results.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::{FieldOrder, Interval};

static SCENE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Parsed_showinfo_(.*)pts_time:([\d.]+)\s+").expect("scene regex")
});

static BLACK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"black_start:(\d+(?:\.\d+)?) black_end:(\d+(?:\.\d+)?) black_duration:(\d+(?:\.\d+)?)?",
    )
    .expect("blackdetect regex")
});

static FREEZE_START_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"lavfi\.freezedetect\.freeze_start: (\d+(?:\.\d+)?)").expect("freeze regex")
});

static FREEZE_DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"lavfi\.freezedetect\.freeze_duration: (\d+(?:\.\d+)?)").expect("freeze regex")
});

static FREEZE_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"lavfi\.freezedetect\.freeze_end: (\d+(?:\.\d+)?)").expect("freeze regex")
});

static IDET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Multi frame detection: TFF:\s+(\d+)\s+BFF:\s+(\d+)\s+Progressive:\s+(\d+)")
        .expect("idet regex")
});

/// Frames of either field order at or below this count are noise.
const INTERLACE_NOISE_FRAMES: u64 = 10;

/// Scenes, blacks and freezes found by one filter pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterReport {
    pub scenes: Vec<f64>,
    pub blacks: Vec<Interval>,
    pub freezes: Vec<Interval>,
}

fn num(s: &str) -> Option<f64> {
    s.parse::<f64>().ok()
}

/// Scene-change timestamps (seconds) from `showinfo` lines.
pub fn parse_scenes(stderr: &str) -> Vec<f64> {
    SCENE_RE
        .captures_iter(stderr)
        .filter_map(|c| num(&c[2]))
        .collect()
}

/// `blackdetect` segments.
pub fn parse_blacks(stderr: &str) -> Vec<Interval> {
    BLACK_RE
        .captures_iter(stderr)
        .filter_map(|c| {
            let start = num(&c[1])?;
            let end = num(&c[2])?;
            let duration = c.get(3).and_then(|m| num(m.as_str())).unwrap_or(end - start);
            Some(Interval {
                start,
                end,
                duration,
            })
        })
        .collect()
}

/// `freezedetect` segments. Starts, durations and ends are reported as separate metadata
/// lines and paired in order. A freeze running to the end of the file has no end line;
/// it is closed at `media_duration` (dropped if that is unknown).
pub fn parse_freezes(stderr: &str, media_duration: Option<f64>) -> Vec<Interval> {
    let starts: Vec<f64> = FREEZE_START_RE
        .captures_iter(stderr)
        .filter_map(|c| num(&c[1]))
        .collect();
    let durations: Vec<f64> = FREEZE_DURATION_RE
        .captures_iter(stderr)
        .filter_map(|c| num(&c[1]))
        .collect();
    let ends: Vec<f64> = FREEZE_END_RE
        .captures_iter(stderr)
        .filter_map(|c| num(&c[1]))
        .collect();

    let mut out = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = match ends.get(i) {
            Some(&e) => e,
            None if i + 1 == starts.len() => match media_duration {
                Some(d) => d,
                None => continue,
            },
            None => continue,
        };
        let duration = match (ends.get(i), durations.get(i)) {
            (Some(_), Some(&d)) => d,
            _ => end - start,
        };
        out.push(Interval {
            start,
            end,
            duration,
        });
    }
    out
}

/// Field order from the `idet` summary. Missing summary → `Unknown`.
pub fn parse_field_order(stderr: &str) -> FieldOrder {
    let Some(c) = IDET_RE.captures(stderr) else {
        return FieldOrder::Unknown;
    };
    let tff: u64 = c[1].parse().unwrap_or(0);
    let bff: u64 = c[2].parse().unwrap_or(0);
    if tff <= INTERLACE_NOISE_FRAMES && bff <= INTERLACE_NOISE_FRAMES {
        FieldOrder::Progressive
    } else if tff > bff {
        FieldOrder::Tff
    } else {
        FieldOrder::Bff
    }
}

/// Everything a combined blackdetect/freezedetect/showinfo pass reports.
pub fn parse_filter_output(stderr: &str, media_duration: Option<f64>) -> FilterReport {
    FilterReport {
        scenes: parse_scenes(stderr),
        blacks: parse_blacks(stderr),
        freezes: parse_freezes(stderr, media_duration),
    }
}
