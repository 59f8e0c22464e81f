//! Diagnostic stream parsing against captured ffmpeg stderr.

use mediascan::engine::diagnostics::{
    parse_blacks, parse_field_order, parse_filter_output, parse_freezes, parse_scenes,
};
use mediascan::engine::timeline::reconcile_freezes;
use mediascan::types::{FieldOrder, Interval};

const FILTER_PASS: &str = include_str!("fixtures/filter_pass.txt");
const IDET: &str = include_str!("fixtures/idet.txt");

#[test]
fn test_scenes_from_showinfo() {
    assert_eq!(parse_scenes(FILTER_PASS), vec![3.003, 7.5]);
}

#[test]
fn test_blacks_from_blackdetect() {
    assert_eq!(parse_blacks(FILTER_PASS), vec![Interval::new(2.0, 5.0)]);
}

#[test]
fn test_freezes_pair_start_and_end_lines() {
    let freezes = parse_freezes(FILTER_PASS, Some(20.0));
    assert_eq!(
        freezes,
        vec![
            Interval::new(1.0, 6.0),
            Interval::new(10.0, 12.0),
            Interval::new(14.0, 20.0),
        ]
    );
    // Unknown duration: the open freeze at 14 cannot be closed.
    assert_eq!(parse_freezes(FILTER_PASS, None).len(), 2);
}

#[test]
fn test_filter_report_then_merge() {
    let report = parse_filter_output(FILTER_PASS, Some(20.0));
    assert_eq!(report.scenes.len(), 2);
    let merged = reconcile_freezes(true, &report.blacks, report.freezes, 20.0);
    assert_eq!(
        merged,
        vec![
            Interval::new(1.0, 2.0),
            Interval::new(5.0, 6.0),
            Interval::new(10.0, 12.0),
            Interval::new(14.0, 20.0),
        ]
    );
}

#[test]
fn test_field_order_uses_multi_frame_summary() {
    assert_eq!(parse_field_order(IDET), FieldOrder::Tff);
    assert_eq!(parse_field_order(FILTER_PASS), FieldOrder::Unknown);
}

#[test]
fn test_nothing_detected() {
    let report = parse_filter_output("frame=  10 fps=0.0 q=-0.0 Lsize=N/A\n", Some(1.0));
    assert!(report.scenes.is_empty());
    assert!(report.blacks.is_empty());
    assert!(report.freezes.is_empty());
}
